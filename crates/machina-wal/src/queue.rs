// crates/machina-wal/src/queue.rs
// ============================================================================
// Module: Concurrent Priority Queue
// Description: Thread-safe priority queue with blocking pop and shutdown.
// Purpose: Feed queue-backed collaborators in priority order, FIFO on ties.
// Dependencies: std
// ============================================================================

//! ## Overview
//! [`PriorityQueue`] orders items by ascending priority (lower value pops
//! first) with FIFO tie-break via a monotonically increasing sequence
//! number. `pop` blocks until an item arrives or the queue shuts down;
//! shutdown wakes every blocked consumer with a negative result (`None`).
//! Items already queued at shutdown drain before consumers see `None`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::PoisonError;

// ============================================================================
// SECTION: Entries
// ============================================================================

/// Heap entry ordered by ascending priority then ascending sequence.
///
/// # Invariants
/// - `seq` is unique per queue; two entries never compare equal.
#[derive(Debug)]
struct Entry<T> {
    /// Priority; lower pops first.
    priority: i64,
    /// FIFO tie-break sequence.
    seq: u64,
    /// Queued item.
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap; invert so the lowest (priority, seq)
        // pair surfaces first.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

// ============================================================================
// SECTION: Queue State
// ============================================================================

/// Mutable queue state owned by the mutex.
#[derive(Debug)]
struct Inner<T> {
    /// Pending entries.
    heap: BinaryHeap<Entry<T>>,
    /// Next sequence number.
    next_seq: u64,
    /// Whether shutdown was requested.
    shutdown: bool,
}

// ============================================================================
// SECTION: Priority Queue
// ============================================================================

/// Thread-safe priority queue with blocking pop and shutdown.
///
/// # Invariants
/// - Pop order is ascending priority, FIFO within equal priorities.
/// - After shutdown, pushes are rejected and drained consumers get `None`.
#[derive(Debug)]
pub struct PriorityQueue<T> {
    /// Queue state.
    inner: Mutex<Inner<T>>,
    /// Wakes blocked consumers on push or shutdown.
    available: Condvar,
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PriorityQueue<T> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                next_seq: 0,
                shutdown: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Pushes an item; returns whether it was accepted (false after
    /// shutdown).
    pub fn push(&self, priority: i64, item: T) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.shutdown {
            return false;
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(Entry {
            priority,
            seq,
            item,
        });
        drop(inner);
        self.available.notify_one();
        true
    }

    /// Blocks until an item is available or the queue has shut down.
    ///
    /// Returns `None` only when the queue is shut down and drained.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(entry) = inner.heap.pop() {
                return Some(entry.item);
            }
            if inner.shutdown {
                return None;
            }
            inner = self.available.wait(inner).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Pops without blocking; `None` means empty (or shut down and drained).
    pub fn try_pop(&self) -> Option<T> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.heap.pop().map(|entry| entry.item)
    }

    /// Returns the number of pending items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).heap.len()
    }

    /// Returns whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shuts the queue down, waking every blocked consumer.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.shutdown = true;
        drop(inner);
        self.available.notify_all();
    }
}

// ============================================================================
// SECTION: Unit Tests
// ============================================================================
