// crates/machina-selector/src/breaker.rs
// ============================================================================
// Module: Selector Circuit Breaker
// Description: Consecutive-failure gate over the external policy process.
// Purpose: Stop spawning a selector that keeps failing, for a cooldown.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! The breaker counts consecutive external-selector failures (launch
//! failure, timeout, non-zero exit, empty output, grammar failure). At the
//! configured threshold it opens: every call short-circuits without a spawn
//! until the cooldown deadline passes. One success closes it and resets the
//! count. Counters are atomics; the breaker is the only process-wide mutable
//! state the selector stack keeps.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use machina_core::Timestamp;
use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default consecutive failures before the breaker opens.
pub const DEFAULT_BREAKER_THRESHOLD: u32 = 3;
/// Default cooldown once open, in milliseconds.
pub const DEFAULT_BREAKER_COOLDOWN_MS: u64 = 30_000;

// ============================================================================
// SECTION: Statistics
// ============================================================================

/// Serializable breaker snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerStatsSnapshot {
    /// Current consecutive failure count.
    pub consecutive_failures: u32,
    /// Total failures recorded.
    pub failures_total: u64,
    /// Times the breaker opened.
    pub trips: u64,
    /// Whether the breaker is currently open.
    pub open: bool,
}

// ============================================================================
// SECTION: Circuit Breaker
// ============================================================================

/// Consecutive-failure circuit breaker.
///
/// # Invariants
/// - While open, `is_open` stays true until the cooldown deadline passes.
/// - A success resets the consecutive count and closes the breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Failures before opening.
    threshold: u32,
    /// Cooldown in milliseconds once open.
    cooldown_ms: u64,
    /// Current consecutive failures.
    consecutive: AtomicU32,
    /// Total failures recorded.
    failures_total: AtomicU64,
    /// Times the breaker opened.
    trips: AtomicU64,
    /// Epoch-ms deadline until which the breaker is open; 0 means closed.
    disabled_until_ms: AtomicU64,
}

impl CircuitBreaker {
    /// Creates a breaker; a zero threshold is promoted to one.
    #[must_use]
    pub fn new(threshold: u32, cooldown_ms: u64) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown_ms,
            consecutive: AtomicU32::new(0),
            failures_total: AtomicU64::new(0),
            trips: AtomicU64::new(0),
            disabled_until_ms: AtomicU64::new(0),
        }
    }

    /// Returns whether calls must short-circuit right now.
    #[must_use]
    pub fn is_open(&self, now: Timestamp) -> bool {
        now.as_millis() < self.disabled_until_ms.load(Ordering::Acquire)
    }

    /// Records one failure; returns whether this failure opened the breaker.
    pub fn record_failure(&self, now: Timestamp) -> bool {
        self.failures_total.fetch_add(1, Ordering::Relaxed);
        let count = self.consecutive.fetch_add(1, Ordering::AcqRel) + 1;
        if count >= self.threshold {
            self.trips.fetch_add(1, Ordering::Relaxed);
            self.disabled_until_ms.store(
                now.saturating_add_millis(self.cooldown_ms).as_millis(),
                Ordering::Release,
            );
            self.consecutive.store(0, Ordering::Release);
            return true;
        }
        false
    }

    /// Records one success, closing the breaker and resetting the count.
    pub fn record_success(&self) {
        self.consecutive.store(0, Ordering::Release);
        self.disabled_until_ms.store(0, Ordering::Release);
    }

    /// Snapshots the counters.
    #[must_use]
    pub fn snapshot(&self, now: Timestamp) -> BreakerStatsSnapshot {
        BreakerStatsSnapshot {
            consecutive_failures: self.consecutive.load(Ordering::Acquire),
            failures_total: self.failures_total.load(Ordering::Relaxed),
            trips: self.trips.load(Ordering::Relaxed),
            open: self.is_open(now),
        }
    }
}

// ============================================================================
// SECTION: Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        reason = "Test-only panic-based assertions are permitted."
    )]

    use super::*;

    /// Fixed "now" for deterministic tests.
    const NOW: Timestamp = Timestamp::from_millis(1_000_000);

    #[test]
    fn opens_at_threshold_and_not_before() {
        let breaker = CircuitBreaker::new(3, 10_000);
        assert!(!breaker.record_failure(NOW));
        assert!(!breaker.record_failure(NOW));
        assert!(!breaker.is_open(NOW));
        assert!(breaker.record_failure(NOW));
        assert!(breaker.is_open(NOW));
    }

    #[test]
    fn stays_open_until_cooldown_deadline() {
        let breaker = CircuitBreaker::new(1, 10_000);
        assert!(breaker.record_failure(NOW));
        assert!(breaker.is_open(NOW.saturating_add_millis(9_999)));
        assert!(!breaker.is_open(NOW.saturating_add_millis(10_000)));
    }

    #[test]
    fn success_resets_count_and_closes() {
        let breaker = CircuitBreaker::new(2, 10_000);
        assert!(!breaker.record_failure(NOW));
        breaker.record_success();
        assert!(!breaker.record_failure(NOW));
        assert!(breaker.record_failure(NOW));
        breaker.record_success();
        assert!(!breaker.is_open(NOW));
    }

    #[test]
    fn snapshot_reflects_state() {
        let breaker = CircuitBreaker::new(2, 10_000);
        assert!(!breaker.record_failure(NOW));
        let snapshot = breaker.snapshot(NOW);
        assert_eq!(snapshot.consecutive_failures, 1);
        assert_eq!(snapshot.failures_total, 1);
        assert_eq!(snapshot.trips, 0);
        assert!(!snapshot.open);

        assert!(breaker.record_failure(NOW));
        let snapshot = breaker.snapshot(NOW);
        assert_eq!(snapshot.trips, 1);
        assert!(snapshot.open);
    }

    #[test]
    fn zero_threshold_is_promoted_to_one() {
        let breaker = CircuitBreaker::new(0, 10_000);
        assert!(breaker.record_failure(NOW));
        assert!(breaker.is_open(NOW));
    }
}
