// crates/machina-core/src/core/tx.rs
// ============================================================================
// Module: Machina Transactions
// Description: Snapshot/commit/rollback envelope over the working state.
// Purpose: Make committed state the only observable state.
// Dependencies: crate::core::{patch, state}
// ============================================================================

//! ## Overview
//! A [`Tx`] snapshots a base [`DsState`] and exposes a mutable working copy.
//! Commit atomically overwrites the target with the working copy and returns
//! the delta as a [`TxPatch`]; rollback discards the working copy. Both
//! consume the transaction, so double commit and use-after-rollback are
//! unrepresentable. A `Tx` is not shareable across threads: the goal loop
//! holds the transaction and the target state exclusively for the duration of
//! a step.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::core::patch::TxPatch;
use crate::core::patch::compute_patch;
use crate::core::state::DsState;

// ============================================================================
// SECTION: Transaction
// ============================================================================

/// In-flight mutation of a working state.
///
/// # Invariants
/// - `base` is immutable for the life of the transaction.
/// - Commit and rollback consume the transaction; a `Tx` is used exactly once.
#[derive(Debug)]
pub struct Tx {
    /// Snapshot taken at `begin`; the patch is computed against it.
    base: DsState,
    /// Mutable working copy exposed to the tool invoker.
    tmp: DsState,
}

impl Tx {
    /// Begins a transaction by snapshotting the base state.
    #[must_use]
    pub fn begin(base: &DsState) -> Self {
        Self {
            base: base.clone(),
            tmp: base.clone(),
        }
    }

    /// Returns the working copy.
    #[must_use]
    pub const fn tmp(&self) -> &DsState {
        &self.tmp
    }

    /// Returns the working copy mutably; tools mutate state through this.
    pub const fn tmp_mut(&mut self) -> &mut DsState {
        &mut self.tmp
    }

    /// Commits the working copy into `target` and returns the base→tmp patch.
    ///
    /// The caller must hold exclusive access to `target`, which the mutable
    /// borrow enforces. The overwrite is a single assignment: `target` is
    /// never observable in a half-updated form.
    #[must_use = "the commit patch must be recorded to the audit log"]
    pub fn commit(self, target: &mut DsState) -> TxPatch {
        let patch = compute_patch(&self.base, &self.tmp);
        *target = self.tmp;
        patch
    }

    /// Discards the working copy without touching any committed state.
    pub fn rollback(self) {
        drop(self);
    }
}

// ============================================================================
// SECTION: Unit Tests
// ============================================================================
