// crates/machina-runner/src/stats.rs
// ============================================================================
// Module: Runner Statistics
// Description: Monotonic counters for runs, steps, and terminations.
// Purpose: Dependency-light observability over the goal loop.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Plain atomic counters snapshotted into a serializable report. No metrics
//! framework: deployments wanting Prometheus or OpenTelemetry wrap the
//! snapshot, and the audit log remains the event stream of record.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Snapshots
// ============================================================================

/// Serializable snapshot of the runner counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerStatsSnapshot {
    /// Runs started.
    pub runs_started: u64,
    /// Runs that ended with `goal_done`.
    pub runs_completed: u64,
    /// Runs that ended with `breaker_trip`.
    pub runs_tripped: u64,
    /// Steps executed across all runs.
    pub steps_total: u64,
    /// Invalid picks observed across all runs.
    pub invalid_picks_total: u64,
}

// ============================================================================
// SECTION: Counters
// ============================================================================

/// Monotonic runner counters.
///
/// # Invariants
/// - Counters only increase for the life of the runner.
#[derive(Debug, Default)]
pub struct RunnerStats {
    /// Runs started.
    pub(crate) runs_started: AtomicU64,
    /// Runs that ended with `goal_done`.
    pub(crate) runs_completed: AtomicU64,
    /// Runs that ended with `breaker_trip`.
    pub(crate) runs_tripped: AtomicU64,
    /// Steps executed across all runs.
    pub(crate) steps_total: AtomicU64,
    /// Invalid picks observed across all runs.
    pub(crate) invalid_picks_total: AtomicU64,
}

impl RunnerStats {
    /// Snapshots the counters.
    #[must_use]
    pub fn snapshot(&self) -> RunnerStatsSnapshot {
        RunnerStatsSnapshot {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            runs_tripped: self.runs_tripped.load(Ordering::Relaxed),
            steps_total: self.steps_total.load(Ordering::Relaxed),
            invalid_picks_total: self.invalid_picks_total.load(Ordering::Relaxed),
        }
    }
}
