// crates/machina-core/src/core/time.rs
// ============================================================================
// Module: Machina Time Model
// Description: Millisecond timestamps for audit events and leases.
// Purpose: Keep wall-clock reads at well-defined edges of the engine.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Machina records time as unix-epoch milliseconds. Core value types carry
//! caller-supplied [`Timestamp`]s so replay stays deterministic; only the
//! runner loop, the WAL rotation check, and lease expiry read the wall clock,
//! and they do so through [`Timestamp::now`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Timestamps
// ============================================================================

/// Unix-epoch millisecond timestamp.
///
/// # Invariants
/// - Monotonicity is not guaranteed; callers comparing timestamps must
///   tolerate clock steps.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp from raw milliseconds.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the raw millisecond value.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Reads the wall clock, saturating to zero before the unix epoch.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self(millis)
    }

    /// Returns this timestamp advanced by `millis`, saturating on overflow.
    #[must_use]
    pub const fn saturating_add_millis(self, millis: u64) -> Self {
        Self(self.0.saturating_add(millis))
    }

    /// Returns whether this timestamp is strictly before `other`.
    #[must_use]
    pub const fn is_before(self, other: Self) -> bool {
        self.0 < other.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
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

    #[test]
    fn saturating_add_never_wraps() {
        let near_max = Timestamp::from_millis(u64::MAX - 1);
        assert_eq!(near_max.saturating_add_millis(10).as_millis(), u64::MAX);
    }

    #[test]
    fn ordering_follows_millis() {
        let early = Timestamp::from_millis(1_000);
        let late = Timestamp::from_millis(2_000);
        assert!(early.is_before(late));
        assert!(!late.is_before(early));
        assert!(!early.is_before(early));
    }

    #[test]
    fn now_is_after_build_epoch() {
        // 2020-01-01T00:00:00Z in unix millis; guards against a zeroed clock.
        assert!(Timestamp::now().as_millis() > 1_577_836_800_000);
    }
}
