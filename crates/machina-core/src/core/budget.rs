// crates/machina-core/src/core/budget.rs
// ============================================================================
// Module: Machina Run Budgets
// Description: Step and invalid-pick ceilings for one run.
// Purpose: Bound how much damage a misbehaving policy can do.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A [`Budget`] caps a run: at most `max_steps` dispatch steps and at most
//! `max_invalid_picks` selector mistakes before the runner trips its breaker.
//! Defaults are 64 steps and 8 invalid picks.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default maximum number of steps per run.
pub const DEFAULT_MAX_STEPS: u32 = 64;
/// Default maximum number of invalid picks per run.
pub const DEFAULT_MAX_INVALID_PICKS: u32 = 8;

// ============================================================================
// SECTION: Budget
// ============================================================================

/// Per-run execution ceilings.
///
/// # Invariants
/// - Both ceilings are inclusive upper bounds checked before each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    /// Maximum number of dispatch steps.
    pub max_steps: u32,
    /// Maximum number of invalid picks.
    pub max_invalid_picks: u32,
}

impl Budget {
    /// Creates a budget with explicit ceilings.
    #[must_use]
    pub const fn new(max_steps: u32, max_invalid_picks: u32) -> Self {
        Self {
            max_steps,
            max_invalid_picks,
        }
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STEPS, DEFAULT_MAX_INVALID_PICKS)
    }
}

// ============================================================================
// SECTION: Unit Tests
// ============================================================================
