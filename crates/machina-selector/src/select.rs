// crates/machina-selector/src/select.rs
// ============================================================================
// Module: Selector Composition
// Description: Control-mode wiring of fallback and external policy.
// Purpose: One decision source per run, whatever the trust posture.
// Dependencies: machina-core
// ============================================================================

//! ## Overview
//! [`Selector`] implements [`DecisionSource`] over the four control modes:
//! `FallbackOnly` never spawns; `PolicyOnly` surfaces every external failure
//! as an invalid pick; `Blended` tries the policy and falls back on any
//! failure or invalid output; `ShadowPolicy` decides with the fallback while
//! calling the policy and logging its raw output unused. Every external
//! failure — launch, timeout, non-zero exit, empty output, unparseable or
//! invalid output — counts one breaker failure; while the breaker is open no
//! spawn happens in any mode.

// ============================================================================
// SECTION: Imports
// ============================================================================

use machina_core::ControlMode;
use machina_core::DecisionSource;
use machina_core::Selection;
use machina_core::SelectionContext;
use machina_core::SelectionOutcome;
use machina_core::SelectorSource;
use machina_core::Timestamp;

use crate::breaker::BreakerStatsSnapshot;
use crate::fallback::FallbackSelector;
use crate::grammar::parse_selector_output;
use crate::policy::PolicySelector;

// ============================================================================
// SECTION: Selector
// ============================================================================

/// Composite decision source for one run.
///
/// # Invariants
/// - With no policy configured, every mode behaves as `FallbackOnly`.
#[derive(Debug)]
pub struct Selector {
    /// Deterministic heuristic, always present.
    fallback: FallbackSelector,
    /// External policy, when configured.
    policy: Option<PolicySelector>,
}

impl Selector {
    /// Creates a fallback-only selector.
    #[must_use]
    pub const fn fallback_only(fallback: FallbackSelector) -> Self {
        Self {
            fallback,
            policy: None,
        }
    }

    /// Creates a selector with an external policy attached.
    #[must_use]
    pub const fn with_policy(fallback: FallbackSelector, policy: PolicySelector) -> Self {
        Self {
            fallback,
            policy: Some(policy),
        }
    }

    /// Snapshots the breaker, when a policy is configured.
    #[must_use]
    pub fn breaker_snapshot(&self) -> Option<BreakerStatsSnapshot> {
        self.policy.as_ref().map(|policy| policy.breaker().snapshot(Timestamp::now()))
    }

    /// One external call with breaker bookkeeping.
    ///
    /// Returns the parsed selection and raw output; `Err` carries the
    /// failure description when no output was usable.
    fn call_policy(
        &self,
        policy: &PolicySelector,
        ctx: &SelectionContext<'_>,
    ) -> Result<(Selection, String), String> {
        match policy.invoke_external(ctx) {
            Ok(raw) => {
                let selection = parse_selector_output(&raw, ctx.menu);
                if selection == Selection::Invalid {
                    policy.breaker().record_failure(Timestamp::now());
                    return Err(raw);
                }
                policy.breaker().record_success();
                Ok((selection, raw))
            }
            Err(err) => {
                policy.breaker().record_failure(Timestamp::now());
                Err(err.to_string())
            }
        }
    }
}

impl DecisionSource for Selector {
    fn decide(&self, ctx: &SelectionContext<'_>) -> SelectionOutcome {
        let Some(policy) = &self.policy else {
            return self.fallback.decide(ctx);
        };
        match ctx.control_mode {
            ControlMode::FallbackOnly => self.fallback.decide(ctx),
            ControlMode::PolicyOnly => {
                if policy.breaker().is_open(Timestamp::now()) {
                    return SelectionOutcome::new(
                        Selection::Invalid,
                        "breaker open".to_string(),
                        SelectorSource::Policy,
                    );
                }
                match self.call_policy(policy, ctx) {
                    Ok((selection, raw)) => {
                        SelectionOutcome::new(selection, raw, SelectorSource::Policy)
                    }
                    Err(raw) => {
                        SelectionOutcome::new(Selection::Invalid, raw, SelectorSource::Policy)
                    }
                }
            }
            ControlMode::Blended => {
                if policy.breaker().is_open(Timestamp::now()) {
                    return self.fallback.decide(ctx);
                }
                match self.call_policy(policy, ctx) {
                    Ok((selection, raw)) => {
                        SelectionOutcome::new(selection, raw, SelectorSource::Policy)
                    }
                    Err(_) => self.fallback.decide(ctx),
                }
            }
            ControlMode::ShadowPolicy => {
                let mut outcome = self.fallback.decide(ctx);
                if !policy.breaker().is_open(Timestamp::now()) {
                    outcome.shadow_raw_output = Some(match self.call_policy(policy, ctx) {
                        Ok((_, raw)) | Err(raw) => raw,
                    });
                }
                outcome
            }
        }
    }
}

// ============================================================================
// SECTION: Unit Tests
// ============================================================================
