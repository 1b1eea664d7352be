// crates/machina-selector/src/fallback.rs
// ============================================================================
// Module: Fallback Selector
// Description: Deterministic tag-intersection heuristic decision source.
// Purpose: Keep runs moving when no external policy is available or trusted.
// Dependencies: machina-core
// ============================================================================

//! ## Overview
//! The fallback picks the first menu item, in ascending SID order, whose tag
//! set intersects the goal's candidate tags; with no intersection anywhere it
//! emits `Noop`. The tie-break rule is exactly "lowest SID wins", and SIDs
//! are assigned in registry registration order, so identical registries and
//! goals reproduce identical runs — which is what makes fallback-only runs
//! strictly replayable across rebuilds.

// ============================================================================
// SECTION: Imports
// ============================================================================

use machina_core::DecisionSource;
use machina_core::Selection;
use machina_core::SelectionContext;
use machina_core::SelectionOutcome;
use machina_core::SelectorSource;

// ============================================================================
// SECTION: Fallback Selector
// ============================================================================

/// Deterministic tag-intersection selector.
///
/// # Invariants
/// - Identical (menu, candidate tags) inputs produce identical selections.
#[derive(Debug, Clone)]
pub struct FallbackSelector {
    /// Tags the goal considers relevant.
    candidate_tags: Vec<String>,
}

impl FallbackSelector {
    /// Creates a fallback for a goal's candidate tags.
    #[must_use]
    pub const fn new(candidate_tags: Vec<String>) -> Self {
        Self {
            candidate_tags,
        }
    }
}

impl DecisionSource for FallbackSelector {
    fn decide(&self, ctx: &SelectionContext<'_>) -> SelectionOutcome {
        let hit = ctx
            .menu
            .items()
            .iter()
            .find(|item| item.tags.iter().any(|tag| self.candidate_tags.contains(tag)));
        match hit {
            Some(item) => SelectionOutcome::new(
                Selection::Pick {
                    sid: item.sid,
                    input_patch: None,
                },
                format!("<PICK><{}><END>", item.sid),
                SelectorSource::Fallback,
            ),
            None => SelectionOutcome::new(
                Selection::Noop,
                "<NOOP><END>".to_string(),
                SelectorSource::Fallback,
            ),
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

    use machina_core::Aid;
    use machina_core::ControlMode;
    use machina_core::Menu;
    use serde_json::Map;

    use super::*;

    /// Builds a menu of (aid, tags) pairs.
    fn menu(items: &[(&str, &[&str])]) -> Menu {
        Menu::assign(
            items
                .iter()
                .map(|(aid, tags)| {
                    (
                        Aid::new(*aid),
                        (*aid).to_string(),
                        tags.iter().map(ToString::to_string).collect(),
                    )
                })
                .collect(),
        )
        .unwrap()
    }

    /// Runs the fallback against a menu.
    fn decide(fallback: &FallbackSelector, menu: &Menu) -> SelectionOutcome {
        let inputs = Map::new();
        fallback.decide(&SelectionContext {
            menu,
            goal_digest: "g",
            state_digest: "s",
            control_mode: ControlMode::FallbackOnly,
            inputs: &inputs,
        })
    }

    #[test]
    fn lowest_sid_with_intersection_wins() {
        let menu = menu(&[
            ("AID.A.v1", &["net"]),
            ("AID.B.v1", &["scan"]),
            ("AID.C.v1", &["scan"]),
        ]);
        let fallback = FallbackSelector::new(vec!["scan".to_string()]);
        let outcome = decide(&fallback, &menu);
        match outcome.selection {
            Selection::Pick {
                sid, ..
            } => assert_eq!(sid.get(), 2),
            other => panic!("expected pick, got {}", other.kind()),
        }
        assert_eq!(outcome.raw_output, "<PICK><SID0002><END>");
    }

    #[test]
    fn no_intersection_yields_noop() {
        let menu = menu(&[("AID.A.v1", &["net"])]);
        let fallback = FallbackSelector::new(vec!["scan".to_string()]);
        assert_eq!(decide(&fallback, &menu).selection, Selection::Noop);
    }

    #[test]
    fn decision_is_deterministic() {
        let menu = menu(&[("AID.A.v1", &["scan"]), ("AID.B.v1", &["scan"])]);
        let fallback = FallbackSelector::new(vec!["scan".to_string()]);
        let first = decide(&fallback, &menu);
        for _ in 0 .. 16 {
            assert_eq!(decide(&fallback, &menu).selection, first.selection);
        }
    }
}
