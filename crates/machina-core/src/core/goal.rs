// crates/machina-core/src/core/goal.rs
// ============================================================================
// Module: Machina Goal Registry
// Description: Goal descriptors and slot-based completion predicates.
// Purpose: Tell the goal loop when a run is finished.
// Dependencies: crate::core::{identifiers, state}, serde
// ============================================================================

//! ## Overview
//! A [`GoalDesc`] names an objective, the candidate tags that shape its
//! menus, and a completion predicate over the working-state slots. The
//! [`GoalRegistry`] resolves goal ids by exact match first, then by the
//! longest registered prefix (`goal.GENESIS` resolves
//! `goal.GENESIS_DEMO_HELLO.v1`), and evaluates completion fail-closed: an
//! unknown goal or one without required slots is never complete.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::Aid;
use crate::core::identifiers::GoalId;
use crate::core::identifiers::SlotIndex;
use crate::core::state::DsState;

// ============================================================================
// SECTION: Goal Descriptors
// ============================================================================

/// Descriptor for one registered goal.
///
/// # Invariants
/// - `required_slots` indices are unique; an empty list means no completion
///   criterion is defined and the goal never reports complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalDesc {
    /// Goal identifier.
    pub goal_id: GoalId,
    /// Tags used to build candidate menus.
    #[serde(default)]
    pub candidate_tags: Vec<String>,
    /// Tools the goal expects to have available.
    #[serde(default)]
    pub required_tools: Vec<Aid>,
    /// Slots that must be occupied for completion.
    #[serde(default)]
    pub required_slots: Vec<SlotIndex>,
    /// When true, one occupied required slot suffices; otherwise all must be.
    #[serde(default)]
    pub any_slot_sufficient: bool,
}

impl GoalDesc {
    /// Creates a descriptor with no candidate tags or requirements.
    #[must_use]
    pub fn new(goal_id: impl Into<GoalId>) -> Self {
        Self {
            goal_id: goal_id.into(),
            candidate_tags: Vec::new(),
            required_tools: Vec::new(),
            required_slots: Vec::new(),
            any_slot_sufficient: false,
        }
    }

    /// Sets the candidate tags.
    #[must_use]
    pub fn candidate_tags(mut self, tags: Vec<String>) -> Self {
        self.candidate_tags = tags;
        self
    }

    /// Sets the required tools.
    #[must_use]
    pub fn required_tools(mut self, tools: Vec<Aid>) -> Self {
        self.required_tools = tools;
        self
    }

    /// Sets the required slots.
    #[must_use]
    pub fn required_slots(mut self, slots: Vec<SlotIndex>) -> Self {
        self.required_slots = slots;
        self
    }

    /// Sets the any-slot-sufficient flag.
    #[must_use]
    pub const fn any_slot_sufficient(mut self, any: bool) -> Self {
        self.any_slot_sufficient = any;
        self
    }

    /// Evaluates the completion predicate against a state.
    ///
    /// An empty `required_slots` list yields `false`: a goal without a
    /// criterion can never complete on its own.
    #[must_use]
    pub fn is_complete(&self, state: &DsState) -> bool {
        if self.required_slots.is_empty() {
            return false;
        }
        let occupied =
            self.required_slots.iter().filter(|index| state.is_occupied(**index)).count();
        if self.any_slot_sufficient {
            occupied >= 1
        } else {
            occupied == self.required_slots.len()
        }
    }
}

// ============================================================================
// SECTION: Goal Registry
// ============================================================================

/// Registry of goal descriptors with prefix-fallback resolution.
///
/// # Invariants
/// - Registration is last-writer-wins per goal id.
#[derive(Debug, Clone, Default)]
pub struct GoalRegistry {
    /// Descriptors keyed by goal id string.
    goals: BTreeMap<String, GoalDesc>,
}

impl GoalRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a goal descriptor.
    pub fn register(&mut self, desc: GoalDesc) {
        self.goals.insert(desc.goal_id.as_str().to_string(), desc);
    }

    /// Returns the number of registered goals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.goals.len()
    }

    /// Returns whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }

    /// Resolves a goal id: exact match first, then longest registered prefix.
    #[must_use]
    pub fn resolve(&self, goal_id: &GoalId) -> Option<&GoalDesc> {
        if let Some(desc) = self.goals.get(goal_id.as_str()) {
            return Some(desc);
        }
        self.goals
            .iter()
            .filter(|(registered, _)| goal_id.as_str().starts_with(registered.as_str()))
            .max_by_key(|(registered, _)| registered.len())
            .map(|(_, desc)| desc)
    }

    /// Evaluates completion for a goal id against a state.
    ///
    /// Unknown goals are never complete.
    #[must_use]
    pub fn is_complete(&self, goal_id: &GoalId, state: &DsState) -> bool {
        self.resolve(goal_id).is_some_and(|desc| desc.is_complete(state))
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
    use crate::core::artifact::Artifact;

    /// Returns the slot index for a raw value, panicking on misuse in tests.
    fn slot(raw: u8) -> SlotIndex {
        SlotIndex::from_raw(raw).unwrap()
    }

    /// Builds a state with the given slots occupied by placeholder artifacts.
    fn state_with(slots: &[u8]) -> DsState {
        let mut state = DsState::new();
        for raw in slots {
            state.set_slot(slot(*raw), Some(Artifact::new("text", "{}", "test")));
        }
        state
    }

    #[test]
    fn exact_match_wins_over_prefix() {
        let mut registry = GoalRegistry::new();
        registry.register(GoalDesc::new("goal.GENESIS").required_slots(vec![slot(0)]));
        registry.register(
            GoalDesc::new("goal.GENESIS_DEMO_HELLO.v1").required_slots(vec![slot(1)]),
        );

        let resolved = registry.resolve(&GoalId::new("goal.GENESIS_DEMO_HELLO.v1")).unwrap();
        assert_eq!(resolved.required_slots, vec![slot(1)]);
    }

    #[test]
    fn longest_prefix_match_applies_when_exact_missing() {
        let mut registry = GoalRegistry::new();
        registry.register(GoalDesc::new("goal.GENESIS").required_slots(vec![slot(0)]));
        registry.register(GoalDesc::new("goal.GENESIS_DEMO").required_slots(vec![slot(2)]));

        let resolved = registry.resolve(&GoalId::new("goal.GENESIS_DEMO_HELLO.v1")).unwrap();
        assert_eq!(resolved.required_slots, vec![slot(2)]);
    }

    #[test]
    fn no_match_resolves_to_none_and_incomplete() {
        let registry = GoalRegistry::new();
        let goal_id = GoalId::new("goal.UNKNOWN.v1");
        assert!(registry.resolve(&goal_id).is_none());
        assert!(!registry.is_complete(&goal_id, &state_with(&[0, 1])));
    }

    #[test]
    fn empty_required_slots_never_complete() {
        let mut registry = GoalRegistry::new();
        registry.register(GoalDesc::new("goal.OPEN_ENDED.v1"));
        assert!(!registry.is_complete(&GoalId::new("goal.OPEN_ENDED.v1"), &state_with(&[0])));
    }

    #[test]
    fn all_slots_required_by_default() {
        let mut registry = GoalRegistry::new();
        registry
            .register(GoalDesc::new("goal.BOTH.v1").required_slots(vec![slot(0), slot(3)]));
        let goal_id = GoalId::new("goal.BOTH.v1");

        assert!(!registry.is_complete(&goal_id, &state_with(&[0])));
        assert!(registry.is_complete(&goal_id, &state_with(&[0, 3])));
    }

    #[test]
    fn any_slot_sufficient_completes_on_one() {
        let mut registry = GoalRegistry::new();
        registry.register(
            GoalDesc::new("goal.EITHER.v1")
                .required_slots(vec![slot(0), slot(3)])
                .any_slot_sufficient(true),
        );
        let goal_id = GoalId::new("goal.EITHER.v1");

        assert!(registry.is_complete(&goal_id, &state_with(&[3])));
        assert!(!registry.is_complete(&goal_id, &state_with(&[5])));
    }
}
