// crates/machina-config/src/manifest.rs
// ============================================================================
// Module: Goal Manifests
// Description: TOML loading of goal descriptors.
// Purpose: Declare goals as data so deployments need no code changes.
// Dependencies: machina-core, serde, toml
// ============================================================================

//! ## Overview
//! A goal manifest is an array of `[[goal]]` tables mapping onto
//! [`GoalDesc`]: goal id, candidate tags, required tools, required slots,
//! and the any-slot-sufficient flag. Slot indices validate on parse; an
//! index outside `0..=7` rejects the manifest rather than loading a goal
//! that can never evaluate.

// ============================================================================
// SECTION: Imports
// ============================================================================

use machina_core::GoalDesc;
use serde::Deserialize;

use crate::model::ConfigError;

// ============================================================================
// SECTION: Manifest Shape
// ============================================================================

/// Root of a goal manifest document.
#[derive(Debug, Deserialize)]
struct GoalManifest {
    /// Declared goals.
    #[serde(default)]
    goal: Vec<GoalDesc>,
}

// ============================================================================
// SECTION: Loading
// ============================================================================

/// Parses a goal manifest from TOML text.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] on malformed TOML or out-of-range slot
/// indices.
pub fn load_goal_manifest(text: &str) -> Result<Vec<GoalDesc>, ConfigError> {
    let manifest: GoalManifest =
        toml::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))?;
    Ok(manifest.goal)
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

    use machina_core::SlotIndex;

    use super::*;

    #[test]
    fn manifest_parses_goal_tables() {
        let text = r#"
            [[goal]]
            goal_id = "goal.ERROR_SCAN.v1"
            candidate_tags = ["scan", "error"]
            required_tools = ["AID.ERROR_SCAN.v1"]
            required_slots = [0]
            any_slot_sufficient = false

            [[goal]]
            goal_id = "goal.EITHER.v1"
            candidate_tags = ["write"]
            required_tools = []
            required_slots = [0, 3]
            any_slot_sufficient = true
        "#;
        let goals = load_goal_manifest(text).unwrap();
        assert_eq!(goals.len(), 2);
        assert_eq!(goals[0].goal_id.as_str(), "goal.ERROR_SCAN.v1");
        assert_eq!(goals[0].required_slots, vec![SlotIndex::DS0]);
        assert!(goals[1].any_slot_sufficient);
    }

    #[test]
    fn out_of_range_slot_rejects_the_manifest() {
        let text = r#"
            [[goal]]
            goal_id = "goal.BAD.v1"
            candidate_tags = []
            required_tools = []
            required_slots = [8]
            any_slot_sufficient = false
        "#;
        assert!(matches!(load_goal_manifest(text), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn empty_manifest_is_no_goals() {
        assert!(load_goal_manifest("").unwrap().is_empty());
    }
}
