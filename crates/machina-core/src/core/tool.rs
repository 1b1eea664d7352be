// crates/machina-core/src/core/tool.rs
// ============================================================================
// Module: Machina Tool Descriptors
// Description: Registry records describing tools and their dispatch contracts.
// Purpose: Carry the metadata the runner, leases, and replay all key off.
// Dependencies: crate::core::identifiers, serde
// ============================================================================

//! ## Overview
//! A [`ToolDesc`] is the registry record for one tool: its AID, display name,
//! determinism flag, tags, normalized side-effect list, replay fences, and
//! lease tier. The engine never interprets tool semantics beyond these fields;
//! they drive menu construction, lease gating, and strict-replay re-execution
//! decisions. [`StepStatus`] is the generic dispatch contract every invoker
//! reports through.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::Aid;

// ============================================================================
// SECTION: Lease Tiers
// ============================================================================

/// Authorization tier of a tool, from pure to dangerous.
///
/// # Invariants
/// - Ordering follows risk: `Safe < Write < System < Dangerous`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum LeaseTier {
    /// Tier 0: pure tools that run freely.
    #[default]
    Safe,
    /// Tier 1: tools that write state or files.
    Write,
    /// Tier 2: system, shell, or network tools.
    System,
    /// Tier 3: dangerous tools (plugin loading, genesis).
    Dangerous,
}

impl LeaseTier {
    /// Returns the numeric tier (0..=3).
    #[must_use]
    pub const fn level(self) -> u8 {
        match self {
            Self::Safe => 0,
            Self::Write => 1,
            Self::System => 2,
            Self::Dangerous => 3,
        }
    }

    /// Creates a tier from its numeric level (returns `None` above 3).
    #[must_use]
    pub const fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Self::Safe),
            1 => Some(Self::Write),
            2 => Some(Self::System),
            3 => Some(Self::Dangerous),
            _ => None,
        }
    }
}

impl fmt::Display for LeaseTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.level().fmt(f)
    }
}

// ============================================================================
// SECTION: Tool Descriptors
// ============================================================================

/// Registry record for one tool.
///
/// # Invariants
/// - `side_effects` is normalized: `["none"]` means pure, and `"none"` never
///   co-exists with another entry.
/// - `replay_inputs` names the input keys that must match on strict replay
///   for deterministic tools that still have side effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDesc {
    /// Stable action identifier.
    pub aid: Aid,
    /// Display name shown in menus.
    pub name: String,
    /// Whether re-execution with equal inputs yields equal patches.
    pub deterministic: bool,
    /// Tags used for goal/tool matching.
    pub tags: Vec<String>,
    /// Normalized side-effect list; `["none"]` means pure.
    pub side_effects: Vec<String>,
    /// Replay fences: input keys that must match for re-execution.
    pub replay_inputs: Vec<String>,
    /// Authorization tier.
    pub tier: LeaseTier,
}

impl ToolDesc {
    /// Creates a descriptor with normalized side effects.
    #[must_use]
    pub fn new(aid: impl Into<Aid>, name: impl Into<String>) -> Self {
        Self {
            aid: aid.into(),
            name: name.into(),
            deterministic: false,
            tags: Vec::new(),
            side_effects: vec!["none".to_string()],
            replay_inputs: Vec::new(),
            tier: LeaseTier::Safe,
        }
    }

    /// Sets the determinism flag.
    #[must_use]
    pub const fn deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }

    /// Sets the tag list.
    #[must_use]
    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Sets and normalizes the side-effect list.
    ///
    /// An empty list and a list containing `"none"` both normalize to the
    /// canonical pure form `["none"]`.
    #[must_use]
    pub fn side_effects(mut self, side_effects: Vec<String>) -> Self {
        let effects: Vec<String> =
            side_effects.into_iter().filter(|effect| effect != "none").collect();
        self.side_effects =
            if effects.is_empty() { vec!["none".to_string()] } else { effects };
        self
    }

    /// Sets the replay fences.
    #[must_use]
    pub fn replay_inputs(mut self, replay_inputs: Vec<String>) -> Self {
        self.replay_inputs = replay_inputs;
        self
    }

    /// Sets the authorization tier.
    #[must_use]
    pub const fn tier(mut self, tier: LeaseTier) -> Self {
        self.tier = tier;
        self
    }

    /// Returns whether the tool is pure (no side effects).
    #[must_use]
    pub fn is_pure(&self) -> bool {
        self.side_effects.len() == 1 && self.side_effects[0] == "none"
    }

    /// Returns whether any tag intersects the query set.
    #[must_use]
    pub fn tags_intersect(&self, query: &[String]) -> bool {
        self.tags.iter().any(|tag| query.contains(tag))
    }

    /// Returns whether strict replay may re-execute this tool.
    ///
    /// Re-execution requires determinism and the absence of replay fences;
    /// everything else replays from logged patches.
    #[must_use]
    pub fn replay_reexecutable(&self) -> bool {
        self.deterministic && self.replay_inputs.is_empty()
    }
}

// ============================================================================
// SECTION: Step Status
// ============================================================================

/// Generic dispatch outcome reported by every tool invoker.
///
/// # Invariants
/// - Wire forms are the stable uppercase strings of the tool-host protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    /// Tool succeeded; the transaction commits.
    #[serde(rename = "OK")]
    Ok,
    /// Tool judged its own inputs invalid; counted against the pick budget.
    #[serde(rename = "INVALID_PICK")]
    InvalidPick,
    /// Tool failed; the transaction rolls back.
    #[serde(rename = "TOOL_ERROR")]
    ToolError,
    /// Tool demands the run stop immediately.
    #[serde(rename = "BREAKER_TRIP")]
    BreakerTrip,
}

impl StepStatus {
    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::InvalidPick => "INVALID_PICK",
            Self::ToolError => "TOOL_ERROR",
            Self::BreakerTrip => "BREAKER_TRIP",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
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
    fn side_effects_normalize_to_pure_form() {
        let desc = ToolDesc::new("AID.X.v1", "X").side_effects(vec![]);
        assert_eq!(desc.side_effects, vec!["none".to_string()]);
        assert!(desc.is_pure());

        let mixed = ToolDesc::new("AID.Y.v1", "Y")
            .side_effects(vec!["none".to_string(), "fs_write".to_string()]);
        assert_eq!(mixed.side_effects, vec!["fs_write".to_string()]);
        assert!(!mixed.is_pure());
    }

    #[test]
    fn replay_reexecution_requires_determinism_and_no_fences() {
        let pure = ToolDesc::new("AID.A.v1", "A").deterministic(true);
        assert!(pure.replay_reexecutable());

        let fenced = ToolDesc::new("AID.B.v1", "B")
            .deterministic(true)
            .replay_inputs(vec!["input_path".to_string()]);
        assert!(!fenced.replay_reexecutable());

        let nondet = ToolDesc::new("AID.C.v1", "C");
        assert!(!nondet.replay_reexecutable());
    }

    #[test]
    fn tier_levels_round_trip() {
        for level in 0u8 ..= 3 {
            let tier = LeaseTier::from_level(level).unwrap();
            assert_eq!(tier.level(), level);
        }
        assert!(LeaseTier::from_level(4).is_none());
    }

    #[test]
    fn step_status_uses_stable_wire_labels() {
        assert_eq!(serde_json::to_string(&StepStatus::Ok).unwrap(), r#""OK""#);
        assert_eq!(serde_json::to_string(&StepStatus::InvalidPick).unwrap(), r#""INVALID_PICK""#);
        let status: StepStatus = serde_json::from_str(r#""TOOL_ERROR""#).unwrap();
        assert_eq!(status, StepStatus::ToolError);
    }

    #[test]
    fn tags_intersect_matches_any_common_tag() {
        let desc =
            ToolDesc::new("AID.T.v1", "T").tags(vec!["scan".to_string(), "table".to_string()]);
        assert!(desc.tags_intersect(&["table".to_string()]));
        assert!(!desc.tags_intersect(&["net".to_string()]));
        assert!(!desc.tags_intersect(&[]));
    }
}
