// crates/machina-core/src/core/request.rs
// ============================================================================
// Module: Machina Run Requests
// Description: The external run-request shape, control modes, and AID filters.
// Purpose: Define the contract callers use to start a goal-loop run.
// Dependencies: crate::core::identifiers, serde, serde_json
// ============================================================================

//! ## Overview
//! A [`RunRequest`] carries the goal id, initial inputs, candidate tags,
//! control mode, optional request id, and an optional [`CapabilityFilter`]
//! over menu AIDs. Unknown top-level keys are preserved but never
//! interpreted. [`ControlMode`] selects how the fallback and external
//! selectors combine; its wire strings are the four PascalCase enum names
//! from the external contract.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::core::identifiers::Aid;
use crate::core::identifiers::GoalId;
use crate::core::identifiers::RequestId;

// ============================================================================
// SECTION: Control Modes
// ============================================================================

/// How the deterministic fallback and the external policy combine.
///
/// # Invariants
/// - Wire strings are the stable PascalCase variant names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlMode {
    /// Deterministic fallback selector only.
    #[default]
    FallbackOnly,
    /// External selector only; failures surface as invalid picks.
    PolicyOnly,
    /// Try external; on any failure or invalid output, fall back.
    Blended,
    /// Decide with the fallback, but call external and log both outputs.
    ShadowPolicy,
}

impl ControlMode {
    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FallbackOnly => "FallbackOnly",
            Self::PolicyOnly => "PolicyOnly",
            Self::Blended => "Blended",
            Self::ShadowPolicy => "ShadowPolicy",
        }
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Capability Filters
// ============================================================================

/// Allow/deny filter over menu AIDs.
///
/// # Invariants
/// - Patterns are exact AID strings or `prefix.*` wildcards.
/// - Deny takes precedence over allow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityFilter {
    /// Allow patterns; empty means allow everything.
    #[serde(default)]
    pub allow: Vec<String>,
    /// Deny patterns; empty means deny nothing.
    #[serde(default)]
    pub deny: Vec<String>,
}

impl CapabilityFilter {
    /// Creates a filter from allow and deny pattern lists.
    #[must_use]
    pub const fn new(allow: Vec<String>, deny: Vec<String>) -> Self {
        Self {
            allow,
            deny,
        }
    }

    /// Returns whether a pattern matches an AID.
    ///
    /// `prefix.*` matches any AID beginning with `prefix.`; any other pattern
    /// is an exact string match.
    #[must_use]
    pub fn pattern_matches(pattern: &str, aid: &Aid) -> bool {
        pattern.strip_suffix(".*").map_or_else(
            || pattern == aid.as_str(),
            |prefix| {
                aid.as_str()
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('.'))
            },
        )
    }

    /// Evaluates the filter: allowed iff (allow empty or some allow pattern
    /// matches) and (deny empty or no deny pattern matches).
    #[must_use]
    pub fn permits(&self, aid: &Aid) -> bool {
        let allowed = self.allow.is_empty()
            || self.allow.iter().any(|pattern| Self::pattern_matches(pattern, aid));
        let denied = self.deny.iter().any(|pattern| Self::pattern_matches(pattern, aid));
        allowed && !denied
    }
}

// ============================================================================
// SECTION: Run Requests
// ============================================================================

/// External request to run a goal.
///
/// # Invariants
/// - Unknown top-level keys round-trip through `extra` uninterpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Goal identifier to run.
    pub goal_id: GoalId,
    /// Initial runner inputs as a JSON object.
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// Candidate tags; `None` derives them from the goal descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_tags: Option<Vec<String>>,
    /// Selector control mode.
    #[serde(default)]
    pub control_mode: ControlMode,
    /// Caller-supplied tracing identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    /// Optional AID filter applied to every menu.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_filter: Option<CapabilityFilter>,
    /// Unknown top-level keys, preserved but not interpreted.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RunRequest {
    /// Creates a request for a goal with default mode and empty inputs.
    #[must_use]
    pub fn new(goal_id: impl Into<GoalId>) -> Self {
        Self {
            goal_id: goal_id.into(),
            inputs: Map::new(),
            candidate_tags: None,
            control_mode: ControlMode::default(),
            request_id: None,
            capability_filter: None,
            extra: Map::new(),
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

    use serde_json::json;

    use super::*;

    #[test]
    fn control_mode_wire_strings_are_pascal_case() {
        assert_eq!(serde_json::to_string(&ControlMode::FallbackOnly).unwrap(), r#""FallbackOnly""#);
        let mode: ControlMode = serde_json::from_str(r#""ShadowPolicy""#).unwrap();
        assert_eq!(mode, ControlMode::ShadowPolicy);
    }

    #[test]
    fn wildcard_pattern_requires_prefix_then_dot() {
        let aid = Aid::new("AID.SCAN.v1");
        assert!(CapabilityFilter::pattern_matches("AID.*", &aid));
        assert!(CapabilityFilter::pattern_matches("AID.SCAN.v1", &aid));
        assert!(!CapabilityFilter::pattern_matches("AID.SCANNER.*", &aid));
        assert!(!CapabilityFilter::pattern_matches("AIDX.*", &aid));
    }

    #[test]
    fn deny_takes_precedence_over_allow() {
        let filter = CapabilityFilter::new(
            vec!["AID.*".to_string()],
            vec!["AID.SHELL.v1".to_string()],
        );
        assert!(filter.permits(&Aid::new("AID.SCAN.v1")));
        assert!(!filter.permits(&Aid::new("AID.SHELL.v1")));
    }

    #[test]
    fn empty_filter_permits_everything() {
        let filter = CapabilityFilter::default();
        assert!(filter.permits(&Aid::new("AID.ANYTHING.v9")));
    }

    #[test]
    fn non_empty_allow_excludes_unlisted() {
        let filter = CapabilityFilter::new(vec!["AID.SCAN.v1".to_string()], vec![]);
        assert!(filter.permits(&Aid::new("AID.SCAN.v1")));
        assert!(!filter.permits(&Aid::new("AID.OTHER.v1")));
    }

    #[test]
    fn run_request_preserves_unknown_keys() {
        let raw = json!({
            "goal_id": "goal.ERROR_SCAN.v1",
            "inputs": {"input_path": "a.csv"},
            "control_mode": "Blended",
            "custom_field": {"nested": true}
        });
        let request: RunRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(request.goal_id.as_str(), "goal.ERROR_SCAN.v1");
        assert_eq!(request.control_mode, ControlMode::Blended);
        assert_eq!(request.extra["custom_field"], json!({"nested": true}));

        let back = serde_json::to_value(&request).unwrap();
        assert_eq!(back["custom_field"], json!({"nested": true}));
    }

    #[test]
    fn run_request_defaults_are_minimal() {
        let request: RunRequest =
            serde_json::from_value(json!({"goal_id": "goal.X.v1"})).unwrap();
        assert!(request.inputs.is_empty());
        assert_eq!(request.control_mode, ControlMode::FallbackOnly);
        assert!(request.candidate_tags.is_none());
        assert!(request.capability_filter.is_none());
    }
}
