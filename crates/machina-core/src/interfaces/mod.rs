// crates/machina-core/src/interfaces/mod.rs
// ============================================================================
// Module: Machina Interfaces
// Description: Trait seams between the goal loop, selectors, tools, and plugins.
// Purpose: Define the contract surfaces without embedding implementations.
// Dependencies: crate::core, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Interfaces define how the goal loop talks to decision sources and tool
//! invokers, and how plugins register tools through a host-owned registrar,
//! without either side holding concrete types of the other. Implementations
//! must be deterministic where their descriptors claim so and must fail
//! closed on missing or invalid data.
//!
//! Security posture: every value crossing these seams is untrusted; see
//! `Docs/security/threat_model.md`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::core::identifiers::Aid;
use crate::core::identifiers::Sid;
use crate::core::menu::Menu;
use crate::core::request::ControlMode;
use crate::core::tool::StepStatus;
use crate::core::tool::ToolDesc;
use crate::core::tx::Tx;

// ============================================================================
// SECTION: Selections
// ============================================================================

/// Parsed decision returned by a selector.
///
/// # Invariants
/// - `Pick.sid` refers to the menu the selector was shown; the runner
///   re-validates membership before dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Selection {
    /// Execute the tool at this SID, optionally patching runner inputs first.
    Pick {
        /// Menu-local selector index.
        sid: Sid,
        /// Shallow input overwrite applied before dispatch.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input_patch: Option<Map<String, Value>>,
    },
    /// Stop the loop and record a supervisor request in the state.
    AskSup,
    /// Stop the loop normally.
    Noop,
    /// Output could not be parsed; treated as an invalid pick.
    Invalid,
}

impl Selection {
    /// Returns the stable kind label used in audit payloads.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Pick {
                ..
            } => "pick",
            Self::AskSup => "ask_sup",
            Self::Noop => "noop",
            Self::Invalid => "invalid",
        }
    }
}

/// Which decision source produced a selection.
///
/// # Invariants
/// - Labels are stable for audit payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorSource {
    /// Deterministic heuristic fallback.
    Fallback,
    /// External policy process.
    Policy,
}

impl fmt::Display for SelectorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fallback => f.write_str("fallback"),
            Self::Policy => f.write_str("policy"),
        }
    }
}

/// Selection plus the evidence the runner audits alongside it.
///
/// # Invariants
/// - `raw_output` is the selector's unparsed output, capped by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionOutcome {
    /// Parsed selection.
    pub selection: Selection,
    /// Raw selector output for the audit trail.
    pub raw_output: String,
    /// Source that produced the decision.
    pub source: SelectorSource,
    /// Shadow output from the policy when running in shadow mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shadow_raw_output: Option<String>,
}

impl SelectionOutcome {
    /// Creates an outcome with no shadow output.
    #[must_use]
    pub const fn new(selection: Selection, raw_output: String, source: SelectorSource) -> Self {
        Self {
            selection,
            raw_output,
            source,
            shadow_raw_output: None,
        }
    }
}

/// Everything a decision source sees for one step.
///
/// # Invariants
/// - All fields are snapshots; sources must not mutate runner state.
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    /// Candidate menu for the step.
    pub menu: &'a Menu,
    /// Goal digest composed by the runner.
    pub goal_digest: &'a str,
    /// Working-state SHA-256 digest.
    pub state_digest: &'a str,
    /// Control mode of the run.
    pub control_mode: ControlMode,
    /// Current runner inputs.
    pub inputs: &'a Map<String, Value>,
}

/// A pluggable decision source.
pub trait DecisionSource: Send + Sync {
    /// Produces a selection for one step.
    ///
    /// Implementations must be total: failures are expressed as
    /// [`Selection::Invalid`] (with diagnostic raw output), never as panics.
    fn decide(&self, ctx: &SelectionContext<'_>) -> SelectionOutcome;
}

// ============================================================================
// SECTION: Tool Invocation
// ============================================================================

/// Result of one tool invocation.
///
/// # Invariants
/// - `error` is non-empty exactly when `status` is not [`StepStatus::Ok`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// Dispatch status.
    pub status: StepStatus,
    /// Tool output as a JSON-encoded string.
    pub output_json: String,
    /// Error description when the status is not OK.
    pub error: String,
}

impl ToolOutcome {
    /// Creates a successful outcome.
    #[must_use]
    pub fn ok(output_json: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Ok,
            output_json: output_json.into(),
            error: String::new(),
        }
    }

    /// Creates an invalid-pick outcome: the tool refused its inputs.
    #[must_use]
    pub fn invalid_pick(error: impl Into<String>) -> Self {
        Self {
            status: StepStatus::InvalidPick,
            output_json: "{}".to_string(),
            error: error.into(),
        }
    }

    /// Creates a tool-error outcome.
    #[must_use]
    pub fn tool_error(error: impl Into<String>) -> Self {
        Self {
            status: StepStatus::ToolError,
            output_json: "{}".to_string(),
            error: error.into(),
        }
    }
}

/// A tool body: reads inputs JSON and mutates the transaction's working copy.
pub trait ToolInvoker: Send + Sync {
    /// Runs the tool against the transaction's working state.
    ///
    /// The invoker mutates `tx.tmp_mut()` only; the runner commits or rolls
    /// back based on the returned status.
    fn invoke(&self, input_json: &str, tx: &mut Tx) -> ToolOutcome;
}

/// Read-only view of registered tools used by the replay engine.
pub trait ReplayToolSource {
    /// Returns the descriptor and invoker for an AID, if registered.
    fn replay_tool(&self, aid: &Aid) -> Option<(ToolDesc, Arc<dyn ToolInvoker>)>;
}

// ============================================================================
// SECTION: Tool Registration
// ============================================================================

/// Errors surfaced to registrants.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistrarError {
    /// AID already registered and override was not allowed.
    #[error("duplicate tool registration: {0}")]
    Duplicate(String),
    /// Registration rejected by host policy.
    #[error("registration rejected: {0}")]
    Rejected(String),
}

/// Host-owned registrar handed to plugins and builtin tool sets.
///
/// The registrar is the only surface a plugin sees: it never holds a pointer
/// to the registry itself, which keeps registry lifetime with the host.
pub trait ToolRegistrar {
    /// Registers a tool descriptor with its invoker.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrarError::Duplicate`] when the AID is taken and
    /// `allow_override` is false, or [`RegistrarError::Rejected`] when host
    /// policy refuses the registration.
    fn register_tool(
        &self,
        desc: ToolDesc,
        invoker: Arc<dyn ToolInvoker>,
        allow_override: bool,
    ) -> Result<(), RegistrarError>;
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
    fn selection_serializes_with_kind_tag() {
        let pick = Selection::Pick {
            sid: Sid::from_raw(3).unwrap(),
            input_patch: None,
        };
        let value = serde_json::to_value(&pick).unwrap();
        assert_eq!(value["kind"], "pick");
        assert_eq!(value["sid"], 3);
        assert!(value.get("input_patch").is_none());
    }

    #[test]
    fn selection_kind_labels_are_stable() {
        assert_eq!(Selection::Noop.kind(), "noop");
        assert_eq!(Selection::AskSup.kind(), "ask_sup");
        assert_eq!(Selection::Invalid.kind(), "invalid");
    }

    #[test]
    fn tool_outcome_constructors_pair_status_and_error() {
        let ok = ToolOutcome::ok(r#"{"rows":1}"#);
        assert_eq!(ok.status, StepStatus::Ok);
        assert!(ok.error.is_empty());

        let err = ToolOutcome::tool_error("disk full");
        assert_eq!(err.status, StepStatus::ToolError);
        assert_eq!(err.error, "disk full");
    }
}
