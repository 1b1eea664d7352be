// crates/machina-core/src/core/events.rs
// ============================================================================
// Module: Machina Audit Events
// Description: Hash-chained audit event model for one run.
// Purpose: Define the event shapes and chain rule the audit log records.
// Dependencies: crate::core::{identifiers, time}, crate::hashing, serde, serde_json
// ============================================================================

//! ## Overview
//! Every observable step of a run is an [`AuditEvent`]: a JSON object with
//! run header fields, a step number, an event name, a millisecond timestamp,
//! a payload, and two chain fields. The chain rule is
//! `chain_hash = SHA256(chain_prev || canonical_json(event_without_chain_fields))`,
//! with `chain_prev = ""` on the first event of a run. Any single-byte edit
//! of a recorded line breaks at least one link.
//!
//! Security posture: events read back from disk are untrusted until their
//! chain verifies; see `Docs/security/threat_model.md`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::ProfileId;
use crate::core::identifiers::RequestId;
use crate::core::identifiers::RunId;
use crate::core::time::Timestamp;
use crate::hashing::HashError;
use crate::hashing::canonical_json_bytes;
use crate::hashing::sha256_hex;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Audit format version stamped on every event.
pub const SPEC_VERSION: &str = "1.0";

// ============================================================================
// SECTION: Event Names
// ============================================================================

/// Stable audit event names, in the order a step emits them.
///
/// # Invariants
/// - Wire strings are the snake_case variant names and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Run accepted; header recorded.
    RunStart,
    /// Menu constructed for a step.
    MenuBuilt,
    /// Selector called with menu and digests.
    SelectorInvoked,
    /// Selector output parsed.
    SelectorChosen,
    /// Selector input patch merged into runner inputs.
    InputsPatched,
    /// Lease token issued for a tiered tool.
    LeaseIssued,
    /// Lease token verified and consumed.
    LeaseConsumed,
    /// Tool dispatch started.
    ToolInvoked,
    /// Tool committed; payload carries the transaction patch.
    ToolOk,
    /// Tool failed or was refused; transaction rolled back.
    ToolError,
    /// Selector output rejected; counted against the pick budget.
    InvalidPick,
    /// Goal satisfied (or terminal selection); run ended OK.
    GoalDone,
    /// Budget or loop guard exhausted; run terminated.
    BreakerTrip,
}

impl EventKind {
    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RunStart => "run_start",
            Self::MenuBuilt => "menu_built",
            Self::SelectorInvoked => "selector_invoked",
            Self::SelectorChosen => "selector_chosen",
            Self::InputsPatched => "inputs_patched",
            Self::LeaseIssued => "lease_issued",
            Self::LeaseConsumed => "lease_consumed",
            Self::ToolInvoked => "tool_invoked",
            Self::ToolOk => "tool_ok",
            Self::ToolError => "tool_error",
            Self::InvalidPick => "invalid_pick",
            Self::GoalDone => "goal_done",
            Self::BreakerTrip => "breaker_trip",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Run Header
// ============================================================================

/// Identity fields stamped on every event of a run.
///
/// # Invariants
/// - `run_id` is unique per run; `request_id` is caller-controlled and
///   optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHeader {
    /// Audit format version.
    pub spec_version: String,
    /// Deployment profile identifier.
    pub profile_id: ProfileId,
    /// Run identifier.
    pub run_id: RunId,
    /// Caller-supplied tracing identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
}

impl RunHeader {
    /// Creates a header for a run under the current audit format version.
    #[must_use]
    pub fn new(profile_id: ProfileId, run_id: RunId, request_id: Option<RequestId>) -> Self {
        Self {
            spec_version: SPEC_VERSION.to_string(),
            profile_id,
            run_id,
            request_id,
        }
    }
}

// ============================================================================
// SECTION: Audit Events
// ============================================================================

/// One hash-chained audit record.
///
/// # Invariants
/// - `chain_hash` covers every field except the two chain fields.
/// - Events are immutable once chained; mutation invalidates the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Audit format version.
    pub spec_version: String,
    /// Deployment profile identifier.
    pub profile_id: ProfileId,
    /// Run identifier.
    pub run_id: RunId,
    /// Caller-supplied tracing identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    /// Step number the event belongs to.
    pub step: u64,
    /// Event name.
    pub event: EventKind,
    /// Unix-epoch millisecond timestamp.
    pub ts: Timestamp,
    /// `chain_hash` of the previous event; empty on the first event.
    pub chain_prev: String,
    /// SHA-256 chain link over `chain_prev` and this event's content.
    pub chain_hash: String,
    /// Event payload.
    pub payload: Value,
}

impl AuditEvent {
    /// Creates an event with empty chain fields, ready for chaining.
    #[must_use]
    pub fn unchained(
        header: &RunHeader,
        step: u64,
        event: EventKind,
        ts: Timestamp,
        payload: Value,
    ) -> Self {
        Self {
            spec_version: header.spec_version.clone(),
            profile_id: header.profile_id.clone(),
            run_id: header.run_id.clone(),
            request_id: header.request_id.clone(),
            step,
            event,
            ts,
            chain_prev: String::new(),
            chain_hash: String::new(),
            payload,
        }
    }

    /// Fills the chain fields given the previous event's `chain_hash`.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when the event payload cannot be canonicalized.
    pub fn into_chained(mut self, chain_prev: String) -> Result<Self, HashError> {
        self.chain_prev = chain_prev;
        self.chain_hash = compute_chain_hash(&self.chain_prev, &self)?;
        Ok(self)
    }
}

/// Computes the chain hash for an event given its predecessor's hash.
///
/// The hash covers `chain_prev` concatenated with the RFC 8785 canonical
/// JSON of the event with both chain fields removed, so the recorded
/// `chain_hash` field never feeds its own computation.
///
/// # Errors
///
/// Returns [`HashError`] when the event cannot be canonicalized.
pub fn compute_chain_hash(chain_prev: &str, event: &AuditEvent) -> Result<String, HashError> {
    let mut value = serde_json::to_value(event)
        .map_err(|err| HashError::Canonicalization(err.to_string()))?;
    if let Value::Object(map) = &mut value {
        map.remove("chain_prev");
        map.remove("chain_hash");
    }
    let canonical = canonical_json_bytes(&value)?;
    let mut buffer = Vec::with_capacity(chain_prev.len() + canonical.len());
    buffer.extend_from_slice(chain_prev.as_bytes());
    buffer.extend_from_slice(&canonical);
    Ok(sha256_hex(&buffer))
}

// ============================================================================
// SECTION: Unit Tests
// ============================================================================
