// crates/machina-toolhost/src/protocol.rs
// ============================================================================
// Module: Toolhost Protocol
// Description: Stable NDJSON request/response shapes.
// Purpose: Fix the wire contract between runner and tool host.
// Dependencies: machina-core, serde, serde_json
// ============================================================================

//! ## Overview
//! One request names a tool, optional inputs (a JSON-encoded object string,
//! default `{}`), an optional state snapshot or delta, an optional
//! idempotency key, and an optional lease token. One response reports
//! `ok`, the dispatch status, output, error, the full post-dispatch state,
//! and whether the idempotency cache answered. Both shapes are stable wire
//! contracts; unknown request fields are ignored rather than rejected.

// ============================================================================
// SECTION: Imports
// ============================================================================

use machina_core::Aid;
use machina_core::Artifact;
use machina_core::DsState;
use machina_core::SlotIndex;
use machina_core::StepStatus;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

// ============================================================================
// SECTION: Requests
// ============================================================================

/// One tool-execution request.
///
/// # Invariants
/// - `ds_state`, when present, is a JSON object: a full snapshot keyed by
///   slot index, or a delta carrying `"delta": true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRequest {
    /// Tool to execute.
    pub aid: Aid,
    /// JSON-encoded input object; defaults to `{}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_json: Option<String>,
    /// Full state snapshot or `"delta": true` partial update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ds_state: Option<Map<String, Value>>,
    /// Retry-deduplication key, scoped per AID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Lease token for tiered tools.
    #[serde(default, rename = "_lease_token", skip_serializing_if = "Option::is_none")]
    pub lease_token: Option<String>,
}

impl HostRequest {
    /// Creates a minimal request for a tool.
    #[must_use]
    pub fn new(aid: impl Into<Aid>) -> Self {
        Self {
            aid: aid.into(),
            input_json: None,
            ds_state: None,
            idempotency_key: None,
            lease_token: None,
        }
    }

    /// Returns the effective input JSON (default `{}`).
    #[must_use]
    pub fn effective_input(&self) -> &str {
        self.input_json.as_deref().unwrap_or("{}")
    }
}

// ============================================================================
// SECTION: Responses
// ============================================================================

/// One tool-execution response.
///
/// # Invariants
/// - `ok` is true exactly when `status` is `OK`.
/// - `ds_state` is the full post-dispatch snapshot keyed by slot index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostResponse {
    /// Whether the dispatch succeeded.
    pub ok: bool,
    /// Dispatch status.
    pub status: StepStatus,
    /// Tool output as a JSON-encoded string.
    pub output_json: String,
    /// Error description when not OK.
    pub error: String,
    /// Full post-dispatch state snapshot.
    pub ds_state: Map<String, Value>,
    /// Present and true when the idempotency cache answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotent_hit: Option<bool>,
}

impl HostResponse {
    /// Builds a failure response around an unchanged state.
    #[must_use]
    pub fn failure(status: StepStatus, error: impl Into<String>, state: &DsState) -> Self {
        Self {
            ok: false,
            status,
            output_json: "{}".to_string(),
            error: error.into(),
            ds_state: encode_state(state),
            idempotent_hit: None,
        }
    }
}

// ============================================================================
// SECTION: State Encoding
// ============================================================================

/// Encodes a state as the protocol's slot-indexed object.
#[must_use]
pub fn encode_state(state: &DsState) -> Map<String, Value> {
    let mut map = Map::new();
    for (index, artifact) in state.occupied() {
        if let Ok(value) = serde_json::to_value(artifact) {
            map.insert(index.get().to_string(), value);
        }
    }
    map
}

/// Decodes a request state object onto a base state.
///
/// A full snapshot replaces every slot; a `"delta": true` object only
/// touches the slots it names (`null` clears a slot).
///
/// # Errors
///
/// Returns a description of the first malformed slot key or artifact.
pub fn decode_state_onto(
    base: &mut DsState,
    object: &Map<String, Value>,
) -> Result<(), String> {
    let is_delta = object.get("delta").and_then(Value::as_bool).unwrap_or(false);
    if !is_delta {
        *base = DsState::new();
    }
    for (key, value) in object {
        if key == "delta" {
            continue;
        }
        let index = key
            .parse::<u8>()
            .ok()
            .and_then(SlotIndex::from_raw)
            .ok_or_else(|| format!("invalid slot key: {key}"))?;
        if value.is_null() {
            base.set_slot(index, None);
            continue;
        }
        let artifact: Artifact = serde_json::from_value(value.clone())
            .map_err(|err| format!("invalid artifact in slot {key}: {err}"))?;
        base.set_slot(index, Some(artifact));
    }
    Ok(())
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
    fn request_defaults_are_minimal() {
        let request: HostRequest =
            serde_json::from_value(json!({"aid": "AID.X.v1"})).unwrap();
        assert_eq!(request.effective_input(), "{}");
        assert!(request.ds_state.is_none());
        assert!(request.lease_token.is_none());
    }

    #[test]
    fn lease_token_uses_reserved_wire_name() {
        let request: HostRequest =
            serde_json::from_value(json!({"aid": "AID.X.v1", "_lease_token": "deadbeef"}))
                .unwrap();
        assert_eq!(request.lease_token.as_deref(), Some("deadbeef"));
        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(wire["_lease_token"], "deadbeef");
    }

    #[test]
    fn state_round_trips_through_encoding() {
        let mut state = DsState::new();
        state.set_slot(SlotIndex::DS1, Some(Artifact::new("text", "{}", "p")));
        let encoded = encode_state(&state);

        let mut decoded = DsState::new();
        decode_state_onto(&mut decoded, &encoded).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn snapshot_replaces_and_delta_merges() {
        let mut state = DsState::new();
        state.set_slot(SlotIndex::DS0, Some(Artifact::new("text", "{}", "old")));

        // Full snapshot naming only slot 1 clears slot 0.
        let snapshot: Map<String, Value> = serde_json::from_value(json!({
            "1": {"kind": "text", "content_json": "{}", "provenance": "new", "size_bytes": 2}
        }))
        .unwrap();
        decode_state_onto(&mut state, &snapshot).unwrap();
        assert!(!state.is_occupied(SlotIndex::DS0));
        assert!(state.is_occupied(SlotIndex::DS1));

        // Delta naming only slot 0 leaves slot 1 alone.
        let delta: Map<String, Value> = serde_json::from_value(json!({
            "delta": true,
            "0": {"kind": "text", "content_json": "{}", "provenance": "d", "size_bytes": 2}
        }))
        .unwrap();
        decode_state_onto(&mut state, &delta).unwrap();
        assert!(state.is_occupied(SlotIndex::DS0));
        assert!(state.is_occupied(SlotIndex::DS1));
    }

    #[test]
    fn delta_null_clears_a_slot() {
        let mut state = DsState::new();
        state.set_slot(SlotIndex::DS0, Some(Artifact::new("text", "{}", "p")));
        let delta: Map<String, Value> =
            serde_json::from_value(json!({"delta": true, "0": null})).unwrap();
        decode_state_onto(&mut state, &delta).unwrap();
        assert_eq!(state.occupied_count(), 0);
    }

    #[test]
    fn malformed_slot_keys_are_rejected() {
        let mut state = DsState::new();
        let bad: Map<String, Value> =
            serde_json::from_value(json!({"8": null})).unwrap();
        assert!(decode_state_onto(&mut state, &bad).is_err());
        let worse: Map<String, Value> =
            serde_json::from_value(json!({"zero": null})).unwrap();
        assert!(decode_state_onto(&mut state, &worse).is_err());
    }
}
