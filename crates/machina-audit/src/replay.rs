// crates/machina-audit/src/replay.rs
// ============================================================================
// Module: Strict Replay Engine
// Description: Reconstructs a run's state sequence from its audit log.
// Purpose: Prove a recorded run replays to the same states, or say where not.
// Dependencies: machina-core, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Strict replay walks a verified event sequence and rebuilds the working
//! state step by step. Tools that are deterministic with no replay fences are
//! re-executed and their produced patch must equal the logged patch
//! byte-for-byte in canonical form; every other tool replays by applying the
//! logged `tx_patch` directly. Input patches are replayed from
//! `inputs_patched` events in order. Any malformed patch operation fails the
//! replay immediately, identifying the offending step — corruption is never
//! silently repaired.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use machina_core::Aid;
use machina_core::AuditEvent;
use machina_core::DsState;
use machina_core::EventKind;
use machina_core::PatchApplyError;
pub use machina_core::ReplayToolSource;
use machina_core::StepStatus;
use machina_core::ToolInvoker;
use machina_core::Tx;
use machina_core::TxPatch;
use machina_core::apply_patch;
use machina_core::hashing::canonical_json_bytes;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::verify::count_chain_link_errors;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Reserved input key carrying lease tokens; stripped before dispatch.
const LEASE_TOKEN_KEY: &str = "_lease_token";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors that fail a strict replay.
///
/// # Invariants
/// - Every variant identifies the offending step where one exists.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The log's chain did not verify; replay refuses to proceed.
    #[error("REPLAY_STRICT FAIL: chain broken ({errors} link errors)")]
    ChainBroken {
        /// Number of chain-link errors found.
        errors: u64,
    },
    /// A dispatch payload is missing a required field.
    #[error("REPLAY_STRICT FAIL step {step}: payload missing field {field}")]
    MissingPayloadField {
        /// Offending step number.
        step: u64,
        /// Missing field name.
        field: &'static str,
    },
    /// A logged patch could not be parsed (bad op, path, or value).
    #[error("REPLAY_STRICT FAIL step {step}: malformed tx_patch: {detail}")]
    MalformedPatch {
        /// Offending step number.
        step: u64,
        /// Parse failure detail, naming the offending op or path.
        detail: String,
    },
    /// A logged patch was inconsistent with the reconstructed state.
    #[error("REPLAY_STRICT FAIL step {step}: {source}")]
    PatchApply {
        /// Offending step number.
        step: u64,
        /// Underlying apply failure, naming the offending op and path.
        #[source]
        source: PatchApplyError,
    },
    /// An `inputs_patched` payload was malformed.
    #[error("REPLAY_STRICT FAIL step {step}: malformed inputs patch: {detail}")]
    MalformedInputsPatch {
        /// Offending step number.
        step: u64,
        /// Failure detail.
        detail: String,
    },
    /// Re-execution of a deterministic tool failed.
    #[error("REPLAY_STRICT FAIL step {step}: re-execution of {aid} failed: {detail}")]
    Reexecution {
        /// Offending step number.
        step: u64,
        /// Tool that failed to re-execute.
        aid: Aid,
        /// Failure detail.
        detail: String,
    },
    /// Re-execution produced a patch different from the logged one.
    #[error("REPLAY_STRICT FAIL step {step}: patch mismatch for {aid}")]
    PatchMismatch {
        /// Offending step number.
        step: u64,
        /// Tool whose patch diverged.
        aid: Aid,
    },
}

// ============================================================================
// SECTION: Outcome
// ============================================================================

/// Result of a successful strict replay.
///
/// # Invariants
/// - `states[i]` is the working state after the i-th applied `tool_ok`.
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    /// State snapshots after each applied dispatch.
    pub states: Vec<DsState>,
    /// Final reconstructed state.
    pub final_state: DsState,
    /// Number of `tool_ok` events replayed by applying logged patches.
    pub steps_applied: u64,
    /// Number of `tool_ok` events replayed by re-execution.
    pub steps_reexecuted: u64,
}

// ============================================================================
// SECTION: Strict Replay
// ============================================================================

/// Strictly replays a run from its event sequence.
///
/// # Errors
///
/// Returns [`ReplayError`] identifying the offending step on the first
/// inconsistency; the partial state is discarded.
pub fn replay_strict(
    events: &[AuditEvent],
    initial_inputs: &Map<String, Value>,
    tools: &dyn ReplayToolSource,
) -> Result<ReplayOutcome, ReplayError> {
    let link_errors = count_chain_link_errors(events);
    if link_errors > 0 {
        return Err(ReplayError::ChainBroken {
            errors: link_errors,
        });
    }

    let mut inputs = initial_inputs.clone();
    let mut state = DsState::new();
    let mut states = Vec::new();
    let mut steps_applied = 0_u64;
    let mut steps_reexecuted = 0_u64;

    for event in events {
        match event.event {
            EventKind::InputsPatched => {
                apply_inputs_patch(&mut inputs, event)?;
            }
            EventKind::ToolOk => {
                let aid = payload_str(event, "aid")?;
                let aid = Aid::new(aid);
                let logged_patch = parse_logged_patch(event)?;

                let reexecutable = tools
                    .replay_tool(&aid)
                    .filter(|(desc, _)| desc.replay_reexecutable());
                if let Some((_, invoker)) = reexecutable {
                    state = reexecute(event.step, &aid, &invoker, &inputs, &state, &logged_patch)?;
                    steps_reexecuted += 1;
                } else {
                    state = apply_patch(&state, &logged_patch).map_err(|source| {
                        ReplayError::PatchApply {
                            step: event.step,
                            source,
                        }
                    })?;
                    steps_applied += 1;
                }
                states.push(state.clone());
            }
            _ => {}
        }
    }

    Ok(ReplayOutcome {
        states,
        final_state: state,
        steps_applied,
        steps_reexecuted,
    })
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Extracts a required string field from a dispatch payload.
fn payload_str<'a>(event: &'a AuditEvent, field: &'static str) -> Result<&'a str, ReplayError> {
    event.payload.get(field).and_then(Value::as_str).ok_or(ReplayError::MissingPayloadField {
        step: event.step,
        field,
    })
}

/// Parses the logged `tx_patch`, surfacing the offending step on failure.
fn parse_logged_patch(event: &AuditEvent) -> Result<TxPatch, ReplayError> {
    let raw = event.payload.get("tx_patch").ok_or(ReplayError::MissingPayloadField {
        step: event.step,
        field: "tx_patch",
    })?;
    serde_json::from_value(raw.clone()).map_err(|err| ReplayError::MalformedPatch {
        step: event.step,
        detail: err.to_string(),
    })
}

/// Merges a recorded inputs patch, shallow key-by-key.
fn apply_inputs_patch(
    inputs: &mut Map<String, Value>,
    event: &AuditEvent,
) -> Result<(), ReplayError> {
    let patch = event
        .payload
        .get("patch")
        .and_then(Value::as_object)
        .ok_or(ReplayError::MalformedInputsPatch {
            step: event.step,
            detail: "payload.patch is not an object".to_string(),
        })?;
    for (key, value) in patch {
        inputs.insert(key.clone(), value.clone());
    }
    Ok(())
}

/// Re-executes a deterministic tool and verifies its patch against the log.
fn reexecute(
    step: u64,
    aid: &Aid,
    invoker: &Arc<dyn ToolInvoker>,
    inputs: &Map<String, Value>,
    state: &DsState,
    logged_patch: &TxPatch,
) -> Result<DsState, ReplayError> {
    let mut dispatch_inputs = inputs.clone();
    dispatch_inputs.remove(LEASE_TOKEN_KEY);
    let input_json =
        serde_json::to_string(&dispatch_inputs).map_err(|err| ReplayError::Reexecution {
            step,
            aid: aid.clone(),
            detail: err.to_string(),
        })?;

    let mut tx = Tx::begin(state);
    let outcome = invoker.invoke(&input_json, &mut tx);
    if outcome.status != StepStatus::Ok {
        return Err(ReplayError::Reexecution {
            step,
            aid: aid.clone(),
            detail: format!("status {}: {}", outcome.status, outcome.error),
        });
    }
    let mut target = state.clone();
    let produced = tx.commit(&mut target);

    let produced_bytes = canonical_json_bytes(&produced);
    let logged_bytes = canonical_json_bytes(logged_patch);
    match (produced_bytes, logged_bytes) {
        (Ok(produced), Ok(logged)) if produced == logged => Ok(target),
        _ => Err(ReplayError::PatchMismatch {
            step,
            aid: aid.clone(),
        }),
    }
}

// ============================================================================
// SECTION: Unit Tests
// ============================================================================
