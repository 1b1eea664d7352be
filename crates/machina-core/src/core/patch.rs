// crates/machina-core/src/core/patch.rs
// ============================================================================
// Module: Machina Transaction Patches
// Description: JSON-patch delta format over the eight working-state slots.
// Purpose: Describe commit deltas for audit and reapply them during replay.
// Dependencies: crate::core::{artifact, identifiers, state}, serde, thiserror
// ============================================================================

//! ## Overview
//! A [`TxPatch`] is the ordered list of operations that transforms a base
//! state into a committed state: `add` for a slot that was empty, `replace`
//! for a slot whose artifact changed, `remove` for a slot that was cleared.
//! Paths are confined to `/slots/0..7` by construction — [`SlotPath`] refuses
//! to deserialize anything else — so a malformed logged patch fails at parse
//! time rather than corrupting a replayed state. Operations are emitted and
//! applied in ascending slot order.
//!
//! Security posture: patches read back from audit logs are untrusted; apply
//! fails closed on any inconsistency. See `Docs/security/threat_model.md`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde::de::Error as DeError;
use thiserror::Error;

use crate::core::artifact::Artifact;
use crate::core::identifiers::SlotIndex;
use crate::core::state::DsState;

// ============================================================================
// SECTION: Slot Paths
// ============================================================================

/// Validated patch path of the form `/slots/<k>` with `k` in `0..=7`.
///
/// # Invariants
/// - Wraps a [`SlotIndex`]; no path outside `/slots/0..7` can exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotPath(SlotIndex);

impl SlotPath {
    /// Creates a path for a slot index.
    #[must_use]
    pub const fn new(index: SlotIndex) -> Self {
        Self(index)
    }

    /// Returns the slot index addressed by this path.
    #[must_use]
    pub const fn index(self) -> SlotIndex {
        self.0
    }

    /// Parses a `/slots/<k>` path (returns `None` outside `/slots/0..7`).
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let digits = text.strip_prefix("/slots/")?;
        if digits.len() != 1 {
            return None;
        }
        let raw: u8 = digits.parse().ok()?;
        SlotIndex::from_raw(raw).map(Self)
    }
}

impl fmt::Display for SlotPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/slots/{}", self.0.get())
    }
}

impl Serialize for SlotPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SlotPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).ok_or_else(|| DeError::custom(format!("invalid slot path: {text}")))
    }
}

// ============================================================================
// SECTION: Patch Operations
// ============================================================================

/// One slot mutation within a transaction patch.
///
/// # Invariants
/// - `add` targets a slot empty in the base; `replace` and `remove` target an
///   occupied slot. [`apply_patch`] enforces this fail-closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    /// Slot was empty in the base and occupied in the committed state.
    Add {
        /// Target slot path.
        path: SlotPath,
        /// Artifact now occupying the slot.
        value: Artifact,
    },
    /// Slot was occupied in both states with different content.
    Replace {
        /// Target slot path.
        path: SlotPath,
        /// Artifact now occupying the slot.
        value: Artifact,
    },
    /// Slot was occupied in the base and empty in the committed state.
    Remove {
        /// Target slot path.
        path: SlotPath,
    },
}

impl PatchOp {
    /// Returns the slot path targeted by this operation.
    #[must_use]
    pub const fn path(&self) -> SlotPath {
        match self {
            Self::Add {
                path, ..
            }
            | Self::Replace {
                path, ..
            }
            | Self::Remove {
                path,
            } => *path,
        }
    }
}

/// Ordered list of patch operations describing one commit delta.
///
/// # Invariants
/// - Operations are ordered by ascending slot index when produced by
///   [`compute_patch`]; order is preserved on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxPatch(Vec<PatchOp>);

impl TxPatch {
    /// Creates a patch from pre-ordered operations.
    #[must_use]
    pub const fn new(ops: Vec<PatchOp>) -> Self {
        Self(ops)
    }

    /// Returns the operations in order.
    #[must_use]
    pub fn ops(&self) -> &[PatchOp] {
        &self.0
    }

    /// Returns whether the patch contains no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

// ============================================================================
// SECTION: Patch Computation
// ============================================================================

/// Computes the delta from `base` to `tmp` in ascending slot order.
#[must_use]
pub fn compute_patch(base: &DsState, tmp: &DsState) -> TxPatch {
    let mut ops = Vec::new();
    for index in SlotIndex::all() {
        let path = SlotPath::new(index);
        match (base.slot(index), tmp.slot(index)) {
            (None, Some(value)) => ops.push(PatchOp::Add {
                path,
                value: value.clone(),
            }),
            (Some(before), Some(after)) if before != after => ops.push(PatchOp::Replace {
                path,
                value: after.clone(),
            }),
            (Some(_), None) => ops.push(PatchOp::Remove {
                path,
            }),
            _ => {}
        }
    }
    TxPatch::new(ops)
}

// ============================================================================
// SECTION: Patch Application
// ============================================================================

/// Errors raised while applying a patch to a base state.
///
/// # Invariants
/// - `op_index` identifies the offending operation within the patch.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchApplyError {
    /// `add` targeted a slot that is already occupied.
    #[error("patch op {op_index}: add to occupied slot {path}")]
    AddToOccupied {
        /// Index of the offending operation.
        op_index: usize,
        /// Path of the offending operation.
        path: SlotPath,
    },
    /// `replace` targeted an empty slot.
    #[error("patch op {op_index}: replace of empty slot {path}")]
    ReplaceEmpty {
        /// Index of the offending operation.
        op_index: usize,
        /// Path of the offending operation.
        path: SlotPath,
    },
    /// `remove` targeted an empty slot.
    #[error("patch op {op_index}: remove of empty slot {path}")]
    RemoveEmpty {
        /// Index of the offending operation.
        op_index: usize,
        /// Path of the offending operation.
        path: SlotPath,
    },
}

/// Applies a patch to a base state, producing the patched state.
///
/// # Errors
///
/// Returns [`PatchApplyError`] when an operation is inconsistent with the
/// base state; the base is never partially mutated on failure.
pub fn apply_patch(base: &DsState, patch: &TxPatch) -> Result<DsState, PatchApplyError> {
    let mut next = base.clone();
    for (op_index, op) in patch.ops().iter().enumerate() {
        let path = op.path();
        let index = path.index();
        match op {
            PatchOp::Add {
                value, ..
            } => {
                if next.is_occupied(index) {
                    return Err(PatchApplyError::AddToOccupied {
                        op_index,
                        path,
                    });
                }
                next.set_slot(index, Some(value.clone()));
            }
            PatchOp::Replace {
                value, ..
            } => {
                if !next.is_occupied(index) {
                    return Err(PatchApplyError::ReplaceEmpty {
                        op_index,
                        path,
                    });
                }
                next.set_slot(index, Some(value.clone()));
            }
            PatchOp::Remove {
                ..
            } => {
                if !next.is_occupied(index) {
                    return Err(PatchApplyError::RemoveEmpty {
                        op_index,
                        path,
                    });
                }
                next.set_slot(index, None);
            }
        }
    }
    Ok(next)
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

    /// Returns the slot index for a raw value, panicking on misuse in tests.
    fn slot(raw: u8) -> SlotIndex {
        SlotIndex::from_raw(raw).unwrap()
    }

    #[test]
    fn slot_path_round_trips_wire_form() {
        let path = SlotPath::new(slot(4));
        assert_eq!(path.to_string(), "/slots/4");
        assert_eq!(SlotPath::parse("/slots/4"), Some(path));
    }

    #[test]
    fn slot_path_rejects_out_of_range_and_noise() {
        assert_eq!(SlotPath::parse("/slots/8"), None);
        assert_eq!(SlotPath::parse("/slots/12"), None);
        assert_eq!(SlotPath::parse("/slots/"), None);
        assert_eq!(SlotPath::parse("/slot/1"), None);
        assert_eq!(SlotPath::parse("slots/1"), None);
    }

    #[test]
    fn slot_path_deserialization_fails_closed() {
        let err = serde_json::from_str::<SlotPath>(r#""/slots/9""#);
        assert!(err.is_err());
    }

    #[test]
    fn patch_op_serializes_to_spec_shape() {
        let op = PatchOp::Add {
            path: SlotPath::new(slot(0)),
            value: Artifact::new("text", "{}", "p"),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "add");
        assert_eq!(json["path"], "/slots/0");
        assert_eq!(json["value"]["kind"], "text");
    }

    #[test]
    fn compute_patch_emits_ascending_slot_order() {
        let base = DsState::new();
        let mut tmp = DsState::new();
        tmp.set_slot(slot(6), Some(Artifact::new("b", "{}", "p")));
        tmp.set_slot(slot(1), Some(Artifact::new("a", "{}", "p")));

        let patch = compute_patch(&base, &tmp);
        let indices: Vec<u8> = patch.ops().iter().map(|op| op.path().index().get()).collect();
        assert_eq!(indices, vec![1, 6]);
    }

    #[test]
    fn compute_patch_covers_add_replace_remove() {
        let mut base = DsState::new();
        base.set_slot(slot(1), Some(Artifact::new("a", r#"{"v":1}"#, "p")));
        base.set_slot(slot(2), Some(Artifact::new("b", "{}", "p")));

        let mut tmp = DsState::new();
        tmp.set_slot(slot(0), Some(Artifact::new("c", "{}", "p")));
        tmp.set_slot(slot(1), Some(Artifact::new("a", r#"{"v":2}"#, "p")));

        let patch = compute_patch(&base, &tmp);
        assert_eq!(patch.len(), 3);
        assert!(matches!(patch.ops()[0], PatchOp::Add { .. }));
        assert!(matches!(patch.ops()[1], PatchOp::Replace { .. }));
        assert!(matches!(patch.ops()[2], PatchOp::Remove { .. }));
    }

    #[test]
    fn unchanged_slots_produce_no_ops() {
        let mut base = DsState::new();
        base.set_slot(slot(3), Some(Artifact::new("a", "{}", "p")));
        let patch = compute_patch(&base, &base.clone());
        assert!(patch.is_empty());
    }

    #[test]
    fn apply_patch_round_trips_compute_patch() {
        let mut base = DsState::new();
        base.set_slot(slot(2), Some(Artifact::new("a", r#"{"v":1}"#, "p")));
        base.set_slot(slot(5), Some(Artifact::new("b", "{}", "p")));

        let mut tmp = DsState::new();
        tmp.set_slot(slot(2), Some(Artifact::new("a", r#"{"v":2}"#, "p")));
        tmp.set_slot(slot(7), Some(Artifact::new("c", "{}", "p")));

        let patch = compute_patch(&base, &tmp);
        let applied = apply_patch(&base, &patch).unwrap();
        assert_eq!(applied, tmp);
    }

    #[test]
    fn apply_patch_rejects_add_to_occupied() {
        let mut base = DsState::new();
        base.set_slot(slot(0), Some(Artifact::new("a", "{}", "p")));
        let patch = TxPatch::new(vec![PatchOp::Add {
            path: SlotPath::new(slot(0)),
            value: Artifact::new("b", "{}", "p"),
        }]);
        assert_eq!(
            apply_patch(&base, &patch),
            Err(PatchApplyError::AddToOccupied {
                op_index: 0,
                path: SlotPath::new(slot(0)),
            })
        );
    }

    #[test]
    fn apply_patch_rejects_remove_of_empty() {
        let patch = TxPatch::new(vec![PatchOp::Remove {
            path: SlotPath::new(slot(3)),
        }]);
        assert_eq!(
            apply_patch(&DsState::new(), &patch),
            Err(PatchApplyError::RemoveEmpty {
                op_index: 0,
                path: SlotPath::new(slot(3)),
            })
        );
    }
}
