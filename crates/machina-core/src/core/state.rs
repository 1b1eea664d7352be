// crates/machina-core/src/core/state.rs
// ============================================================================
// Module: Machina Working State
// Description: The fixed eight-slot artifact container and its digests.
// Purpose: Hold a run's working memory with deterministic identity.
// Dependencies: crate::core::{artifact, identifiers}, crate::hashing, serde
// ============================================================================

//! ## Overview
//! [`DsState`] is the agent's working memory: exactly eight named slots
//! `DS0..DS7`, each empty or holding one [`Artifact`]. Slots are addressed
//! only through [`SlotIndex`], so out-of-range access is unrepresentable.
//! Two digests are defined over a canonical serialization (ascending occupied
//! slots, RFC 8785 key order): `digest()` is SHA-256 hex for audit, and
//! `digest_fast()` is FNV-1a 64 for cheap same-run comparison. Equal states in
//! any in-memory representation produce equal digests.
//!
//! The state is not intrinsically concurrent; a single goal loop owns one
//! `DsState`, and mutation happens only through committed transactions.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::core::artifact::Artifact;
use crate::core::identifiers::SLOT_COUNT;
use crate::core::identifiers::SlotIndex;
use crate::hashing::HashError;
use crate::hashing::canonical_json_bytes;
use crate::hashing::fnv1a64;
use crate::hashing::sha256_hex;

// ============================================================================
// SECTION: Canonical Form
// ============================================================================

/// Canonical serialization of a state: occupied slots keyed by decimal index.
///
/// # Invariants
/// - Only occupied slots appear; keys are `"0".."7"` and sort ascending.
#[derive(Debug, Serialize)]
struct CanonicalState<'a> {
    /// Occupied slots in ascending index order.
    slots: BTreeMap<String, &'a Artifact>,
}

// ============================================================================
// SECTION: State
// ============================================================================

/// The eight-slot working state of a run.
///
/// # Invariants
/// - Exactly eight slots exist; [`SlotIndex`] confines addressing to `0..=7`.
/// - Mutation outside a committed transaction is a design error; the runner
///   only writes through [`crate::core::tx::Tx`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DsState {
    /// Slot contents, `None` where empty.
    slots: [Option<Artifact>; SLOT_COUNT as usize],
}

impl DsState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the artifact in a slot, if any.
    #[must_use]
    pub fn slot(&self, index: SlotIndex) -> Option<&Artifact> {
        self.slots[index.as_usize()].as_ref()
    }

    /// Returns whether a slot is occupied.
    #[must_use]
    pub fn is_occupied(&self, index: SlotIndex) -> bool {
        self.slots[index.as_usize()].is_some()
    }

    /// Sets or clears a slot.
    pub fn set_slot(&mut self, index: SlotIndex, value: Option<Artifact>) {
        self.slots[index.as_usize()] = value;
    }

    /// Returns the number of occupied slots.
    #[must_use]
    pub fn occupied_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Iterates occupied slots in ascending index order.
    pub fn occupied(&self) -> impl Iterator<Item = (SlotIndex, &Artifact)> {
        SlotIndex::all().filter_map(|index| self.slot(index).map(|artifact| (index, artifact)))
    }

    /// Serializes the state to its canonical byte form.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when canonicalization fails; artifact fields are
    /// plain strings and integers, so this only occurs on pathological input.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, HashError> {
        let slots: BTreeMap<String, &Artifact> = self
            .occupied()
            .map(|(index, artifact)| (index.get().to_string(), artifact))
            .collect();
        canonical_json_bytes(&CanonicalState {
            slots,
        })
    }

    /// Computes the SHA-256 hex digest over the canonical serialization.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when canonicalization fails.
    pub fn digest(&self) -> Result<String, HashError> {
        Ok(sha256_hex(&self.canonical_bytes()?))
    }

    /// Computes the FNV-1a 64 digest over the canonical serialization.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when canonicalization fails.
    pub fn digest_fast(&self) -> Result<u64, HashError> {
        Ok(fnv1a64(&self.canonical_bytes()?))
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

    /// Returns the slot index for a raw value, panicking on misuse in tests.
    fn slot(raw: u8) -> SlotIndex {
        SlotIndex::from_raw(raw).unwrap()
    }

    #[test]
    fn empty_state_has_stable_digest() {
        let a = DsState::new();
        let b = DsState::new();
        assert_eq!(a.digest().unwrap(), b.digest().unwrap());
        assert_eq!(a.digest_fast().unwrap(), b.digest_fast().unwrap());
    }

    #[test]
    fn digest_ignores_insertion_order() {
        let mut a = DsState::new();
        a.set_slot(slot(0), Some(Artifact::new("text", "{}", "p")));
        a.set_slot(slot(5), Some(Artifact::new("table", "{}", "q")));

        let mut b = DsState::new();
        b.set_slot(slot(5), Some(Artifact::new("table", "{}", "q")));
        b.set_slot(slot(0), Some(Artifact::new("text", "{}", "p")));

        assert_eq!(a.digest().unwrap(), b.digest().unwrap());
        assert_eq!(a.digest_fast().unwrap(), b.digest_fast().unwrap());
    }

    #[test]
    fn digest_changes_when_content_changes() {
        let mut a = DsState::new();
        a.set_slot(slot(3), Some(Artifact::new("text", r#"{"v":1}"#, "p")));
        let mut b = DsState::new();
        b.set_slot(slot(3), Some(Artifact::new("text", r#"{"v":2}"#, "p")));
        assert_ne!(a.digest().unwrap(), b.digest().unwrap());
    }

    #[test]
    fn empty_slots_are_excluded_from_canonical_form() {
        let mut occupied = DsState::new();
        occupied.set_slot(slot(2), Some(Artifact::new("text", "{}", "p")));
        occupied.set_slot(slot(2), None);
        assert_eq!(occupied.digest().unwrap(), DsState::new().digest().unwrap());
    }

    #[test]
    fn occupied_iterates_in_ascending_order() {
        let mut state = DsState::new();
        state.set_slot(slot(6), Some(Artifact::new("a", "{}", "p")));
        state.set_slot(slot(1), Some(Artifact::new("b", "{}", "p")));
        let indices: Vec<u8> = state.occupied().map(|(index, _)| index.get()).collect();
        assert_eq!(indices, vec![1, 6]);
    }
}
