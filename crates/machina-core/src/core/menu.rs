// crates/machina-core/src/core/menu.rs
// ============================================================================
// Module: Machina Step Menus
// Description: Per-step ordered candidate tool lists with SID addressing.
// Purpose: Give the selector a compact, digestible view of available tools.
// Dependencies: crate::core::identifiers, crate::hashing, serde
// ============================================================================

//! ## Overview
//! A [`Menu`] is the ordered list of [`MenuItem`]s offered to the selector on
//! one step. SIDs are assigned `SID0001..SIDnnnn` in item order and resolve
//! back to items through an index map. Menus carry the same two digests as the
//! working state (SHA-256 hex and FNV-1a 64 over a canonical serialization),
//! so the runner can detect selector/menu drift and feed the loop guard.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::Aid;
use crate::core::identifiers::Sid;
use crate::hashing::HashError;
use crate::hashing::canonical_json_bytes;
use crate::hashing::fnv1a64;
use crate::hashing::sha256_hex;

// ============================================================================
// SECTION: Menu Items
// ============================================================================

/// One candidate tool offered to the selector.
///
/// # Invariants
/// - `sid` is unique within its menu and renders as `SIDdddd` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItem {
    /// Menu-local selector index.
    pub sid: Sid,
    /// Stable action identifier of the tool.
    pub aid: Aid,
    /// Display name of the tool.
    pub name: String,
    /// Tag list used for goal/tool matching.
    pub tags: Vec<String>,
}

// ============================================================================
// SECTION: Menu
// ============================================================================

/// Ordered list of candidate tools with SID lookup.
///
/// # Invariants
/// - Item order is stable; SIDs ascend `1..=len` in item order.
/// - The index map always mirrors the item list, including after
///   deserialization (the wire form is the plain item array).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<MenuItem>", into = "Vec<MenuItem>")]
pub struct Menu {
    /// Items in SID order.
    items: Vec<MenuItem>,
    /// SID → item position lookup.
    index: BTreeMap<Sid, usize>,
}

impl From<Vec<MenuItem>> for Menu {
    fn from(items: Vec<MenuItem>) -> Self {
        Self::from_items(items)
    }
}

impl From<Menu> for Vec<MenuItem> {
    fn from(menu: Menu) -> Self {
        menu.items
    }
}

impl Menu {
    /// Builds a menu by assigning SIDs `SID0001..` to descriptors in order.
    ///
    /// Returns `None` when more than `u16::MAX` candidates are offered, which
    /// exceeds the SID wire form.
    #[must_use]
    pub fn assign(candidates: Vec<(Aid, String, Vec<String>)>) -> Option<Self> {
        if candidates.len() > usize::from(u16::MAX) {
            return None;
        }
        let mut items = Vec::with_capacity(candidates.len());
        for (position, (aid, name, tags)) in candidates.into_iter().enumerate() {
            let raw = u16::try_from(position + 1).ok()?;
            let sid = Sid::from_raw(raw)?;
            items.push(MenuItem {
                sid,
                aid,
                name,
                tags,
            });
        }
        Some(Self::from_items(items))
    }

    /// Rebuilds the SID index from pre-assigned items.
    #[must_use]
    pub fn from_items(items: Vec<MenuItem>) -> Self {
        let index = items.iter().enumerate().map(|(position, item)| (item.sid, position)).collect();
        Self {
            items,
            index,
        }
    }

    /// Looks up an item by SID.
    #[must_use]
    pub fn lookup(&self, sid: Sid) -> Option<&MenuItem> {
        self.index.get(&sid).and_then(|position| self.items.get(*position))
    }

    /// Returns the items in SID order.
    #[must_use]
    pub fn items(&self) -> &[MenuItem] {
        &self.items
    }

    /// Returns the number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns whether the menu is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Serializes the menu to its canonical byte form.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when canonicalization fails.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, HashError> {
        canonical_json_bytes(&self.items)
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
