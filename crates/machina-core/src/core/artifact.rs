// crates/machina-core/src/core/artifact.rs
// ============================================================================
// Module: Machina Artifacts
// Description: Typed, sized JSON payloads produced and consumed by tools.
// Purpose: Define the value object held by working-state slots.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! An [`Artifact`] is an opaque payload with a free-form kind tag, a
//! JSON-encoded content string, a provenance label, and a byte count.
//! Artifacts are value objects: equal attributes imply equal digests, and the
//! engine never interprets `content_json` beyond carrying it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Artifact
// ============================================================================

/// Opaque tool payload held by a working-state slot.
///
/// # Invariants
/// - `size_bytes` reflects the length of `content_json` in bytes.
/// - Attributes fully determine identity; there is no hidden state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Free-form kind tag, e.g. `table`, `text`, `viewspec`.
    pub kind: String,
    /// JSON-encoded content string.
    pub content_json: String,
    /// Provenance tag: a hash or label identifying the producer.
    pub provenance: String,
    /// Content size in bytes.
    pub size_bytes: u64,
}

impl Artifact {
    /// Creates an artifact, deriving `size_bytes` from the content length.
    #[must_use]
    pub fn new(
        kind: impl Into<String>,
        content_json: impl Into<String>,
        provenance: impl Into<String>,
    ) -> Self {
        let content_json = content_json.into();
        let size_bytes = content_json.len() as u64;
        Self {
            kind: kind.into(),
            content_json,
            provenance: provenance.into(),
            size_bytes,
        }
    }
}

// ============================================================================
// SECTION: Unit Tests
// ============================================================================
