// crates/machina-core/src/hashing.rs
// ============================================================================
// Module: Machina Canonical Hashing
// Description: RFC 8785 canonical JSON bytes, SHA-256 hex, and FNV-1a 64.
// Purpose: Provide the deterministic digests used for state, menus, and chains.
// Dependencies: serde, serde_jcs, sha2, hex, thiserror
// ============================================================================

//! ## Overview
//! All Machina digests hash the same canonical bytes: the RFC 8785 (JCS)
//! serialization of a value, which sorts object keys, strips insignificant
//! whitespace, and normalizes numbers. Two digests are computed over those
//! bytes: SHA-256 hex for audit and tamper evidence, and FNV-1a 64 for cheap
//! same-run comparisons (loop-guard, menu identity checks).
//!
//! Security posture: hashed values may be attacker-influenced; canonicalization
//! failures are surfaced, never swallowed. See `Docs/security/threat_model.md`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// FNV-1a 64-bit offset basis.
const FNV64_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
/// FNV-1a 64-bit prime.
const FNV64_PRIME: u64 = 0x0000_0100_0000_01b3;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while producing canonical bytes for hashing.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum HashError {
    /// Value could not be canonicalized (e.g. non-finite float).
    #[error("canonicalization failure: {0}")]
    Canonicalization(String),
}

// ============================================================================
// SECTION: Canonical Bytes
// ============================================================================

/// Serializes a value to RFC 8785 canonical JSON bytes.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when the value cannot be
/// represented as canonical JSON (non-finite floats, non-string map keys).
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_vec(value).map_err(|err| HashError::Canonicalization(err.to_string()))
}

// ============================================================================
// SECTION: Digests
// ============================================================================

/// Computes the SHA-256 digest of a byte buffer as lowercase hex.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Computes the SHA-256 hex digest of a value's canonical JSON bytes.
///
/// # Errors
///
/// Returns [`HashError`] when canonicalization fails.
pub fn sha256_canonical_json<T: Serialize>(value: &T) -> Result<String, HashError> {
    Ok(sha256_hex(&canonical_json_bytes(value)?))
}

/// Computes the FNV-1a 64-bit hash of a byte buffer.
///
/// Non-cryptographic; used only for same-run comparisons where a stable,
/// platform-independent 64-bit value is enough.
#[must_use]
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = FNV64_OFFSET;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV64_PRIME);
    }
    hash
}

// ============================================================================
// SECTION: Unit Tests
// ============================================================================
