// crates/machina-core/src/crypto.rs
// ============================================================================
// Module: Machina Crypto Utilities
// Description: SHA-256 (buffers and files), HMAC-SHA-256, constant-time
//              comparison, and CSPRNG draws.
// Purpose: Centralize the primitives used for pinning, chaining, and tokens.
// Dependencies: sha2, hmac, hex, subtle, rand, thiserror
// ============================================================================

//! ## Overview
//! Thin, audited wrappers over the RustCrypto primitives: hex-encoded
//! SHA-256 of buffers and streamed files, HMAC-SHA-256, a constant-time hex
//! comparison for pinned digests, and a 32-bit draw from the platform
//! CSPRNG used for lease ids and nonces.
//!
//! Security posture: `ct_eq_hex` must be used wherever an attacker could
//! learn from comparison timing (plugin hash pinning, lease token checks);
//! see `Docs/security/threat_model.md`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::io::Read;
use std::path::Path;

use hmac::Hmac;
use hmac::Mac;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Digest;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Read-buffer size for streamed file hashing.
const FILE_HASH_BUFFER_BYTES: usize = 64 * 1024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by file hashing.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// File could not be opened or read.
    #[error("file hash failure for {path}: {source}")]
    FileRead {
        /// Path that failed to hash.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

// ============================================================================
// SECTION: SHA-256
// ============================================================================

pub use crate::hashing::sha256_hex;

/// Computes the SHA-256 digest of a file as lowercase hex, streaming reads.
///
/// # Errors
///
/// Returns [`CryptoError::FileRead`] when the file cannot be opened or read.
pub fn sha256_file(path: &Path) -> Result<String, CryptoError> {
    let mut file = File::open(path).map_err(|source| CryptoError::FileRead {
        path: path.display().to_string(),
        source,
    })?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0_u8; FILE_HASH_BUFFER_BYTES];
    loop {
        let read = file.read(&mut buffer).map_err(|source| CryptoError::FileRead {
            path: path.display().to_string(),
            source,
        })?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[.. read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

// ============================================================================
// SECTION: HMAC-SHA-256
// ============================================================================

/// Computes HMAC-SHA-256 over a message as lowercase hex.
#[must_use]
pub fn hmac_sha256_hex(key: &[u8], message: &[u8]) -> String {
    // HMAC accepts keys of any length; new_from_slice only fails for
    // variable-output MACs, which SHA-256 is not.
    let mac = <Hmac<Sha256> as Mac>::new_from_slice(key).map(|mut mac| {
        mac.update(message);
        mac.finalize().into_bytes()
    });
    match mac {
        Ok(bytes) => hex::encode(bytes),
        Err(_) => String::new(),
    }
}

// ============================================================================
// SECTION: Constant-Time Comparison
// ============================================================================

/// Compares two hex strings in constant time for equal lengths.
///
/// Unequal lengths return `false` immediately; the length itself is not a
/// secret. For equal lengths, the comparison time is independent of where
/// the strings differ.
#[must_use]
pub fn ct_eq_hex(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

// ============================================================================
// SECTION: CSPRNG
// ============================================================================

/// Draws 32 random bits from the platform CSPRNG.
#[must_use]
pub fn csprng_u32() -> u32 {
    OsRng.next_u32()
}

/// Draws 32 CSPRNG bits rendered as 8 lowercase hex chars.
#[must_use]
pub fn csprng_hex32() -> String {
    format!("{:08x}", csprng_u32())
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

    use std::io::Write;

    use super::*;

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"test"),
            "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
        );
    }

    #[test]
    fn file_hash_matches_buffer_hash() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"machina file hashing").unwrap();
        file.flush().unwrap();
        assert_eq!(sha256_file(file.path()).unwrap(), sha256_hex(b"machina file hashing"));
    }

    #[test]
    fn file_hash_surfaces_missing_file() {
        let err = sha256_file(Path::new("/nonexistent/machina.bin")).unwrap_err();
        assert!(matches!(err, CryptoError::FileRead { .. }));
    }

    #[test]
    fn hmac_matches_rfc4231_vector() {
        // RFC 4231 test case 2: key "Jefe", data "what do ya want for nothing?".
        assert_eq!(
            hmac_sha256_hex(b"Jefe", b"what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn ct_eq_hex_compares_correctly() {
        assert!(ct_eq_hex("deadbeef", "deadbeef"));
        assert!(!ct_eq_hex("deadbeef", "deadbeee"));
        assert!(!ct_eq_hex("deadbeef", "deadbe"));
        assert!(ct_eq_hex("", ""));
    }

    #[test]
    fn csprng_hex_is_eight_lowercase_chars() {
        let id = csprng_hex32();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
