// crates/machina-tools/src/lease.rs
// ============================================================================
// Module: Lease Manager
// Description: TTL-based single-use authorization tokens for tiered tools.
// Purpose: Make every tier-1+ dispatch an explicit, expiring grant.
// Dependencies: machina-core, serde, thiserror
// ============================================================================

//! ## Overview
//! Tier-0 tools run freely. When enforcement is on, a higher-tier dispatch
//! must present a [`LeaseToken`] minted here: a CSPRNG-random id, a tool AID
//! (or `*` for any), a tier, and an expiry clamped to `[1s, 300s]`. A token
//! verifies at most once; rejections report exactly one of `not_found`,
//! `expired`, `consumed`, or `mismatch`. Expired tokens are garbage-collected
//! lazily. All operations are safe under concurrent callers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use machina_core::Aid;
use machina_core::LeaseId;
use machina_core::LeaseTier;
use machina_core::Timestamp;
use machina_core::crypto::csprng_hex32;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Minimum lease TTL in milliseconds.
pub const MIN_TTL_MS: u64 = 1_000;
/// Maximum lease TTL in milliseconds.
pub const MAX_TTL_MS: u64 = 300_000;
/// Wildcard AID accepted by any tool.
pub const WILDCARD_AID: &str = "*";

// ============================================================================
// SECTION: Tokens
// ============================================================================

/// One single-use authorization token.
///
/// # Invariants
/// - `consumed` transitions false→true exactly once, under the manager lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseToken {
    /// Random token identifier.
    pub id: LeaseId,
    /// Tool the token authorizes, or `*` for any.
    pub tool_aid: Aid,
    /// Authorization tier granted.
    pub tier: LeaseTier,
    /// Issue time.
    pub issued_at: Timestamp,
    /// Expiry time.
    pub expires_at: Timestamp,
    /// Whether the token has been consumed.
    pub consumed: bool,
    /// Label of the issuing party.
    pub issuer: String,
}

// ============================================================================
// SECTION: Rejections
// ============================================================================

/// Why a lease verification failed.
///
/// # Invariants
/// - Wire labels are stable for audit payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseRejection {
    /// No token with that id exists.
    #[error("not_found")]
    NotFound,
    /// Token exists but its expiry has passed.
    #[error("expired")]
    Expired,
    /// Token was already consumed.
    #[error("consumed")]
    Consumed,
    /// Token authorizes a different tool.
    #[error("mismatch")]
    Mismatch,
}

impl LeaseRejection {
    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Expired => "expired",
            Self::Consumed => "consumed",
            Self::Mismatch => "mismatch",
        }
    }
}

// ============================================================================
// SECTION: Statistics
// ============================================================================

/// Serializable snapshot of the lease counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseStatsSnapshot {
    /// Tokens issued.
    pub issued: u64,
    /// Tokens successfully consumed.
    pub consumed: u64,
    /// Verifications rejected.
    pub rejected: u64,
}

/// Monotonic lease counters.
#[derive(Debug, Default)]
struct LeaseStats {
    /// Tokens issued.
    issued: AtomicU64,
    /// Tokens successfully consumed.
    consumed: AtomicU64,
    /// Verifications rejected.
    rejected: AtomicU64,
}

// ============================================================================
// SECTION: Manager
// ============================================================================

/// Internally synchronized lease issuer and verifier.
///
/// # Invariants
/// - At most one `verify_and_consume` succeeds per token.
/// - Counters are monotonic for the life of the manager.
#[derive(Debug, Default)]
pub struct LeaseManager {
    /// Live tokens keyed by id.
    tokens: Mutex<HashMap<String, LeaseToken>>,
    /// Monotonic counters.
    stats: LeaseStats,
}

impl fmt::Display for LeaseManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.stats_snapshot();
        write!(
            f,
            "leases issued={} consumed={} rejected={}",
            snapshot.issued, snapshot.consumed, snapshot.rejected
        )
    }
}

impl LeaseManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a token for a tool (or `*`) at a tier, TTL clamped to
    /// `[1_000, 300_000]` ms.
    pub fn issue(
        &self,
        tool_aid: impl Into<Aid>,
        tier: LeaseTier,
        ttl_ms: u64,
        issuer: impl Into<String>,
    ) -> LeaseToken {
        let ttl_ms = ttl_ms.clamp(MIN_TTL_MS, MAX_TTL_MS);
        let issued_at = Timestamp::now();
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        let id = loop {
            let candidate = csprng_hex32();
            if !tokens.contains_key(&candidate) {
                break candidate;
            }
        };
        let token = LeaseToken {
            id: LeaseId::new(id.clone()),
            tool_aid: tool_aid.into(),
            tier,
            issued_at,
            expires_at: issued_at.saturating_add_millis(ttl_ms),
            consumed: false,
            issuer: issuer.into(),
        };
        tokens.insert(id, token.clone());
        drop(tokens);
        self.stats.issued.fetch_add(1, Ordering::Relaxed);
        token
    }

    /// Verifies and consumes a token for a tool.
    ///
    /// # Errors
    ///
    /// Returns the [`LeaseRejection`] naming why verification failed; the
    /// token is left consumable only in the `mismatch` and `not_found` cases
    /// (an expired token stays dead).
    pub fn verify_and_consume(
        &self,
        token_id: &str,
        tool_aid: &Aid,
    ) -> Result<LeaseToken, LeaseRejection> {
        let now = Timestamp::now();
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        let result = match tokens.get_mut(token_id) {
            None => Err(LeaseRejection::NotFound),
            Some(token) if token.consumed => Err(LeaseRejection::Consumed),
            Some(token) if !now.is_before(token.expires_at) => Err(LeaseRejection::Expired),
            Some(token)
                if token.tool_aid.as_str() != WILDCARD_AID && token.tool_aid != *tool_aid =>
            {
                Err(LeaseRejection::Mismatch)
            }
            Some(token) => {
                token.consumed = true;
                Ok(token.clone())
            }
        };
        drop(tokens);
        match &result {
            Ok(_) => self.stats.consumed.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.stats.rejected.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    /// Removes expired tokens, returning how many were dropped.
    pub fn gc(&self) -> usize {
        let now = Timestamp::now();
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        let before = tokens.len();
        tokens.retain(|_, token| now.is_before(token.expires_at));
        before - tokens.len()
    }

    /// Returns the number of live (unexpired, possibly consumed) tokens.
    #[must_use]
    pub fn live_tokens(&self) -> usize {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Snapshots the monotonic counters.
    #[must_use]
    pub fn stats_snapshot(&self) -> LeaseStatsSnapshot {
        LeaseStatsSnapshot {
            issued: self.stats.issued.load(Ordering::Relaxed),
            consumed: self.stats.consumed.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
        }
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

    #[test]
    fn ttl_is_clamped_to_contract_bounds() {
        let manager = LeaseManager::new();
        let short = manager.issue("AID.X.v1", LeaseTier::Write, 1, "test");
        let span = short.expires_at.as_millis() - short.issued_at.as_millis();
        assert_eq!(span, MIN_TTL_MS);

        let long = manager.issue("AID.X.v1", LeaseTier::Write, u64::MAX, "test");
        let span = long.expires_at.as_millis() - long.issued_at.as_millis();
        assert_eq!(span, MAX_TTL_MS);
    }

    #[test]
    fn token_verifies_exactly_once() {
        let manager = LeaseManager::new();
        let token = manager.issue("AID.X.v1", LeaseTier::System, 60_000, "test");
        let aid = Aid::new("AID.X.v1");

        assert!(manager.verify_and_consume(token.id.as_str(), &aid).is_ok());
        assert_eq!(
            manager.verify_and_consume(token.id.as_str(), &aid),
            Err(LeaseRejection::Consumed)
        );

        let stats = manager.stats_snapshot();
        assert_eq!(stats.issued, 1);
        assert_eq!(stats.consumed, 1);
        assert_eq!(stats.rejected, 1);
    }

    #[test]
    fn unknown_token_is_not_found() {
        let manager = LeaseManager::new();
        assert_eq!(
            manager.verify_and_consume("deadbeef", &Aid::new("AID.X.v1")),
            Err(LeaseRejection::NotFound)
        );
    }

    #[test]
    fn aid_mismatch_is_rejected_without_consuming() {
        let manager = LeaseManager::new();
        let token = manager.issue("AID.X.v1", LeaseTier::Write, 60_000, "test");

        assert_eq!(
            manager.verify_and_consume(token.id.as_str(), &Aid::new("AID.Y.v1")),
            Err(LeaseRejection::Mismatch)
        );
        // The token survives a mismatch and still works for its own tool.
        assert!(manager.verify_and_consume(token.id.as_str(), &Aid::new("AID.X.v1")).is_ok());
    }

    #[test]
    fn wildcard_token_matches_any_tool() {
        let manager = LeaseManager::new();
        let token = manager.issue(WILDCARD_AID, LeaseTier::Dangerous, 60_000, "supervisor");
        assert!(manager.verify_and_consume(token.id.as_str(), &Aid::new("AID.ANY.v1")).is_ok());
    }

    #[test]
    fn gc_drops_only_expired_tokens() {
        let manager = LeaseManager::new();
        let _live = manager.issue("AID.X.v1", LeaseTier::Write, 60_000, "test");
        // Forge an expired token directly in the table.
        {
            let mut tokens = manager.tokens.lock().unwrap();
            tokens.insert("00000001".to_string(), LeaseToken {
                id: LeaseId::new("00000001"),
                tool_aid: Aid::new("AID.X.v1"),
                tier: LeaseTier::Write,
                issued_at: Timestamp::from_millis(0),
                expires_at: Timestamp::from_millis(1),
                consumed: false,
                issuer: "test".to_string(),
            });
        }
        assert_eq!(manager.live_tokens(), 2);
        assert_eq!(manager.gc(), 1);
        assert_eq!(manager.live_tokens(), 1);
    }

    #[test]
    fn expired_token_reports_expired() {
        let manager = LeaseManager::new();
        {
            let mut tokens = manager.tokens.lock().unwrap();
            tokens.insert("0000000a".to_string(), LeaseToken {
                id: LeaseId::new("0000000a"),
                tool_aid: Aid::new("AID.X.v1"),
                tier: LeaseTier::Write,
                issued_at: Timestamp::from_millis(0),
                expires_at: Timestamp::from_millis(1),
                consumed: false,
                issuer: "test".to_string(),
            });
        }
        assert_eq!(
            manager.verify_and_consume("0000000a", &Aid::new("AID.X.v1")),
            Err(LeaseRejection::Expired)
        );
    }
}
