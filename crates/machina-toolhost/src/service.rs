// crates/machina-toolhost/src/service.rs
// ============================================================================
// Module: Toolhost Service
// Description: Request handling, lease gating, and idempotency caching.
// Purpose: Turn protocol requests into transactional tool dispatches.
// Dependencies: lru, machina-core, machina-tools, serde_json
// ============================================================================

//! ## Overview
//! [`HostService`] owns a working state (persistent across serve-mode
//! requests), a tool registry, an optional lease manager, and the
//! idempotency cache. A request runs the same gauntlet the in-process
//! runner applies: resolve the AID, verify a lease when the tool's tier
//! demands one, apply the state snapshot/delta, execute inside a
//! transaction, and commit only on `OK`. Responses for keyed requests are
//! cached per-AID for sixty seconds, so a retried request replays its
//! answer with `idempotent_hit` instead of re-running side effects.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use lru::LruCache;
use machina_core::DsState;
use machina_core::StepStatus;
use machina_core::Timestamp;
use machina_core::Tx;
use machina_tools::LeaseManager;
use machina_tools::ToolRegistry;

use crate::protocol::HostRequest;
use crate::protocol::HostResponse;
use crate::protocol::decode_state_onto;
use crate::protocol::encode_state;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Idempotency cache capacity.
pub const IDEMPOTENCY_CAPACITY: usize = 1024;
/// Idempotency entry time-to-live.
pub const IDEMPOTENCY_TTL_MS: u64 = 60_000;
/// Separator between AID and key in cache keys; keys are scoped per AID.
const IDEMPOTENCY_SCOPE_SEP: char = '\u{1f}';

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Host behavior toggles.
///
/// # Invariants
/// - `lease_enforce` only has effect when a lease manager is attached.
#[derive(Debug, Clone, Copy)]
pub struct HostConfig {
    /// Require leases for tier-1+ tools.
    pub lease_enforce: bool,
    /// Idempotency cache capacity.
    pub idempotency_capacity: usize,
    /// Idempotency entry TTL in milliseconds.
    pub idempotency_ttl_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            lease_enforce: false,
            idempotency_capacity: IDEMPOTENCY_CAPACITY,
            idempotency_ttl_ms: IDEMPOTENCY_TTL_MS,
        }
    }
}

// ============================================================================
// SECTION: Cache Entries
// ============================================================================

/// One cached response with its insertion time.
#[derive(Debug, Clone)]
struct CachedResponse {
    /// Response as originally produced.
    response: HostResponse,
    /// Insertion time for TTL checks.
    cached_at: Timestamp,
}

// ============================================================================
// SECTION: Host Service
// ============================================================================

/// The tool host's request handler.
///
/// # Invariants
/// - The working state mutates only through committed transactions.
/// - A cached response is returned only within its TTL.
#[derive(Debug)]
pub struct HostService {
    /// Tools this host can execute.
    registry: Arc<ToolRegistry>,
    /// Lease verifier, when gating is wanted.
    leases: Option<Arc<LeaseManager>>,
    /// Behavior toggles.
    config: HostConfig,
    /// Working state across serve-mode requests.
    state: Mutex<DsState>,
    /// Per-AID idempotency cache.
    cache: Mutex<LruCache<String, CachedResponse>>,
}

impl HostService {
    /// Creates a service over a registry.
    #[must_use]
    pub fn new(
        registry: Arc<ToolRegistry>,
        leases: Option<Arc<LeaseManager>>,
        config: HostConfig,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.idempotency_capacity.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            registry,
            leases,
            config,
            state: Mutex::new(DsState::new()),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Handles one request end to end.
    #[must_use]
    pub fn handle(&self, request: &HostRequest) -> HostResponse {
        let cache_key = request
            .idempotency_key
            .as_ref()
            .map(|key| format!("{}{IDEMPOTENCY_SCOPE_SEP}{key}", request.aid));
        if let Some(key) = &cache_key {
            if let Some(hit) = self.cache_lookup(key) {
                return hit;
            }
        }

        let response = self.dispatch(request);
        if let Some(key) = cache_key {
            self.cache_store(key, &response);
        }
        response
    }

    /// Runs the dispatch gauntlet for an uncached request.
    fn dispatch(&self, request: &HostRequest) -> HostResponse {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(tool) = self.registry.lookup(&request.aid) else {
            return HostResponse::failure(
                StepStatus::ToolError,
                format!("unknown tool: {}", request.aid),
                &state,
            );
        };

        if self.config.lease_enforce && tool.desc.tier.level() > 0 {
            let Some(leases) = &self.leases else {
                return HostResponse::failure(
                    StepStatus::ToolError,
                    format!("lease_required (tier {})", tool.desc.tier),
                    &state,
                );
            };
            let Some(token) = &request.lease_token else {
                return HostResponse::failure(
                    StepStatus::ToolError,
                    format!("lease_required (tier {})", tool.desc.tier),
                    &state,
                );
            };
            if let Err(rejection) = leases.verify_and_consume(token, &request.aid) {
                return HostResponse::failure(
                    StepStatus::ToolError,
                    format!("lease_rejected ({})", rejection.as_str()),
                    &state,
                );
            }
        }

        if let Some(object) = &request.ds_state {
            if let Err(detail) = decode_state_onto(&mut state, object) {
                return HostResponse::failure(
                    StepStatus::ToolError,
                    format!("bad ds_state: {detail}"),
                    &state,
                );
            }
        }

        let mut tx = Tx::begin(&state);
        let outcome = tool.invoker.invoke(request.effective_input(), &mut tx);
        if outcome.status == StepStatus::Ok {
            let _patch = tx.commit(&mut state);
        } else {
            tx.rollback();
        }
        HostResponse {
            ok: outcome.status == StepStatus::Ok,
            status: outcome.status,
            output_json: outcome.output_json,
            error: outcome.error,
            ds_state: encode_state(&state),
            idempotent_hit: None,
        }
    }

    /// Returns a fresh cached response for a key, marking the hit.
    fn cache_lookup(&self, key: &str) -> Option<HostResponse> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = cache.get(key)?;
        let age = Timestamp::now().as_millis().saturating_sub(entry.cached_at.as_millis());
        if age >= self.config.idempotency_ttl_ms {
            cache.pop(key);
            return None;
        }
        let mut response = entry.response.clone();
        response.idempotent_hit = Some(true);
        Some(response)
    }

    /// Stores a response for a key.
    fn cache_store(&self, key: String, response: &HostResponse) {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.put(key, CachedResponse {
            response: response.clone(),
            cached_at: Timestamp::now(),
        });
    }

    /// Returns a snapshot of the current working state.
    #[must_use]
    pub fn state_snapshot(&self) -> DsState {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
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

    use machina_core::LeaseTier;
    use machina_core::SlotIndex;
    use machina_core::ToolDesc;
    use machina_core::ToolInvoker;
    use machina_core::ToolOutcome;
    use machina_tools::register_builtin_tools;
    use serde_json::json;

    use super::*;

    /// Tier-2 tool used for lease-gating tests.
    struct ShellStub;

    impl ToolInvoker for ShellStub {
        fn invoke(&self, _input_json: &str, _tx: &mut Tx) -> ToolOutcome {
            ToolOutcome::ok(r#"{"ran":true}"#)
        }
    }

    /// Service over the builtins plus a tier-2 stub, with optional leases.
    fn service(lease_enforce: bool, leases: Option<Arc<LeaseManager>>) -> HostService {
        let registry = Arc::new(ToolRegistry::new());
        register_builtin_tools(registry.as_ref()).unwrap();
        registry
            .register(
                ToolDesc::new("AID.SHELL.v1", "Shell").tier(LeaseTier::System),
                Arc::new(ShellStub),
                false,
            )
            .unwrap();
        HostService::new(registry, leases, HostConfig {
            lease_enforce,
            ..HostConfig::default()
        })
    }

    /// Request for `AID.PUT_TEXT.v1` with a text input and key.
    fn put_text_request(key: Option<&str>) -> HostRequest {
        let mut request = HostRequest::new("AID.PUT_TEXT.v1");
        request.input_json = Some(json!({"text": "hi", "slot": 0}).to_string());
        request.idempotency_key = key.map(ToString::to_string);
        request
    }

    #[test]
    fn successful_dispatch_commits_into_host_state() {
        let service = service(false, None);
        let response = service.handle(&put_text_request(None));
        assert!(response.ok);
        assert_eq!(response.status, StepStatus::Ok);
        assert!(response.ds_state.contains_key("0"));
        assert!(service.state_snapshot().is_occupied(SlotIndex::DS0));
    }

    #[test]
    fn unknown_tool_is_a_tool_error() {
        let service = service(false, None);
        let response = service.handle(&HostRequest::new("AID.MISSING.v1"));
        assert!(!response.ok);
        assert_eq!(response.status, StepStatus::ToolError);
        assert!(response.error.contains("unknown tool"));
    }

    #[test]
    fn idempotent_retry_replays_cached_response() {
        let service = service(false, None);
        let first = service.handle(&put_text_request(Some("req-1")));
        assert!(first.idempotent_hit.is_none());

        let second = service.handle(&put_text_request(Some("req-1")));
        assert_eq!(second.idempotent_hit, Some(true));
        assert_eq!(second.status, first.status);
        assert_eq!(second.output_json, first.output_json);
    }

    #[test]
    fn idempotency_keys_are_scoped_per_aid() {
        let service = service(false, None);
        let _ = service.handle(&put_text_request(Some("shared-key")));

        let mut other = HostRequest::new("AID.NOOP.v1");
        other.idempotency_key = Some("shared-key".to_string());
        let response = service.handle(&other);
        assert!(response.idempotent_hit.is_none(), "different AID, same key: no hit");
    }

    #[test]
    fn missing_lease_is_lease_required_with_tier() {
        let service = service(true, Some(Arc::new(LeaseManager::new())));
        let response = service.handle(&HostRequest::new("AID.SHELL.v1"));
        assert!(!response.ok);
        assert!(response.error.contains("lease_required"));
        assert!(response.error.contains("2"));
    }

    #[test]
    fn rejected_lease_names_the_reason() {
        let service = service(true, Some(Arc::new(LeaseManager::new())));
        let mut request = HostRequest::new("AID.SHELL.v1");
        request.lease_token = Some("00000000".to_string());
        let response = service.handle(&request);
        assert!(!response.ok);
        assert!(response.error.contains("lease_rejected"));
        assert!(response.error.contains("not_found"));
    }

    #[test]
    fn valid_lease_admits_tiered_tool() {
        let leases = Arc::new(LeaseManager::new());
        let token = leases.issue("AID.SHELL.v1", LeaseTier::System, 60_000, "test");
        let service = service(true, Some(Arc::clone(&leases)));

        let mut request = HostRequest::new("AID.SHELL.v1");
        request.lease_token = Some(token.id.as_str().to_string());
        let response = service.handle(&request);
        assert!(response.ok, "lease should admit the dispatch: {}", response.error);
    }

    #[test]
    fn tier_zero_tools_run_without_leases() {
        let service = service(true, Some(Arc::new(LeaseManager::new())));
        let response = service.handle(&put_text_request(None));
        assert!(response.ok);
    }

    #[test]
    fn request_snapshot_overwrites_host_state() {
        let service = service(false, None);
        let _ = service.handle(&put_text_request(None));
        assert!(service.state_snapshot().is_occupied(SlotIndex::DS0));

        let mut request = HostRequest::new("AID.NOOP.v1");
        request.ds_state = Some(serde_json::Map::new());
        let response = service.handle(&request);
        assert!(response.ok);
        assert_eq!(service.state_snapshot().occupied_count(), 0);
    }
}
