// crates/machina-runner/src/merge.rs
// ============================================================================
// Module: Safe Input Merge
// Description: Shallow, filtered merge of selector patches into runner inputs.
// Purpose: Let a policy steer tool inputs without reaching reserved keys.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! A selector's input patch merges shallowly, key by key, into the runner's
//! inputs. Keys with a reserved prefix (`_system`, `_queue`, `_meta`) never
//! land. When the chosen tool has a configured input allow-list, only listed
//! keys land. The lease key `_lease_token` is explicitly whitelisted through
//! the merge so the lease check can see it; the runner strips it again
//! before dispatch.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Map;
use serde_json::Value;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Prefixes a patch may never write.
pub const RESERVED_PREFIXES: &[&str] = &["_system", "_queue", "_meta"];
/// Lease key whitelisted through the merge for the lease check.
pub const LEASE_TOKEN_KEY: &str = "_lease_token";

// ============================================================================
// SECTION: Safe Merge
// ============================================================================

/// Shallow-merges a patch into `inputs`, returning the keys that landed.
///
/// Rejected keys are skipped silently from the merge's point of view; the
/// caller audits the applied set, so what did not land is evident from what
/// did. With `allowlist` set, only listed keys (plus the lease key) land.
pub fn safe_merge(
    inputs: &mut Map<String, Value>,
    patch: &Map<String, Value>,
    allowlist: Option<&[String]>,
) -> Vec<String> {
    let mut applied = Vec::new();
    for (key, value) in patch {
        if RESERVED_PREFIXES.iter().any(|prefix| key.starts_with(prefix)) {
            continue;
        }
        if key != LEASE_TOKEN_KEY {
            if let Some(allowed) = allowlist {
                if !allowed.contains(key) {
                    continue;
                }
            }
        }
        inputs.insert(key.clone(), value.clone());
        applied.push(key.clone());
    }
    applied
}

// ============================================================================
// SECTION: Unit Tests
// ============================================================================
