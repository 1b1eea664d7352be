// crates/machina-tools/src/lib.rs
// ============================================================================
// Module: Machina Tools Library
// Description: Live tool registry, lease manager, and builtin tool set.
// Purpose: Hold what can run, what it needs, and who may run it.
// Dependencies: machina-core, regex, rand, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Machina Tools provides the runtime registry mapping AIDs to descriptors
//! and invokers (read-mostly, safe for mid-run plugin registration), the TTL
//! single-use lease manager gating tiered tools, and the builtin tools every
//! deployment carries: the terminal `AID.NOOP.v1` and `AID.ASK_SUP.v1`
//! options, the `AID.ERROR_SCAN.v1` file scanner, and the deterministic
//! `AID.PUT_TEXT.v1` slot writer.
//!
//! Security posture: tool inputs are policy-controlled and untrusted; lease
//! ids come from the OS CSPRNG. See `Docs/security/threat_model.md`.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod builtin;
pub mod lease;
pub mod registry;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use builtin::AID_ASK_SUP;
pub use builtin::AID_ERROR_SCAN;
pub use builtin::AID_NOOP;
pub use builtin::AID_PUT_TEXT;
pub use builtin::register_builtin_tools;
pub use lease::LeaseManager;
pub use lease::LeaseRejection;
pub use lease::LeaseStatsSnapshot;
pub use lease::LeaseToken;
pub use registry::RegisteredTool;
pub use registry::RegistryError;
pub use registry::ToolRegistry;
