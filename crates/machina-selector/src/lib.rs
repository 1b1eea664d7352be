// crates/machina-selector/src/lib.rs
// ============================================================================
// Module: Machina Selector Library
// Description: Decision sources: fallback heuristic, external policy, breaker.
// Purpose: Turn menus into selections without ever trusting the picker.
// Dependencies: base64, machina-core, machina-sandbox, serde_json, tempfile, thiserror
// ============================================================================

//! ## Overview
//! The selector stack has three layers. The output [`grammar`] parses the
//! tagged block language external policies speak, tolerating surrounding
//! chatter. The [`FallbackSelector`] is the deterministic tag-intersection
//! heuristic every run can fall back on. The [`PolicySelector`] runs an
//! external process under an interpreter allow-list, script-root
//! confinement, resource limits, and a timeout, with a circuit breaker that
//! short-circuits after consecutive failures. [`Selector`] composes the two
//! per the run's control mode.
//!
//! Security posture: selector executables and their output are untrusted;
//! see `Docs/security/threat_model.md`.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod breaker;
pub mod fallback;
pub mod grammar;
pub mod policy;
pub mod select;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use breaker::BreakerStatsSnapshot;
pub use breaker::CircuitBreaker;
pub use fallback::FallbackSelector;
pub use policy::PolicyConfig;
pub use policy::PolicyError;
pub use policy::PolicySelector;
pub use select::Selector;
