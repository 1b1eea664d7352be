// crates/machina-plugins/src/lib.rs
// ============================================================================
// Module: Machina Plugins Library
// Description: Dynamic tool loading with hash pinning and capability gating.
// Purpose: Let vetted shared libraries register tools without trusting them.
// Dependencies: libloading, machina-core, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The plugin manager loads shared libraries that export the Machina entry
//! point and register tools through a host-owned registrar handle. Every
//! load runs the gauntlet: optional ABI-version probe (mismatch rejects),
//! SHA-256 hash pinning compared in constant time, and a capability gate
//! that rejects any plugin declaring bits outside the host's allowed mask.
//! Loaded libraries stay alive until process exit — the only legitimate
//! process-wide state this workspace keeps besides breaker counters.
//!
//! Security posture: plugin binaries are untrusted until pinned and gated;
//! see `Docs/security/threat_model.md`.

#![allow(
    unsafe_code,
    reason = "Dynamic library loading and C-ABI callbacks are inherently unsafe; \
              every unsafe block carries a SAFETY comment."
)]

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod abi;
pub mod manager;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use abi::PLUGIN_ABI_VERSION;
pub use abi::RegistrarHandle;
pub use manager::PluginConfig;
pub use manager::PluginError;
pub use manager::PluginManager;
