// crates/machina-config/src/lib.rs
// ============================================================================
// Module: Machina Config Library
// Description: Canonical runtime configuration, presets, env overrides.
// Purpose: One validated model for every policy knob the core exposes.
// Dependencies: machina-core, machina-sandbox, machina-wal, serde, toml, thiserror
// ============================================================================

//! ## Overview
//! [`MachinaConfig`] gathers every environment-configurable policy surface:
//! profile, selector invocation and breaker policy, plugin directory and
//! capability gate, lease enforcement, WAL durability, sandbox profile, and
//! the audit directory. Presets exist for `dev` and `prod`; prod enables
//! fsync, the strict syscall filter, lease enforcement, and disables
//! genesis-capability plugins. Configs load from TOML, then `MACHINA_*`
//! environment overrides apply, then validation fails closed on anything
//! that weakens a prod deployment below its floor. Goal manifests load from
//! TOML through the same crate.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod env;
pub mod manifest;
pub mod model;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use env::apply_env_overrides;
pub use env::env_overrides_from_process;
pub use manifest::load_goal_manifest;
pub use model::ConfigError;
pub use model::MachinaConfig;
pub use model::PluginsPolicy;
pub use model::Profile;
pub use model::SelectorPolicy;
