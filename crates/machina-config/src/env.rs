// crates/machina-config/src/env.rs
// ============================================================================
// Module: Environment Overrides
// Description: MACHINA_* variable parsing layered over a loaded config.
// Purpose: Let deployments tune the policy surface without editing files.
// Dependencies: machina-core, machina-sandbox, serde? (none beyond model)
// ============================================================================

//! ## Overview
//! Overrides apply after file loading and before validation, so a variable
//! that would weaken a prod floor still fails closed. Recognized variables:
//! `MACHINA_PROFILE`, `MACHINA_AUDIT_DIR`, `MACHINA_LEASE_ENFORCE`,
//! `MACHINA_SELECTOR_TIMEOUT_MS`, `MACHINA_SELECTOR_ALLOW`,
//! `MACHINA_PLUGIN_DIR`, `MACHINA_PLUGIN_CAPS`, `MACHINA_WAL_FSYNC`,
//! `MACHINA_SECCOMP`. Booleans accept `on/off`, `true/false`, `1/0`.
//! Unknown `MACHINA_*` variables are ignored; malformed values are errors.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::PathBuf;

use machina_core::Capability;
use machina_sandbox::SeccompProfile;

use crate::model::ConfigError;
use crate::model::MachinaConfig;
use crate::model::Profile;

// ============================================================================
// SECTION: Variable Names
// ============================================================================

/// Profile override.
pub const ENV_PROFILE: &str = "MACHINA_PROFILE";
/// Audit directory override.
pub const ENV_AUDIT_DIR: &str = "MACHINA_AUDIT_DIR";
/// Lease enforcement toggle.
pub const ENV_LEASE_ENFORCE: &str = "MACHINA_LEASE_ENFORCE";
/// Selector timeout override (milliseconds).
pub const ENV_SELECTOR_TIMEOUT_MS: &str = "MACHINA_SELECTOR_TIMEOUT_MS";
/// Selector interpreter allow-list (comma-separated basenames).
pub const ENV_SELECTOR_ALLOW: &str = "MACHINA_SELECTOR_ALLOW";
/// Plugin directory override.
pub const ENV_PLUGIN_DIR: &str = "MACHINA_PLUGIN_DIR";
/// Plugin capability allow-list (comma-separated capability names).
pub const ENV_PLUGIN_CAPS: &str = "MACHINA_PLUGIN_CAPS";
/// WAL fsync toggle.
pub const ENV_WAL_FSYNC: &str = "MACHINA_WAL_FSYNC";
/// Syscall filter profile.
pub const ENV_SECCOMP: &str = "MACHINA_SECCOMP";

// ============================================================================
// SECTION: Application
// ============================================================================

/// Collects the `MACHINA_*` variables from the process environment.
#[must_use]
pub fn env_overrides_from_process() -> BTreeMap<String, String> {
    std::env::vars().filter(|(name, _)| name.starts_with("MACHINA_")).collect()
}

/// Applies overrides from a variable map onto a config.
///
/// # Errors
///
/// Returns [`ConfigError::Env`] naming the first malformed variable.
pub fn apply_env_overrides(
    config: &mut MachinaConfig,
    vars: &BTreeMap<String, String>,
) -> Result<(), ConfigError> {
    if let Some(value) = vars.get(ENV_PROFILE) {
        config.profile = Profile::parse(value).ok_or_else(|| ConfigError::Env {
            name: ENV_PROFILE.to_string(),
            detail: format!("unknown profile: {value}"),
        })?;
    }
    if let Some(value) = vars.get(ENV_AUDIT_DIR) {
        config.audit_dir = PathBuf::from(value);
    }
    if let Some(value) = vars.get(ENV_LEASE_ENFORCE) {
        config.leases.enforce = parse_bool(ENV_LEASE_ENFORCE, value)?;
    }
    if let Some(value) = vars.get(ENV_SELECTOR_TIMEOUT_MS) {
        config.selector.timeout_ms = value.parse().map_err(|_| ConfigError::Env {
            name: ENV_SELECTOR_TIMEOUT_MS.to_string(),
            detail: format!("not a millisecond count: {value}"),
        })?;
    }
    if let Some(value) = vars.get(ENV_SELECTOR_ALLOW) {
        config.selector.allowed_basenames = split_list(value);
    }
    if let Some(value) = vars.get(ENV_PLUGIN_DIR) {
        config.plugins.dir = Some(PathBuf::from(value));
    }
    if let Some(value) = vars.get(ENV_PLUGIN_CAPS) {
        config.plugins.allowed_caps = parse_capabilities(value)?;
    }
    if let Some(value) = vars.get(ENV_WAL_FSYNC) {
        config.wal.fsync = parse_bool(ENV_WAL_FSYNC, value)?;
    }
    if let Some(value) = vars.get(ENV_SECCOMP) {
        config.sandbox.seccomp =
            SeccompProfile::parse(value).ok_or_else(|| ConfigError::Env {
                name: ENV_SECCOMP.to_string(),
                detail: format!("unknown profile: {value}"),
            })?;
    }
    Ok(())
}

// ============================================================================
// SECTION: Parsers
// ============================================================================

/// Parses an on/off style boolean.
fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "yes" => Ok(true),
        "off" | "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::Env {
            name: name.to_string(),
            detail: format!("not a boolean: {value}"),
        }),
    }
}

/// Splits a comma-separated list, trimming blanks.
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Parses a comma-separated capability list.
fn parse_capabilities(value: &str) -> Result<Vec<Capability>, ConfigError> {
    split_list(value)
        .into_iter()
        .map(|name| {
            Capability::ALL
                .into_iter()
                .find(|capability| capability.as_str() == name)
                .ok_or_else(|| ConfigError::Env {
                    name: ENV_PLUGIN_CAPS.to_string(),
                    detail: format!("unknown capability: {name}"),
                })
        })
        .collect()
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

    /// Builds a variable map from pairs.
    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(name, value)| ((*name).to_string(), (*value).to_string())).collect()
    }

    #[test]
    fn overrides_apply_field_by_field() {
        let mut config = MachinaConfig::preset(Profile::Dev);
        apply_env_overrides(
            &mut config,
            &vars(&[
                (ENV_LEASE_ENFORCE, "on"),
                (ENV_SELECTOR_TIMEOUT_MS, "2500"),
                (ENV_PLUGIN_CAPS, "file_read,network"),
                (ENV_WAL_FSYNC, "true"),
                (ENV_SECCOMP, "net"),
            ]),
        )
        .unwrap();

        assert!(config.leases.enforce);
        assert_eq!(config.selector.timeout_ms, 2_500);
        assert_eq!(config.plugins.allowed_caps, vec![
            Capability::FileRead,
            Capability::Network
        ]);
        assert!(config.wal.fsync);
        assert_eq!(config.sandbox.seccomp, SeccompProfile::Net);
    }

    #[test]
    fn malformed_values_fail_closed() {
        let mut config = MachinaConfig::preset(Profile::Dev);
        let err = apply_env_overrides(&mut config, &vars(&[(ENV_LEASE_ENFORCE, "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { .. }));

        let err =
            apply_env_overrides(&mut config, &vars(&[(ENV_PLUGIN_CAPS, "teleport")]))
                .unwrap_err();
        assert!(matches!(err, ConfigError::Env { .. }));
    }

    #[test]
    fn weakening_prod_via_env_fails_at_validation() {
        let mut config = MachinaConfig::preset(Profile::Prod);
        apply_env_overrides(&mut config, &vars(&[(ENV_WAL_FSYNC, "off")])).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_machina_vars_are_ignored() {
        let mut config = MachinaConfig::preset(Profile::Dev);
        let before = config.clone();
        apply_env_overrides(&mut config, &vars(&[("MACHINA_FUTURE_KNOB", "x")])).unwrap();
        assert_eq!(config, before);
    }
}
