// crates/machina-config/src/model.rs
// ============================================================================
// Module: Configuration Model
// Description: Typed config sections, profile presets, and validation.
// Purpose: Make every runtime knob explicit, defaulted, and checkable.
// Dependencies: machina-core, machina-sandbox, machina-wal, serde, toml, thiserror
// ============================================================================

//! ## Overview
//! The model is plain data with serde derives so a TOML file maps onto it
//! section by section. `dev` and `prod` presets differ only in their
//! hardening floor; validation enforces that floor after any file or
//! environment override, so a prod deployment cannot quietly lose fsync,
//! the syscall filter, or lease enforcement.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::path::PathBuf;

use machina_core::Capability;
use machina_core::CapabilityMask;
use machina_sandbox::ProcLimits;
use machina_sandbox::SeccompProfile;
use machina_wal::WalConfig;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading and validation failures.
///
/// # Invariants
/// - Validation never repairs; it names the offending field and stops.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// TOML could not be parsed.
    #[error("config parse failure: {0}")]
    Parse(String),
    /// A field failed validation.
    #[error("invalid config: {field}: {detail}")]
    Invalid {
        /// Offending field path.
        field: &'static str,
        /// What was wrong.
        detail: String,
    },
    /// An environment override could not be interpreted.
    #[error("invalid env override {name}: {detail}")]
    Env {
        /// Variable name.
        name: String,
        /// What was wrong.
        detail: String,
    },
}

// ============================================================================
// SECTION: Profiles
// ============================================================================

/// Deployment profile selecting a hardening floor.
///
/// # Invariants
/// - Wire labels are stable for files and environment variables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Development: permissive defaults, no fsync, no filter.
    #[default]
    Dev,
    /// Production: fsync, strict filter, leases, no genesis plugins.
    Prod,
}

impl Profile {
    /// Returns the stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Prod => "prod",
        }
    }

    /// Parses a label.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "dev" => Some(Self::Dev),
            "prod" => Some(Self::Prod),
            _ => None,
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Sections
// ============================================================================

/// Selector invocation and breaker policy.
///
/// # Invariants
/// - `command` empty means no external policy is configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorPolicy {
    /// External policy command line; empty disables the external selector.
    pub command: Vec<String>,
    /// Wall-clock timeout for one call.
    pub timeout_ms: u64,
    /// Allowed interpreter basenames.
    pub allowed_basenames: Vec<String>,
    /// Directory policy scripts must resolve under.
    pub script_root: PathBuf,
    /// Consecutive failures before the breaker opens.
    pub breaker_threshold: u32,
    /// Breaker cooldown once open.
    pub breaker_cooldown_ms: u64,
}

impl Default for SelectorPolicy {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_ms: 10_000,
            allowed_basenames: ["python3", "python", "sh", "bash", "node"]
                .map(str::to_string)
                .to_vec(),
            script_root: PathBuf::from("policies"),
            breaker_threshold: 3,
            breaker_cooldown_ms: 30_000,
        }
    }
}

/// Plugin directory and capability gate.
///
/// # Invariants
/// - `allowed_caps` lists the bits plugins may declare; everything else
///   rejects the load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsPolicy {
    /// Directory scanned for plugins; `None` disables dynamic loading.
    pub dir: Option<PathBuf>,
    /// Capabilities plugins may declare.
    pub allowed_caps: Vec<Capability>,
    /// Reject plugins without a capability declaration.
    pub require_declared: bool,
}

impl Default for PluginsPolicy {
    fn default() -> Self {
        Self {
            dir: None,
            allowed_caps: Capability::ALL.to_vec(),
            require_declared: false,
        }
    }
}

impl PluginsPolicy {
    /// Returns the allowed capabilities as a mask.
    #[must_use]
    pub fn allowed_mask(&self) -> CapabilityMask {
        self.allowed_caps
            .iter()
            .fold(CapabilityMask::NONE, |mask, capability| mask.with(*capability))
    }
}

/// Lease enforcement toggle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeasesPolicy {
    /// Require leases for tier-1+ tools.
    pub enforce: bool,
}

/// Sandbox posture for child processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxPolicy {
    /// Syscall filter profile.
    pub seccomp: SeccompProfile,
    /// Resource limits for children.
    pub limits: ProcLimits,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            seccomp: SeccompProfile::Off,
            limits: ProcLimits::default(),
        }
    }
}

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// The full runtime configuration.
///
/// # Invariants
/// - `validate` holds after any load path (preset, file, env overrides).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachinaConfig {
    /// Deployment profile.
    pub profile: Profile,
    /// Directory for per-run audit logs.
    pub audit_dir: PathBuf,
    /// Selector policy.
    pub selector: SelectorPolicy,
    /// Plugin policy.
    pub plugins: PluginsPolicy,
    /// Lease policy.
    pub leases: LeasesPolicy,
    /// WAL durability and rotation policy.
    pub wal: WalConfig,
    /// Sandbox posture.
    pub sandbox: SandboxPolicy,
}

impl Default for MachinaConfig {
    fn default() -> Self {
        Self::preset(Profile::Dev)
    }
}

impl MachinaConfig {
    /// Builds the preset for a profile.
    #[must_use]
    pub fn preset(profile: Profile) -> Self {
        let mut config = Self {
            profile,
            audit_dir: PathBuf::from("audit"),
            selector: SelectorPolicy::default(),
            plugins: PluginsPolicy::default(),
            leases: LeasesPolicy::default(),
            wal: WalConfig::default(),
            sandbox: SandboxPolicy::default(),
        };
        if profile == Profile::Prod {
            config.wal.fsync = true;
            config.sandbox.seccomp = SeccompProfile::Strict;
            config.leases.enforce = true;
            config.plugins.allowed_caps =
                Capability::ALL.into_iter().filter(|cap| *cap != Capability::Genesis).collect();
            config.plugins.require_declared = true;
        }
        config
    }

    /// Parses a TOML document into a config (not yet validated).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed TOML.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Validates the config, enforcing the profile's hardening floor.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.selector.timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "selector.timeout_ms",
                detail: "must be positive".to_string(),
            });
        }
        if self.selector.allowed_basenames.is_empty() {
            return Err(ConfigError::Invalid {
                field: "selector.allowed_basenames",
                detail: "must not be empty".to_string(),
            });
        }
        if self.wal.max_segments == 0 {
            return Err(ConfigError::Invalid {
                field: "wal.max_segments",
                detail: "must be positive".to_string(),
            });
        }
        if self.profile == Profile::Prod {
            if !self.wal.fsync {
                return Err(ConfigError::Invalid {
                    field: "wal.fsync",
                    detail: "prod requires fsync".to_string(),
                });
            }
            if self.sandbox.seccomp == SeccompProfile::Off {
                return Err(ConfigError::Invalid {
                    field: "sandbox.seccomp",
                    detail: "prod requires a syscall filter".to_string(),
                });
            }
            if !self.leases.enforce {
                return Err(ConfigError::Invalid {
                    field: "leases.enforce",
                    detail: "prod requires lease enforcement".to_string(),
                });
            }
            if self.plugins.allowed_caps.contains(&Capability::Genesis) {
                return Err(ConfigError::Invalid {
                    field: "plugins.allowed_caps",
                    detail: "prod forbids genesis-capability plugins".to_string(),
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Unit Tests
// ============================================================================
