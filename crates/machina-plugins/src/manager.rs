// crates/machina-plugins/src/manager.rs
// ============================================================================
// Module: Plugin Manager
// Description: Gated loading of shared-library tool plugins.
// Purpose: Run every load through ABI, hash, and capability checks.
// Dependencies: crate::abi, libloading, machina-core, thiserror
// ============================================================================

//! ## Overview
//! [`PluginManager`] loads shared libraries and lets them register tools via
//! the host registrar. The load gauntlet, in order: idempotence (a path loads
//! once), hash pinning (pre-declared SHA-256 or companion `<file>.sha256`,
//! compared in constant time), ABI probe (when exported, must equal
//! [`PLUGIN_ABI_VERSION`]), capability gate (declared mask must not exceed
//! the allowed mask; undeclared defaults to all unless declaration is
//! required), then the entry point. Handles are kept until process exit so
//! registered function pointers stay valid.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::ffi::c_void;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use machina_core::CapabilityMask;
use machina_core::ToolRegistrar;
use machina_core::crypto::ct_eq_hex;
use machina_core::crypto::sha256_file;
use thiserror::Error;

use crate::abi::AbiVersionFn;
use crate::abi::CapabilitiesFn;
use crate::abi::PLUGIN_ABI_VERSION;
use crate::abi::PluginInitFn;
use crate::abi::RegistrarCtx;
use crate::abi::RegistrarHandle;
use crate::abi::SYM_ABI_VERSION;
use crate::abi::SYM_CAPABILITIES;
use crate::abi::SYM_INIT;
use crate::abi::register_tool_callback;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Why a plugin load was rejected.
///
/// # Invariants
/// - A rejected load leaves the loaded set and the registry untouched except
///   for tools the entry point registered before failing.
#[derive(Debug, Error)]
pub enum PluginError {
    /// ABI probe returned a version other than the host's.
    #[error("abi mismatch for {path}: plugin declares {found}, host requires {expected}")]
    AbiMismatch {
        /// Plugin path.
        path: String,
        /// Version the plugin declared.
        found: u32,
        /// Version the host requires.
        expected: u32,
    },
    /// File hash did not match the pinned digest.
    #[error("hash mismatch for {path}")]
    HashMismatch {
        /// Plugin path.
        path: String,
    },
    /// Pinned digest or file hash could not be read.
    #[error("hash pin failure for {path}: {detail}")]
    HashPin {
        /// Plugin path.
        path: String,
        /// Failure detail.
        detail: String,
    },
    /// Declared capabilities exceed the allowed mask.
    #[error("capability excess for {path}: {excess}")]
    CapabilityExcess {
        /// Plugin path.
        path: String,
        /// Offending bits.
        excess: CapabilityMask,
    },
    /// Host requires a capability declaration and the plugin has none.
    #[error("missing capability declaration for {path}")]
    MissingDeclaration {
        /// Plugin path.
        path: String,
    },
    /// Library could not be opened or its entry point resolved.
    #[error("load failure for {path}: {detail}")]
    Load {
        /// Plugin path.
        path: String,
        /// dlopen/symbol failure detail.
        detail: String,
    },
    /// Entry point ran and reported failure.
    #[error("init failure for {path}: code {code}{detail}")]
    InitFailed {
        /// Plugin path.
        path: String,
        /// Non-zero code returned by the entry point.
        code: i32,
        /// First registration error, when one was captured.
        detail: String,
    },
    /// Directory scan failed.
    #[error("plugin dir failure for {path}: {source}")]
    Dir {
        /// Directory path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Host policy applied to every load.
///
/// # Invariants
/// - `pinned` keys are exact path strings as passed to `load`.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    /// Capability bits plugins may declare.
    pub allowed_caps: CapabilityMask,
    /// Reject plugins that do not export a capability declaration.
    pub require_declared: bool,
    /// Pre-declared SHA-256 digests keyed by plugin path.
    pub pinned: BTreeMap<String, String>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            allowed_caps: CapabilityMask::ALL,
            require_declared: false,
            pinned: BTreeMap::new(),
        }
    }
}

// ============================================================================
// SECTION: Manager State
// ============================================================================

/// One successfully loaded plugin.
#[derive(Debug)]
struct LoadedPlugin {
    /// Canonical plugin path.
    path: PathBuf,
    /// Library handle, held until process exit.
    _library: Arc<libloading::Library>,
    /// Tools the plugin registered.
    registered: usize,
}

/// Mutable manager state behind the mutex.
#[derive(Debug, Default)]
struct ManagerState {
    /// Loaded plugins in load order.
    loaded: Vec<LoadedPlugin>,
    /// Paths already loaded (idempotence set).
    paths: HashSet<PathBuf>,
}

// ============================================================================
// SECTION: Plugin Manager
// ============================================================================

/// Gated loader for shared-library tool plugins.
///
/// # Invariants
/// - A path is loaded at most once per manager.
/// - Library handles live until process exit.
#[derive(Debug, Default)]
pub struct PluginManager {
    /// Host policy.
    config: PluginConfig,
    /// Handle table.
    state: Mutex<ManagerState>,
}

impl PluginManager {
    /// Creates a manager with the given policy.
    #[must_use]
    pub fn new(config: PluginConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ManagerState::default()),
        }
    }

    /// Returns how many plugins have loaded successfully.
    #[must_use]
    pub fn loaded_count(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).loaded.len()
    }

    /// Returns whether a path has already been loaded.
    #[must_use]
    pub fn is_loaded(&self, path: &Path) -> bool {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).paths.contains(path)
    }

    /// Loads one plugin, returning how many tools it registered.
    ///
    /// Already-loaded paths succeed with zero new registrations.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when any gate rejects the load.
    pub fn load(
        &self,
        path: &Path,
        registrar: &dyn ToolRegistrar,
    ) -> Result<usize, PluginError> {
        if self.is_loaded(path) {
            return Ok(0);
        }
        self.check_hash_pin(path)?;

        // SAFETY: loading a shared object runs its constructors; the path has
        // passed hash pinning when a pin exists, which is the trust boundary
        // this manager enforces.
        let library = unsafe { libloading::Library::new(path) }.map_err(|err| {
            PluginError::Load {
                path: path.display().to_string(),
                detail: err.to_string(),
            }
        })?;
        let library = Arc::new(library);

        self.check_abi(path, &library)?;
        self.check_capabilities(path, &library)?;

        // SAFETY: the symbol type matches the documented entry-point ABI.
        let init: libloading::Symbol<'_, PluginInitFn> =
            unsafe { library.get(SYM_INIT) }.map_err(|err| PluginError::Load {
                path: path.display().to_string(),
                detail: err.to_string(),
            })?;

        let mut ctx = RegistrarCtx {
            registrar,
            library: Arc::clone(&library),
            first_error: None,
            registered: 0,
        };
        let handle = RegistrarHandle {
            ctx: std::ptr::from_mut(&mut ctx).cast::<c_void>(),
            register_tool: register_tool_callback,
        };
        // SAFETY: the handle and its context outlive this call, and the entry
        // point contract forbids the plugin from retaining either.
        let code = unsafe { init(&raw const handle) };
        if code != 0 {
            let detail = ctx
                .first_error
                .take()
                .map(|err| format!(" ({err})"))
                .unwrap_or_default();
            return Err(PluginError::InitFailed {
                path: path.display().to_string(),
                code,
                detail,
            });
        }
        let registered = ctx.registered;

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.paths.insert(path.to_path_buf());
        state.loaded.push(LoadedPlugin {
            path: path.to_path_buf(),
            _library: library,
            registered,
        });
        Ok(registered)
    }

    /// Loads every not-yet-loaded candidate in a directory (non-recursive),
    /// returning how many plugins loaded.
    ///
    /// Candidates carry the platform shared-library extension. Individual
    /// failures reject that plugin and continue the scan; the first error is
    /// returned after the scan when nothing loaded.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Dir`] when the directory cannot be read, or the
    /// first per-plugin error when the scan loaded nothing and saw failures.
    pub fn load_new_from_dir(
        &self,
        dir: &Path,
        registrar: &dyn ToolRegistrar,
    ) -> Result<usize, PluginError> {
        let entries = std::fs::read_dir(dir).map_err(|source| PluginError::Dir {
            path: dir.display().to_string(),
            source,
        })?;
        let mut loaded = 0;
        let mut first_error = None;
        for entry in entries {
            let entry = entry.map_err(|source| PluginError::Dir {
                path: dir.display().to_string(),
                source,
            })?;
            let path = entry.path();
            if !is_plugin_candidate(&path) || self.is_loaded(&path) {
                continue;
            }
            match self.load(&path, registrar) {
                Ok(_) => loaded += 1,
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        match (loaded, first_error) {
            (0, Some(err)) => Err(err),
            (count, _) => Ok(count),
        }
    }

    /// Lists loaded plugin paths in load order.
    #[must_use]
    pub fn loaded_paths(&self) -> Vec<PathBuf> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.loaded.iter().map(|plugin| plugin.path.clone()).collect()
    }

    /// Returns the total number of tools registered by loaded plugins.
    #[must_use]
    pub fn registered_tools(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.loaded.iter().map(|plugin| plugin.registered).sum()
    }

    /// Verifies the pinned digest for a path, when one exists.
    ///
    /// Pins come from the explicit config map first, then from a companion
    /// `<file>.sha256` next to the plugin. No pin means no check.
    fn check_hash_pin(&self, path: &Path) -> Result<(), PluginError> {
        let pinned = match self.config.pinned.get(&path.display().to_string()) {
            Some(digest) => Some(digest.trim().to_string()),
            None => read_companion_pin(path).map_err(|detail| PluginError::HashPin {
                path: path.display().to_string(),
                detail,
            })?,
        };
        let Some(pinned) = pinned else {
            return Ok(());
        };
        let actual = sha256_file(path).map_err(|err| PluginError::HashPin {
            path: path.display().to_string(),
            detail: err.to_string(),
        })?;
        if ct_eq_hex(&pinned.to_lowercase(), &actual) {
            Ok(())
        } else {
            Err(PluginError::HashMismatch {
                path: path.display().to_string(),
            })
        }
    }

    /// Runs the optional ABI probe; a present probe must match exactly.
    fn check_abi(
        &self,
        path: &Path,
        library: &libloading::Library,
    ) -> Result<(), PluginError> {
        // SAFETY: the symbol type matches the documented probe ABI; a missing
        // symbol is the accepted backwards-compatible case.
        let probe: Result<libloading::Symbol<'_, AbiVersionFn>, _> =
            unsafe { library.get(SYM_ABI_VERSION) };
        if let Ok(probe) = probe {
            // SAFETY: the probe takes no arguments and returns a u32 by the
            // ABI contract.
            let found = unsafe { probe() };
            if found != PLUGIN_ABI_VERSION {
                return Err(PluginError::AbiMismatch {
                    path: path.display().to_string(),
                    found,
                    expected: PLUGIN_ABI_VERSION,
                });
            }
        }
        Ok(())
    }

    /// Applies the capability gate.
    fn check_capabilities(
        &self,
        path: &Path,
        library: &libloading::Library,
    ) -> Result<(), PluginError> {
        // SAFETY: the symbol type matches the documented declaration ABI; a
        // missing symbol selects the backwards-compatible default below.
        let declared: Result<libloading::Symbol<'_, CapabilitiesFn>, _> =
            unsafe { library.get(SYM_CAPABILITIES) };
        let declared = match declared {
            // SAFETY: the declaration takes no arguments and returns a u32
            // bitmask by the ABI contract.
            Ok(symbol) => CapabilityMask::from_bits(unsafe { symbol() }),
            Err(_) if self.config.require_declared => {
                return Err(PluginError::MissingDeclaration {
                    path: path.display().to_string(),
                });
            }
            Err(_) => CapabilityMask::ALL,
        };
        let excess = declared.excess_over(self.config.allowed_caps);
        if excess.is_empty() {
            Ok(())
        } else {
            Err(PluginError::CapabilityExcess {
                path: path.display().to_string(),
                excess,
            })
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns whether a path looks like a loadable plugin for this platform.
fn is_plugin_candidate(path: &Path) -> bool {
    let Some(extension) = path.extension().and_then(|ext| ext.to_str()) else {
        return false;
    };
    let expected = if cfg!(target_os = "macos") {
        "dylib"
    } else if cfg!(target_os = "windows") {
        "dll"
    } else {
        "so"
    };
    path.is_file() && extension == expected
}

/// Reads a companion `<file>.sha256` pin, if present.
fn read_companion_pin(path: &Path) -> Result<Option<String>, String> {
    let mut companion = path.as_os_str().to_owned();
    companion.push(".sha256");
    let companion = PathBuf::from(companion);
    if !companion.exists() {
        return Ok(None);
    }
    std::fs::read_to_string(&companion)
        .map(|content| {
            // Tolerate `sha256sum` output: the digest is the first token.
            content.split_whitespace().next().map(str::to_lowercase)
        })
        .map_err(|err| err.to_string())
}

// ============================================================================
// SECTION: Unit Tests
// ============================================================================
