// crates/machina-plugins/src/abi.rs
// ============================================================================
// Module: Plugin ABI
// Description: C-ABI surface shared between the host and plugin binaries.
// Purpose: Fix the entry point, callback table, and tool call convention.
// Dependencies: machina-core, serde_json
// ============================================================================

//! ## Overview
//! A plugin exports `machina_plugin_init`, which receives a
//! [`RegistrarHandle`]: an opaque context pointer plus one callback,
//! `register_tool(desc_json, tool_fn)`. The plugin never sees the registry
//! itself, only the handle, which keeps registry lifetime with the host and
//! avoids any reference cycle. Optional exports `machina_plugin_abi_version`
//! and `machina_plugin_capabilities` feed the load-time gauntlet.
//!
//! Tool calls cross the boundary as JSON: the host passes the input object
//! and the full working-state snapshot, the plugin writes a response
//! (`status`, `output_json`, `error`, `slots`) into a host-owned buffer.
//! Fixed host-side buffers avoid cross-allocator frees.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::ffi::CStr;
use std::ffi::c_char;
use std::ffi::c_void;
use std::sync::Arc;

use machina_core::Artifact;
use machina_core::SlotIndex;
use machina_core::StepStatus;
use machina_core::ToolDesc;
use machina_core::ToolInvoker;
use machina_core::ToolOutcome;
use machina_core::ToolRegistrar;
use machina_core::Tx;
use serde_json::Value;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Host ABI version; plugins probing a different value are rejected.
pub const PLUGIN_ABI_VERSION: u32 = 3;

/// Entry-point symbol every plugin must export.
pub const SYM_INIT: &[u8] = b"machina_plugin_init";
/// Optional ABI-version probe symbol.
pub const SYM_ABI_VERSION: &[u8] = b"machina_plugin_abi_version";
/// Optional capability-bitmask symbol.
pub const SYM_CAPABILITIES: &[u8] = b"machina_plugin_capabilities";

/// Host-side response buffer size for one plugin tool call.
pub const TOOL_RESPONSE_BUF_BYTES: usize = 1024 * 1024;

// ============================================================================
// SECTION: Function Types
// ============================================================================

/// Plugin tool body: reads input and state JSON, writes a response JSON into
/// `out`, returning the byte length written, or a negative code on failure
/// (`-1` buffer too small, `-2` internal error).
pub type PluginToolFn = unsafe extern "C" fn(
    input_json: *const c_char,
    state_json: *const c_char,
    out: *mut c_char,
    out_cap: usize,
) -> i64;

/// Registration callback inside [`RegistrarHandle`]; returns 0 on success.
pub type RegisterToolFn =
    unsafe extern "C" fn(ctx: *mut c_void, desc_json: *const c_char, tool: PluginToolFn) -> i32;

/// Plugin entry point; returns 0 on success.
pub type PluginInitFn = unsafe extern "C" fn(registrar: *const RegistrarHandle) -> i32;

/// Optional ABI probe.
pub type AbiVersionFn = unsafe extern "C" fn() -> u32;

/// Optional capability declaration.
pub type CapabilitiesFn = unsafe extern "C" fn() -> u32;

// ============================================================================
// SECTION: Registrar Handle
// ============================================================================

/// Opaque registrar passed to `machina_plugin_init`.
///
/// # Invariants
/// - `ctx` is valid for the duration of the init call only; plugins must not
///   stash it.
#[repr(C)]
pub struct RegistrarHandle {
    /// Host context consumed by `register_tool`.
    pub ctx: *mut c_void,
    /// The handle's only method.
    pub register_tool: RegisterToolFn,
}

/// Host context behind `RegistrarHandle::ctx` during one init call.
pub(crate) struct RegistrarCtx<'a> {
    /// Destination registrar.
    pub registrar: &'a dyn ToolRegistrar,
    /// Keeps the library alive as long as any registered invoker.
    pub library: Arc<libloading::Library>,
    /// First registration error observed, if any.
    pub first_error: Option<String>,
    /// Number of tools registered by this plugin.
    pub registered: usize,
}

/// The `register_tool` callback installed in every handle.
///
/// # Safety
///
/// `ctx` must point at the host's `RegistrarCtx` for the active init call and
/// `desc_json` must be a valid NUL-terminated C string; both are guaranteed
/// by the host constructing the handle.
pub(crate) unsafe extern "C" fn register_tool_callback(
    ctx: *mut c_void,
    desc_json: *const c_char,
    tool: PluginToolFn,
) -> i32 {
    if ctx.is_null() || desc_json.is_null() {
        return -1;
    }
    // SAFETY: the host passes a pointer to its live RegistrarCtx and never
    // retains the handle past the init call.
    let ctx = unsafe { &mut *ctx.cast::<RegistrarCtx<'_>>() };
    // SAFETY: desc_json was checked non-null and the plugin contract requires
    // a NUL-terminated UTF-8 JSON document.
    let desc_text = unsafe { CStr::from_ptr(desc_json) };
    let Ok(desc_text) = desc_text.to_str() else {
        ctx.first_error.get_or_insert_with(|| "descriptor is not UTF-8".to_string());
        return -1;
    };
    let desc: ToolDesc = match serde_json::from_str(desc_text) {
        Ok(desc) => desc,
        Err(err) => {
            ctx.first_error.get_or_insert_with(|| format!("descriptor parse failure: {err}"));
            return -1;
        }
    };
    let invoker = Arc::new(PluginToolInvoker {
        tool,
        _library: Arc::clone(&ctx.library),
    });
    match ctx.registrar.register_tool(desc, invoker, false) {
        Ok(()) => {
            ctx.registered += 1;
            0
        }
        Err(err) => {
            ctx.first_error.get_or_insert_with(|| err.to_string());
            -1
        }
    }
}

// ============================================================================
// SECTION: Plugin Tool Invoker
// ============================================================================

/// Host-side wrapper turning a [`PluginToolFn`] into a [`ToolInvoker`].
///
/// # Invariants
/// - The wrapped library outlives the function pointer (the `Arc` below).
pub(crate) struct PluginToolInvoker {
    /// Plugin tool body.
    tool: PluginToolFn,
    /// Keeps the backing library mapped while any invoker is alive.
    _library: Arc<libloading::Library>,
}

impl ToolInvoker for PluginToolInvoker {
    fn invoke(&self, input_json: &str, tx: &mut Tx) -> ToolOutcome {
        let state_json = match snapshot_state(tx) {
            Ok(json) => json,
            Err(err) => return ToolOutcome::tool_error(err),
        };
        let Ok(input_c) = std::ffi::CString::new(input_json) else {
            return ToolOutcome::invalid_pick("inputs contain interior NUL");
        };
        let Ok(state_c) = std::ffi::CString::new(state_json) else {
            return ToolOutcome::tool_error("state snapshot contains interior NUL");
        };

        let mut buffer = vec![0_u8; TOOL_RESPONSE_BUF_BYTES];
        // SAFETY: both C strings are NUL-terminated and live across the call;
        // the buffer is writable for its full declared capacity.
        let written = unsafe {
            (self.tool)(
                input_c.as_ptr(),
                state_c.as_ptr(),
                buffer.as_mut_ptr().cast::<c_char>(),
                buffer.len(),
            )
        };
        if written < 0 {
            return ToolOutcome::tool_error(format!("plugin tool failed with code {written}"));
        }
        let Ok(length) = usize::try_from(written) else {
            return ToolOutcome::tool_error("plugin tool returned an invalid length");
        };
        if length > buffer.len() {
            return ToolOutcome::tool_error("plugin tool overran the response buffer");
        }
        let Ok(response) = std::str::from_utf8(&buffer[.. length]) else {
            return ToolOutcome::tool_error("plugin response is not UTF-8");
        };
        apply_response(response, tx)
    }
}

/// Serializes the transaction's working state for the plugin call.
fn snapshot_state(tx: &Tx) -> Result<String, String> {
    let slots: BTreeMap<String, &Artifact> = tx
        .tmp()
        .occupied()
        .map(|(index, artifact)| (index.get().to_string(), artifact))
        .collect();
    serde_json::to_string(&slots).map_err(|err| format!("state serialize failure: {err}"))
}

/// Parses a plugin response and applies its state back onto the transaction.
fn apply_response(response: &str, tx: &mut Tx) -> ToolOutcome {
    let parsed: Value = match serde_json::from_str(response) {
        Ok(value) => value,
        Err(err) => {
            return ToolOutcome::tool_error(format!("plugin response parse failure: {err}"));
        }
    };
    let status = parsed
        .get("status")
        .and_then(Value::as_str)
        .and_then(|status| serde_json::from_value(Value::String(status.to_string())).ok())
        .unwrap_or(StepStatus::ToolError);
    let output_json =
        parsed.get("output_json").and_then(Value::as_str).unwrap_or("{}").to_string();
    let error = parsed.get("error").and_then(Value::as_str).unwrap_or("").to_string();

    if status == StepStatus::Ok {
        if let Some(slots) = parsed.get("slots").and_then(Value::as_object) {
            for index in SlotIndex::all() {
                let key = index.get().to_string();
                match slots.get(&key) {
                    Some(raw) => match serde_json::from_value::<Artifact>(raw.clone()) {
                        Ok(artifact) => tx.tmp_mut().set_slot(index, Some(artifact)),
                        Err(err) => {
                            return ToolOutcome::tool_error(format!(
                                "plugin slot {key} parse failure: {err}"
                            ));
                        }
                    },
                    None => tx.tmp_mut().set_slot(index, None),
                }
            }
        }
        return ToolOutcome::ok(output_json);
    }
    ToolOutcome {
        status,
        output_json,
        error,
    }
}

// ============================================================================
// SECTION: Unit Tests
// ============================================================================
