// crates/machina-tools/src/builtin.rs
// ============================================================================
// Module: Builtin Tools
// Description: The tool set every Machina deployment registers at startup.
// Purpose: Provide terminal menu options and the reference scan/write tools.
// Dependencies: machina-core, regex, serde_json
// ============================================================================

//! ## Overview
//! Four builtins ship with the runtime. `AID.NOOP.v1` and `AID.ASK_SUP.v1`
//! are the terminal options every menu carries; their invokers are inert
//! because the runner interprets those picks at the selection layer.
//! `AID.ERROR_SCAN.v1` scans a file for a regex and writes a `table`
//! artifact with the match count to DS0 — deterministic but fenced on its
//! file inputs, so strict replay applies its logged patch instead of
//! re-reading the file. `AID.PUT_TEXT.v1` writes a text artifact to a chosen
//! slot; it is pure and deterministic, the reference tool for replay
//! re-execution.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::sync::Arc;

use machina_core::Artifact;
use machina_core::LeaseTier;
use machina_core::SlotIndex;
use machina_core::ToolDesc;
use machina_core::ToolInvoker;
use machina_core::ToolOutcome;
use machina_core::ToolRegistrar;
use machina_core::Tx;
use machina_core::interfaces::RegistrarError;
use regex::Regex;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Terminal no-op tool.
pub const AID_NOOP: &str = "AID.NOOP.v1";
/// Terminal supervisor-request tool.
pub const AID_ASK_SUP: &str = "AID.ASK_SUP.v1";
/// File regex scanner.
pub const AID_ERROR_SCAN: &str = "AID.ERROR_SCAN.v1";
/// Deterministic text slot writer.
pub const AID_PUT_TEXT: &str = "AID.PUT_TEXT.v1";

/// Default row cap for `AID.ERROR_SCAN.v1`.
const DEFAULT_MAX_ROWS: u64 = 10_000;
/// Cap on matching line numbers recorded in the scan artifact.
const MAX_RECORDED_LINES: usize = 100;

// ============================================================================
// SECTION: Input Parsing
// ============================================================================

/// Parses tool inputs as a JSON object; anything else is an invalid pick.
fn parse_inputs(input_json: &str) -> Result<Map<String, Value>, ToolOutcome> {
    match serde_json::from_str::<Value>(input_json) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ToolOutcome::invalid_pick("inputs must be a JSON object")),
        Err(err) => Err(ToolOutcome::invalid_pick(format!("inputs are not valid JSON: {err}"))),
    }
}

/// Extracts a required string input.
fn required_str<'a>(
    inputs: &'a Map<String, Value>,
    key: &str,
) -> Result<&'a str, ToolOutcome> {
    inputs
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolOutcome::invalid_pick(format!("missing required input: {key}")))
}

// ============================================================================
// SECTION: Terminal Tools
// ============================================================================

/// Inert invoker for `AID.NOOP.v1`.
struct NoopTool;

impl ToolInvoker for NoopTool {
    fn invoke(&self, _input_json: &str, _tx: &mut Tx) -> ToolOutcome {
        ToolOutcome::ok("{}")
    }
}

/// Inert invoker for `AID.ASK_SUP.v1`; the runner writes the DS1 marker.
struct AskSupTool;

impl ToolInvoker for AskSupTool {
    fn invoke(&self, _input_json: &str, _tx: &mut Tx) -> ToolOutcome {
        ToolOutcome::ok("{}")
    }
}

// ============================================================================
// SECTION: Error Scan
// ============================================================================

/// Scans a file for a regex and writes a `table` artifact to DS0.
struct ErrorScanTool;

impl ToolInvoker for ErrorScanTool {
    fn invoke(&self, input_json: &str, tx: &mut Tx) -> ToolOutcome {
        let inputs = match parse_inputs(input_json) {
            Ok(inputs) => inputs,
            Err(outcome) => return outcome,
        };
        let input_path = match required_str(&inputs, "input_path") {
            Ok(path) => path,
            Err(outcome) => return outcome,
        };
        let pattern = match required_str(&inputs, "pattern") {
            Ok(pattern) => pattern,
            Err(outcome) => return outcome,
        };
        let max_rows =
            inputs.get("max_rows").and_then(Value::as_u64).unwrap_or(DEFAULT_MAX_ROWS);

        let regex = match Regex::new(pattern) {
            Ok(regex) => regex,
            Err(err) => {
                return ToolOutcome::invalid_pick(format!("invalid pattern: {err}"));
            }
        };
        let file = match File::open(input_path) {
            Ok(file) => file,
            Err(err) => {
                return ToolOutcome::tool_error(format!("open {input_path}: {err}"));
            }
        };

        let mut matches = 0_u64;
        let mut lines = Vec::new();
        let mut scanned_rows = 0_u64;
        for (number, line) in BufReader::new(file).lines().enumerate() {
            if scanned_rows >= max_rows {
                break;
            }
            scanned_rows += 1;
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    return ToolOutcome::tool_error(format!("read {input_path}: {err}"));
                }
            };
            if regex.is_match(&line) {
                matches += 1;
                if lines.len() < MAX_RECORDED_LINES {
                    lines.push(number + 1);
                }
            }
        }

        let content = json!({
            "matches": matches,
            "lines": lines,
            "pattern": pattern,
            "scanned_rows": scanned_rows,
        });
        let artifact = Artifact::new("table", content.to_string(), AID_ERROR_SCAN);
        tx.tmp_mut().set_slot(SlotIndex::DS0, Some(artifact));
        ToolOutcome::ok(content.to_string())
    }
}

// ============================================================================
// SECTION: Put Text
// ============================================================================

/// Writes a text artifact to a chosen slot; pure and deterministic.
struct PutTextTool;

impl ToolInvoker for PutTextTool {
    fn invoke(&self, input_json: &str, tx: &mut Tx) -> ToolOutcome {
        let inputs = match parse_inputs(input_json) {
            Ok(inputs) => inputs,
            Err(outcome) => return outcome,
        };
        let text = match required_str(&inputs, "text") {
            Ok(text) => text,
            Err(outcome) => return outcome,
        };
        let raw_slot = inputs.get("slot").and_then(Value::as_u64).unwrap_or(0);
        let Some(index) = u8::try_from(raw_slot).ok().and_then(SlotIndex::from_raw) else {
            return ToolOutcome::invalid_pick(format!("slot out of range: {raw_slot}"));
        };
        let kind = inputs.get("kind").and_then(Value::as_str).unwrap_or("text");

        let content = json!({"text": text});
        let artifact = Artifact::new(kind, content.to_string(), AID_PUT_TEXT);
        tx.tmp_mut().set_slot(index, Some(artifact));
        ToolOutcome::ok(content.to_string())
    }
}

// ============================================================================
// SECTION: Registration
// ============================================================================

/// Registers the builtin tool set through a registrar.
///
/// # Errors
///
/// Returns [`RegistrarError`] when a builtin AID is already taken.
pub fn register_builtin_tools(registrar: &dyn ToolRegistrar) -> Result<(), RegistrarError> {
    registrar.register_tool(
        ToolDesc::new(AID_NOOP, "No-op").deterministic(true).tags(vec!["terminal".to_string()]),
        Arc::new(NoopTool),
        false,
    )?;
    registrar.register_tool(
        ToolDesc::new(AID_ASK_SUP, "Ask supervisor")
            .deterministic(true)
            .tags(vec!["terminal".to_string()]),
        Arc::new(AskSupTool),
        false,
    )?;
    registrar.register_tool(
        ToolDesc::new(AID_ERROR_SCAN, "Error scan")
            .deterministic(true)
            .tags(vec!["scan".to_string(), "error".to_string(), "table".to_string()])
            .side_effects(vec!["fs_read".to_string()])
            .replay_inputs(vec!["input_path".to_string(), "pattern".to_string()]),
        Arc::new(ErrorScanTool),
        false,
    )?;
    registrar.register_tool(
        ToolDesc::new(AID_PUT_TEXT, "Put text")
            .deterministic(true)
            .tags(vec!["write".to_string(), "text".to_string()])
            .tier(LeaseTier::Safe),
        Arc::new(PutTextTool),
        false,
    )?;
    Ok(())
}

// ============================================================================
// SECTION: Unit Tests
// ============================================================================
