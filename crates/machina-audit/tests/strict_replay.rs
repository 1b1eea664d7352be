// crates/machina-audit/tests/strict_replay.rs
// ============================================================================
// Module: Strict Replay Integration Tests
// Description: End-to-end replay of recorded logs, including failure shapes.
// ============================================================================
//! ## Overview
//! Writes real log files through the audit writer, then replays them:
//! non-deterministic tools must replay from logged patches without
//! re-invocation, and a logged patch addressing a slot outside `0..=7` must
//! fail the replay naming the offending step.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use machina_audit::AuditLog;
use machina_audit::ReplayError;
use machina_audit::ReplayToolSource;
use machina_audit::read_events;
use machina_audit::replay_strict;
use machina_audit::summarize;
use machina_core::Aid;
use machina_core::EventKind;
use machina_core::ProfileId;
use machina_core::RunHeader;
use machina_core::RunId;
use machina_core::SlotIndex;
use machina_core::ToolDesc;
use machina_core::ToolInvoker;
use machina_core::ToolOutcome;
use machina_core::Tx;
use serde_json::Map;
use serde_json::json;

/// Invoker that counts invocations; replay must never call it for
/// non-deterministic descriptors.
struct CountingInvoker {
    /// Number of `invoke` calls observed.
    calls: AtomicU64,
}

impl ToolInvoker for CountingInvoker {
    fn invoke(&self, _input_json: &str, _tx: &mut Tx) -> ToolOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ToolOutcome::ok("{}")
    }
}

/// Source exposing one non-deterministic tool backed by `CountingInvoker`.
struct NonDetSource {
    /// Shared invoker so the test can read the call count.
    invoker: Arc<CountingInvoker>,
}

impl ReplayToolSource for NonDetSource {
    fn replay_tool(&self, aid: &Aid) -> Option<(ToolDesc, Arc<dyn ToolInvoker>)> {
        (aid.as_str() == "AID.SAMPLE.v1").then(|| {
            (
                ToolDesc::new("AID.SAMPLE.v1", "Sample").deterministic(false),
                Arc::clone(&self.invoker) as Arc<dyn ToolInvoker>,
            )
        })
    }
}

/// Writes a minimal run log with one `tool_ok` carrying the given patch.
fn write_run_log(dir: &std::path::Path, run: &str, tx_patch: serde_json::Value) -> std::path::PathBuf {
    let header = RunHeader::new(ProfileId::new("dev"), RunId::new(run), None);
    let log = AuditLog::create(dir, header).unwrap();
    log.append(0, EventKind::RunStart, json!({"goal_id": "goal.SAMPLE.v1"})).unwrap();
    log.append(0, EventKind::MenuBuilt, json!({"menu_digest": "m0"})).unwrap();
    log.append(
        0,
        EventKind::ToolOk,
        json!({"aid": "AID.SAMPLE.v1", "duration_ms": 5, "status": "OK", "tx_patch": tx_patch}),
    )
    .unwrap();
    log.append(0, EventKind::GoalDone, json!({})).unwrap();
    log.path().to_path_buf()
}

#[test]
fn non_deterministic_tool_is_not_reinvoked() {
    let dir = tempfile::tempdir().unwrap();
    let patch = json!([{
        "op": "add",
        "path": "/slots/0",
        "value": {
            "kind": "table",
            "content_json": r#"{"matches":3}"#,
            "provenance": "sample",
            "size_bytes": 13
        }
    }]);
    let path = write_run_log(dir.path(), "s5-ok", patch);

    let invoker = Arc::new(CountingInvoker {
        calls: AtomicU64::new(0),
    });
    let source = NonDetSource {
        invoker: Arc::clone(&invoker),
    };

    let events = read_events(&path).unwrap();
    let outcome = replay_strict(&events, &Map::new(), &source).unwrap();

    assert_eq!(invoker.calls.load(Ordering::SeqCst), 0, "tool must not be re-invoked");
    let artifact = outcome.final_state.slot(SlotIndex::from_raw(0).unwrap()).unwrap();
    assert_eq!(artifact.content_json, r#"{"matches":3}"#);
    assert_eq!(outcome.steps_applied, 1);
}

#[test]
fn out_of_range_slot_path_fails_with_step_and_path() {
    let dir = tempfile::tempdir().unwrap();
    let patch = json!([{
        "op": "add",
        "path": "/slots/8",
        "value": {
            "kind": "table",
            "content_json": "{}",
            "provenance": "sample",
            "size_bytes": 2
        }
    }]);
    let path = write_run_log(dir.path(), "s5-bad", patch);

    let invoker = Arc::new(CountingInvoker {
        calls: AtomicU64::new(0),
    });
    let source = NonDetSource {
        invoker,
    };

    let events = read_events(&path).unwrap();
    let err = replay_strict(&events, &Map::new(), &source).unwrap_err();
    assert!(matches!(err, ReplayError::MalformedPatch { step: 0, .. }));
    let message = err.to_string();
    assert!(message.starts_with("REPLAY_STRICT FAIL step 0"));
    assert!(message.contains("/slots/8"));
}

#[test]
fn written_log_verifies_and_summarizes_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let patch = json!([]);
    let path = write_run_log(dir.path(), "s5-summary", patch);

    let summary = summarize(&path).unwrap();
    assert_eq!(summary.chain_link_errors, 0);
    assert_eq!(summary.parse_errors, 0);
    assert_eq!(summary.event_counts["run_start"], 1);
    assert_eq!(summary.event_counts["tool_ok"], 1);
    assert_eq!(summary.per_aid["AID.SAMPLE.v1"].ok_count, 1);
    assert_eq!(summary.per_aid["AID.SAMPLE.v1"].total_duration_ms, 5);
}
