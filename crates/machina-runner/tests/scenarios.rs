// crates/machina-runner/tests/scenarios.rs
// ============================================================================
// Module: Goal Loop Scenario Tests
// Description: End-to-end runs exercising completion, budgets, and leases.
// ============================================================================
//! ## Overview
//! Drives whole runs through the runner with real audit logs on disk:
//! a scan goal that completes, a step-budget trip, a loop-guard trip, an
//! invalid-pick budget trip, and lease gating of a tier-2 tool.

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

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use machina_audit::read_events;
use machina_audit::summarize;
use machina_core::Aid;
use machina_core::Artifact;
use machina_core::Budget;
use machina_core::DecisionSource;
use machina_core::DsState;
use machina_core::EventKind;
use machina_core::GoalDesc;
use machina_core::GoalRegistry;
use machina_core::LeaseTier;
use machina_core::ProfileId;
use machina_core::RunRequest;
use machina_core::Selection;
use machina_core::SelectionContext;
use machina_core::SelectionOutcome;
use machina_core::SelectorSource;
use machina_core::SlotIndex;
use machina_core::ToolDesc;
use machina_core::ToolInvoker;
use machina_core::ToolOutcome;
use machina_core::Tx;
use machina_runner::Runner;
use machina_runner::RunnerConfig;
use machina_runner::Termination;
use machina_selector::FallbackSelector;
use machina_selector::Selector;
use machina_tools::LeaseManager;
use machina_tools::ToolRegistry;
use machina_tools::register_builtin_tools;
use serde_json::json;

// ============================================================================
// SECTION: Test Tools
// ============================================================================

/// Tool that writes a changing counter artifact to DS2 every call.
struct SpinTool {
    /// Monotonic counter making every commit distinct.
    counter: AtomicU64,
}

impl ToolInvoker for SpinTool {
    fn invoke(&self, _input_json: &str, tx: &mut Tx) -> ToolOutcome {
        let tick = self.counter.fetch_add(1, Ordering::SeqCst);
        tx.tmp_mut().set_slot(
            SlotIndex::from_raw(2).unwrap(),
            Some(Artifact::new("text", format!(r#"{{"tick":{tick}}}"#), "spin")),
        );
        ToolOutcome::ok("{}")
    }
}

/// Tool that does nothing at all; state digests never change.
struct StallTool;

impl ToolInvoker for StallTool {
    fn invoke(&self, _input_json: &str, _tx: &mut Tx) -> ToolOutcome {
        ToolOutcome::ok("{}")
    }
}

/// Tier-2 tool that writes DS0 when it is allowed to run.
struct ShellTool;

impl ToolInvoker for ShellTool {
    fn invoke(&self, _input_json: &str, tx: &mut Tx) -> ToolOutcome {
        tx.tmp_mut().set_slot(
            SlotIndex::DS0,
            Some(Artifact::new("text", r#"{"ran":true}"#, "shell")),
        );
        ToolOutcome::ok(r#"{"ran":true}"#)
    }
}

/// Decision source that always answers the same selection.
struct FixedSource {
    /// Selection returned on every step.
    selection: Selection,
    /// Raw output recorded alongside it.
    raw: String,
}

impl DecisionSource for FixedSource {
    fn decide(&self, _ctx: &SelectionContext<'_>) -> SelectionOutcome {
        SelectionOutcome::new(
            self.selection.clone(),
            self.raw.clone(),
            SelectorSource::Policy,
        )
    }
}

// ============================================================================
// SECTION: Harness
// ============================================================================

/// Everything a scenario needs.
struct Harness {
    /// Temp dir keeping audit logs alive for the test.
    _dir: tempfile::TempDir,
    /// The runner under test.
    runner: Runner,
}

/// Builds a harness over the builtin tools plus the given extras.
fn harness(
    goals: Vec<GoalDesc>,
    extra_tools: Vec<(ToolDesc, Arc<dyn ToolInvoker>)>,
    selector: Arc<dyn DecisionSource>,
    budget: Budget,
    leases: Option<Arc<LeaseManager>>,
) -> Harness {
    let registry = Arc::new(ToolRegistry::new());
    register_builtin_tools(registry.as_ref()).unwrap();
    for (desc, invoker) in extra_tools {
        registry.register(desc, invoker, false).unwrap();
    }

    let mut goal_registry = GoalRegistry::new();
    for goal in goals {
        goal_registry.register(goal);
    }

    let dir = tempfile::tempdir().unwrap();
    let mut config =
        RunnerConfig::new(dir.path().to_path_buf(), ProfileId::new("dev"));
    config.budget = budget;
    config.lease_enforce = leases.is_some();

    let mut runner = Runner::new(Arc::clone(&registry), goal_registry, selector, config);
    if let Some(leases) = leases {
        runner = runner.with_leases(leases);
    }
    Harness {
        _dir: dir,
        runner,
    }
}

/// Returns the ordered event kinds of a run's audit log.
fn event_kinds(path: &std::path::Path) -> Vec<EventKind> {
    read_events(path).unwrap().into_iter().map(|event| event.event).collect()
}

/// Returns the slot index for a raw value.
fn slot(raw: u8) -> SlotIndex {
    SlotIndex::from_raw(raw).unwrap()
}

// ============================================================================
// SECTION: S1 — Error Scan
// ============================================================================

#[test]
fn error_scan_goal_completes_with_three_matches() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "2024-01-01 INFO boot").unwrap();
    writeln!(file, "2024-01-01 ERROR disk").unwrap();
    writeln!(file, "2024-01-01 ERROR net").unwrap();
    writeln!(file, "2024-01-01 WARN heat").unwrap();
    writeln!(file, "2024-01-01 ERROR cpu").unwrap();
    file.flush().unwrap();

    let goal = GoalDesc::new("goal.ERROR_SCAN.v1")
        .candidate_tags(vec!["scan".to_string()])
        .required_tools(vec![Aid::new("AID.ERROR_SCAN.v1")])
        .required_slots(vec![SlotIndex::DS0]);
    let selector = Arc::new(Selector::fallback_only(FallbackSelector::new(vec![
        "scan".to_string(),
    ])));
    let harness = harness(vec![goal], vec![], selector, Budget::default(), None);

    let mut request = RunRequest::new("goal.ERROR_SCAN.v1");
    request.inputs.insert("input_path".to_string(), json!(file.path().display().to_string()));
    request.inputs.insert("pattern".to_string(), json!("ERROR"));
    request.inputs.insert("max_rows".to_string(), json!(1000));

    let outcome = harness.runner.run(&request).unwrap();
    assert_eq!(outcome.termination, Termination::GoalDone {
        via: "goal".to_string(),
    });

    let events = read_events(&outcome.audit_path).unwrap();
    let kinds: Vec<EventKind> = events.iter().map(|event| event.event).collect();
    assert!(kinds.contains(&EventKind::MenuBuilt));
    assert!(kinds.contains(&EventKind::SelectorChosen));
    assert_eq!(*kinds.last().unwrap(), EventKind::GoalDone);

    let tool_ok = events.iter().find(|event| event.event == EventKind::ToolOk).unwrap();
    assert_eq!(tool_ok.payload["aid"], "AID.ERROR_SCAN.v1");
    assert!(tool_ok.payload["duration_ms"].is_u64());
    let patch = &tool_ok.payload["tx_patch"];
    assert_eq!(patch[0]["op"], "add");
    assert_eq!(patch[0]["path"], "/slots/0");
    let content: serde_json::Value =
        serde_json::from_str(patch[0]["value"]["content_json"].as_str().unwrap()).unwrap();
    assert_eq!(content["matches"], 3);

    let artifact = outcome.final_state.slot(SlotIndex::DS0).unwrap();
    assert_eq!(artifact.kind, "table");

    // The recorded log verifies cleanly end to end.
    let summary = summarize(&outcome.audit_path).unwrap();
    assert_eq!(summary.chain_link_errors, 0);
}

// ============================================================================
// SECTION: S2 — Budget Trip
// ============================================================================

#[test]
fn never_completing_goal_trips_max_steps_after_three_tool_oks() {
    let goal = GoalDesc::new("goal.SPIN.v1").candidate_tags(vec!["spin".to_string()]);
    let spin = ToolDesc::new("AID.SPIN.v1", "Spin").tags(vec!["spin".to_string()]);
    let selector = Arc::new(Selector::fallback_only(FallbackSelector::new(vec![
        "spin".to_string(),
    ])));
    let harness = harness(
        vec![goal],
        vec![(spin, Arc::new(SpinTool {
            counter: AtomicU64::new(0),
        }))],
        selector,
        Budget::new(3, 8),
        None,
    );

    let outcome = harness.runner.run(&RunRequest::new("goal.SPIN.v1")).unwrap();
    assert_eq!(outcome.termination, Termination::BreakerTrip {
        reason: "max_steps".to_string(),
    });

    let kinds = event_kinds(&outcome.audit_path);
    let tool_oks = kinds.iter().filter(|kind| **kind == EventKind::ToolOk).count();
    assert_eq!(tool_oks, 3, "exactly three tool_ok events before the trip");
    assert_eq!(*kinds.last().unwrap(), EventKind::BreakerTrip);

    let events = read_events(&outcome.audit_path).unwrap();
    let trip = events.last().unwrap();
    assert_eq!(trip.payload["reason"], "max_steps");
}

// ============================================================================
// SECTION: S3 — Loop Guard
// ============================================================================

#[test]
fn stalled_state_trips_loop_guard() {
    let goal = GoalDesc::new("goal.STALL.v1").candidate_tags(vec!["stall".to_string()]);
    let stall = ToolDesc::new("AID.STALL.v1", "Stall").tags(vec!["stall".to_string()]);
    let selector = Arc::new(Selector::fallback_only(FallbackSelector::new(vec![
        "stall".to_string(),
    ])));
    let harness = harness(
        vec![goal],
        vec![(stall, Arc::new(StallTool))],
        selector,
        Budget::default(),
        None,
    );

    let outcome = harness.runner.run(&RunRequest::new("goal.STALL.v1")).unwrap();
    assert_eq!(outcome.termination, Termination::BreakerTrip {
        reason: "loop_guard".to_string(),
    });

    let events = read_events(&outcome.audit_path).unwrap();
    let trip = events.last().unwrap();
    assert_eq!(trip.payload["reason"], "loop_guard");
    // Two identical dispatches happen before the third identical observation.
    let tool_oks = events.iter().filter(|event| event.event == EventKind::ToolOk).count();
    assert_eq!(tool_oks, 2);
}

// ============================================================================
// SECTION: S4 — Invalid Pick Quota
// ============================================================================

#[test]
fn invalid_picks_exhaust_their_budget() {
    let goal = GoalDesc::new("goal.LOST.v1").candidate_tags(vec!["scan".to_string()]);
    let selector = Arc::new(FixedSource {
        selection: Selection::Invalid,
        raw: "<PICK><SID9999><END>".to_string(),
    });
    let harness = harness(vec![goal], vec![], selector, Budget::new(64, 2), None);

    let outcome = harness.runner.run(&RunRequest::new("goal.LOST.v1")).unwrap();
    assert_eq!(outcome.termination, Termination::BreakerTrip {
        reason: "invalid_picks".to_string(),
    });
    assert_eq!(outcome.invalid_picks, 2);

    let events = read_events(&outcome.audit_path).unwrap();
    let invalids: Vec<_> =
        events.iter().filter(|event| event.event == EventKind::InvalidPick).collect();
    assert_eq!(invalids.len(), 2);
    assert_eq!(invalids[0].payload["raw_output"], "<PICK><SID9999><END>");
    assert_eq!(events.last().unwrap().payload["reason"], "invalid_picks");
}

// ============================================================================
// SECTION: S6 — Lease Gating
// ============================================================================

/// Builds the tier-2 shell harness used by both lease tests.
fn shell_harness(leases: Arc<LeaseManager>) -> Harness {
    let goal = GoalDesc::new("goal.SHELL.v1")
        .candidate_tags(vec!["shell".to_string()])
        .required_slots(vec![SlotIndex::DS0]);
    let shell = ToolDesc::new("AID.SHELL.v1", "Shell")
        .tags(vec!["shell".to_string()])
        .side_effects(vec!["shell".to_string()])
        .tier(LeaseTier::System);
    let selector = Arc::new(Selector::fallback_only(FallbackSelector::new(vec![
        "shell".to_string(),
    ])));
    harness(
        vec![goal],
        vec![(shell, Arc::new(ShellTool))],
        selector,
        Budget::new(2, 8),
        Some(leases),
    )
}

#[test]
fn missing_lease_blocks_tier_two_tool_without_commit() {
    let harness = shell_harness(Arc::new(LeaseManager::new()));
    let outcome = harness.runner.run(&RunRequest::new("goal.SHELL.v1")).unwrap();

    assert_eq!(outcome.termination, Termination::BreakerTrip {
        reason: "max_steps".to_string(),
    });
    assert_eq!(outcome.final_state, DsState::new(), "no commit happened");

    let events = read_events(&outcome.audit_path).unwrap();
    let error = events.iter().find(|event| event.event == EventKind::ToolError).unwrap();
    assert_eq!(error.payload["reason"], "lease_required");
    assert_eq!(error.payload["tier"], 2);
    assert!(!events.iter().any(|event| event.event == EventKind::ToolOk));
}

#[test]
fn valid_lease_admits_tier_two_tool_and_is_consumed() {
    let leases = Arc::new(LeaseManager::new());
    let token = leases.issue("AID.SHELL.v1", LeaseTier::System, 60_000, "test");
    let harness = shell_harness(Arc::clone(&leases));

    let mut request = RunRequest::new("goal.SHELL.v1");
    request.inputs.insert("_lease_token".to_string(), json!(token.id.as_str()));
    let outcome = harness.runner.run(&request).unwrap();

    assert_eq!(outcome.termination, Termination::GoalDone {
        via: "goal".to_string(),
    });
    assert!(outcome.final_state.is_occupied(SlotIndex::DS0));

    let events = read_events(&outcome.audit_path).unwrap();
    assert!(events.iter().any(|event| event.event == EventKind::LeaseConsumed));
    assert_eq!(leases.stats_snapshot().consumed, 1);

    // The token is single-use: a second run with the same token is refused.
    let outcome = harness.runner.run(&request).unwrap();
    assert_eq!(outcome.termination, Termination::BreakerTrip {
        reason: "max_steps".to_string(),
    });
    let events = read_events(&outcome.audit_path).unwrap();
    let error = events.iter().find(|event| event.event == EventKind::ToolError).unwrap();
    assert_eq!(error.payload["reason"], "lease_rejected");
    assert_eq!(error.payload["detail"], "consumed");
}

// ============================================================================
// SECTION: Terminal Selections
// ============================================================================

#[test]
fn noop_selection_ends_the_run_ok() {
    let goal = GoalDesc::new("goal.IDLE.v1").candidate_tags(vec!["none".to_string()]);
    // No tool carries the tag, so the fallback emits Noop immediately.
    let selector = Arc::new(Selector::fallback_only(FallbackSelector::new(vec![
        "none".to_string(),
    ])));
    let harness = harness(vec![goal], vec![], selector, Budget::default(), None);

    let outcome = harness.runner.run(&RunRequest::new("goal.IDLE.v1")).unwrap();
    assert_eq!(outcome.termination, Termination::GoalDone {
        via: "noop".to_string(),
    });
    let events = read_events(&outcome.audit_path).unwrap();
    assert_eq!(events.last().unwrap().payload["via"], "noop");
}

#[test]
fn ask_sup_selection_writes_supervisor_marker_to_ds1() {
    let goal = GoalDesc::new("goal.HELP.v1").candidate_tags(vec!["scan".to_string()]);
    let selector = Arc::new(FixedSource {
        selection: Selection::AskSup,
        raw: "<ASK_SUP><END>".to_string(),
    });
    let harness = harness(vec![goal], vec![], selector, Budget::default(), None);

    let outcome = harness.runner.run(&RunRequest::new("goal.HELP.v1")).unwrap();
    assert_eq!(outcome.termination, Termination::GoalDone {
        via: "ask_sup".to_string(),
    });
    let marker = outcome.final_state.slot(slot(1)).unwrap();
    assert_eq!(marker.kind, "supervisor_request");
}

// ============================================================================
// SECTION: Replay Equivalence
// ============================================================================

#[test]
fn deterministic_run_replays_to_the_same_final_state() {
    let goal = GoalDesc::new("goal.PUT.v1")
        .candidate_tags(vec!["text".to_string()])
        .required_slots(vec![SlotIndex::DS0]);
    let selector = Arc::new(Selector::fallback_only(FallbackSelector::new(vec![
        "text".to_string(),
    ])));
    let harness = harness(vec![goal], vec![], selector, Budget::default(), None);

    let mut request = RunRequest::new("goal.PUT.v1");
    request.inputs.insert("text".to_string(), json!("replayable"));
    request.inputs.insert("slot".to_string(), json!(0));
    let outcome = harness.runner.run(&request).unwrap();
    assert_eq!(outcome.termination, Termination::GoalDone {
        via: "goal".to_string(),
    });

    // Replay against a fresh registry exposing the same builtin tools.
    let registry = ToolRegistry::new();
    register_builtin_tools(&registry).unwrap();
    let events = read_events(&outcome.audit_path).unwrap();
    let replay = machina_audit::replay_strict(&events, &request.inputs, &registry).unwrap();

    // AID.PUT_TEXT.v1 is deterministic with no replay fences, so the replay
    // re-executes it and its patch must match the log byte for byte.
    assert_eq!(replay.steps_reexecuted, 1);
    assert_eq!(replay.steps_applied, 0);
    assert_eq!(replay.final_state, outcome.final_state);
}

// ============================================================================
// SECTION: Audit Ordering
// ============================================================================

#[test]
fn step_events_appear_in_contract_order() {
    let goal = GoalDesc::new("goal.ORDER.v1")
        .candidate_tags(vec!["scan".to_string()])
        .required_slots(vec![SlotIndex::DS0]);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "ERROR once").unwrap();
    file.flush().unwrap();

    let selector = Arc::new(Selector::fallback_only(FallbackSelector::new(vec![
        "scan".to_string(),
    ])));
    let harness = harness(vec![goal], vec![], selector, Budget::default(), None);

    let mut request = RunRequest::new("goal.ORDER.v1");
    request.inputs.insert("input_path".to_string(), json!(file.path().display().to_string()));
    request.inputs.insert("pattern".to_string(), json!("ERROR"));

    let outcome = harness.runner.run(&request).unwrap();
    let kinds = event_kinds(&outcome.audit_path);
    assert_eq!(kinds, vec![
        EventKind::RunStart,
        EventKind::MenuBuilt,
        EventKind::SelectorInvoked,
        EventKind::SelectorChosen,
        EventKind::ToolInvoked,
        EventKind::ToolOk,
        EventKind::GoalDone,
    ]);
}
