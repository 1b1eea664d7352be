// crates/machina-runner/examples/minimal.rs
// ============================================================================
// Module: Machina Minimal Example
// Description: Minimal end-to-end run using the fallback selector.
// Purpose: Demonstrate a goal completing against the builtin tool set.
// Dependencies: machina-core, machina-runner, machina-selector, machina-tools
// ============================================================================

//! ## Overview
//! Registers the builtin tools, declares a goal satisfied by a text artifact
//! in DS0, and runs it with the deterministic fallback selector. The audit
//! log lands in a temp directory; its summary prints at the end.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::print_stdout,
    clippy::use_debug,
    reason = "Example binaries may panic and print for demonstration."
)]

use std::sync::Arc;

use machina_audit::summarize;
use machina_core::GoalDesc;
use machina_core::GoalRegistry;
use machina_core::ProfileId;
use machina_core::RunRequest;
use machina_core::SlotIndex;
use machina_runner::Runner;
use machina_runner::RunnerConfig;
use machina_selector::FallbackSelector;
use machina_selector::Selector;
use machina_tools::ToolRegistry;
use machina_tools::register_builtin_tools;
use serde_json::json;

fn main() {
    let registry = Arc::new(ToolRegistry::new());
    register_builtin_tools(registry.as_ref()).expect("builtin registration");

    let mut goals = GoalRegistry::new();
    goals.register(
        GoalDesc::new("goal.HELLO.v1")
            .candidate_tags(vec!["text".to_string()])
            .required_slots(vec![SlotIndex::DS0]),
    );

    let selector =
        Arc::new(Selector::fallback_only(FallbackSelector::new(vec!["text".to_string()])));
    let audit_dir = std::env::temp_dir().join("machina-minimal");
    let config = RunnerConfig::new(audit_dir, ProfileId::new("dev"));
    let runner = Runner::new(registry, goals, selector, config);

    let mut request = RunRequest::new("goal.HELLO.v1");
    request.inputs.insert("text".to_string(), json!("hello, machina"));
    request.inputs.insert("slot".to_string(), json!(0));

    let outcome = runner.run(&request).expect("run");
    println!("run {} ended: {:?}", outcome.run_id, outcome.termination);
    println!("audit log: {}", outcome.audit_path.display());

    let summary = summarize(&outcome.audit_path).expect("summary");
    println!(
        "events={} chain_link_errors={} tool_ok={}",
        summary.events_total,
        summary.chain_link_errors,
        summary.event_counts.get("tool_ok").copied().unwrap_or(0),
    );
}
