// crates/machina-audit/src/verify.rs
// ============================================================================
// Module: Audit Log Verification
// Description: Chain verification and structural run summaries.
// Purpose: Report what a log contains and where its chain breaks.
// Dependencies: machina-core, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Structural verification parses every line of a log, recomputes each chain
//! link, and reports a [`LogSummary`]: event counts, per-AID ok/error/duration
//! totals, parse-error and chain-link-error counts. Corruption is counted and
//! reported, never repaired — a summary over a damaged log is still a
//! faithful description of the damage.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;

use machina_core::AuditEvent;
use machina_core::EventKind;
use machina_core::compute_chain_hash;
use serde::Deserialize;
use serde::Serialize;

use crate::log::AuditError;

// ============================================================================
// SECTION: Summaries
// ============================================================================

/// Per-AID dispatch totals.
///
/// # Invariants
/// - `total_duration_ms` sums only `tool_ok` durations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AidSummary {
    /// Number of `tool_ok` events.
    pub ok_count: u64,
    /// Number of `tool_error` events.
    pub error_count: u64,
    /// Sum of recorded `duration_ms` across `tool_ok` events.
    pub total_duration_ms: u64,
}

/// Structural summary of one audit log.
///
/// # Invariants
/// - `chain_link_errors` counts positions where a recorded link failed to
///   verify; a verified log reports zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSummary {
    /// Total parsed events.
    pub events_total: u64,
    /// Event counts keyed by event name.
    pub event_counts: BTreeMap<String, u64>,
    /// Dispatch totals keyed by AID.
    pub per_aid: BTreeMap<String, AidSummary>,
    /// Lines that failed to parse as events.
    pub parse_errors: u64,
    /// Chain positions whose recorded link did not verify.
    pub chain_link_errors: u64,
}

// ============================================================================
// SECTION: Chain Verification
// ============================================================================

/// Counts chain-link errors across an event sequence.
///
/// Two checks run per event: the recorded `chain_prev` must equal the
/// previous event's `chain_hash` (empty for the first), and the recorded
/// `chain_hash` must recompute from the event's own content. Events whose
/// content cannot be canonicalized count as link errors.
#[must_use]
pub fn count_chain_link_errors(events: &[AuditEvent]) -> u64 {
    let mut errors = 0;
    let mut prev = String::new();
    for event in events {
        if event.chain_prev != prev {
            errors += 1;
        }
        match compute_chain_hash(&event.chain_prev, event) {
            Ok(recomputed) if recomputed == event.chain_hash => {}
            _ => errors += 1,
        }
        prev = event.chain_hash.clone();
    }
    errors
}

// ============================================================================
// SECTION: Summarization
// ============================================================================

/// Summarizes a parsed event sequence.
#[must_use]
pub fn summarize_events(events: &[AuditEvent], parse_errors: u64) -> LogSummary {
    let mut summary = LogSummary {
        events_total: events.len() as u64,
        parse_errors,
        chain_link_errors: count_chain_link_errors(events),
        ..LogSummary::default()
    };
    for event in events {
        *summary.event_counts.entry(event.event.as_str().to_string()).or_insert(0) += 1;
        match event.event {
            EventKind::ToolOk => {
                let aid = payload_aid(event);
                let entry = summary.per_aid.entry(aid).or_default();
                entry.ok_count += 1;
                entry.total_duration_ms +=
                    event.payload.get("duration_ms").and_then(serde_json::Value::as_u64).unwrap_or(0);
            }
            EventKind::ToolError => {
                let aid = payload_aid(event);
                summary.per_aid.entry(aid).or_default().error_count += 1;
            }
            _ => {}
        }
    }
    summary
}

/// Extracts the AID from a dispatch payload, defaulting to `unknown`.
fn payload_aid(event: &AuditEvent) -> String {
    event
        .payload
        .get("aid")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

/// Reads a log file and summarizes it, tolerating damaged lines.
///
/// Unparseable lines are counted in `parse_errors` and additionally break
/// the chain at their position (the surrounding links cannot verify).
///
/// # Errors
///
/// Returns [`AuditError::Io`] when the file itself cannot be read.
pub fn summarize(path: &Path) -> Result<LogSummary, AuditError> {
    let file = File::open(path).map_err(|source| AuditError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut parse_errors = 0_u64;
    for line in reader.lines() {
        let line = line.map_err(|source| AuditError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<AuditEvent>(&line) {
            Ok(event) => events.push(event),
            Err(_) => parse_errors += 1,
        }
    }
    let mut summary = summarize_events(&events, parse_errors);
    // A dropped or mangled line leaves a gap the recomputation above cannot
    // see when the neighbours happen to re-link; count the damage explicitly.
    summary.chain_link_errors += parse_errors;
    Ok(summary)
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

    use machina_core::ProfileId;
    use machina_core::RunHeader;
    use machina_core::RunId;
    use machina_core::Timestamp;
    use serde_json::json;

    use super::*;

    /// Builds a chained sequence with one tool_ok and one tool_error.
    fn sample_events() -> Vec<AuditEvent> {
        let header = RunHeader::new(ProfileId::new("dev"), RunId::new("run-v"), None);
        let specs = [
            (EventKind::RunStart, json!({})),
            (EventKind::ToolOk, json!({"aid": "AID.SCAN.v1", "duration_ms": 12})),
            (EventKind::ToolOk, json!({"aid": "AID.SCAN.v1", "duration_ms": 8})),
            (EventKind::ToolError, json!({"aid": "AID.SHELL.v1", "error": "denied"})),
            (EventKind::GoalDone, json!({})),
        ];
        let mut prev = String::new();
        let mut events = Vec::new();
        for (step, (kind, payload)) in specs.into_iter().enumerate() {
            let event = AuditEvent::unchained(
                &header,
                step as u64,
                kind,
                Timestamp::from_millis(1_000 + step as u64),
                payload,
            )
            .into_chained(prev.clone())
            .unwrap();
            prev = event.chain_hash.clone();
            events.push(event);
        }
        events
    }

    #[test]
    fn summary_counts_events_and_aids() {
        let summary = summarize_events(&sample_events(), 0);
        assert_eq!(summary.events_total, 5);
        assert_eq!(summary.event_counts["tool_ok"], 2);
        assert_eq!(summary.event_counts["tool_error"], 1);
        assert_eq!(summary.per_aid["AID.SCAN.v1"].ok_count, 2);
        assert_eq!(summary.per_aid["AID.SCAN.v1"].total_duration_ms, 20);
        assert_eq!(summary.per_aid["AID.SHELL.v1"].error_count, 1);
        assert_eq!(summary.chain_link_errors, 0);
    }

    #[test]
    fn tampered_payload_is_counted_as_link_error() {
        let mut events = sample_events();
        events[1].payload = json!({"aid": "AID.SCAN.v1", "duration_ms": 9_999});
        assert!(count_chain_link_errors(&events) >= 1);
    }

    #[test]
    fn summarize_tolerates_and_counts_damaged_lines() {
        let events = sample_events();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_damaged.jsonl");
        let mut body = String::new();
        for (index, event) in events.iter().enumerate() {
            if index == 2 {
                body.push_str("{{{ damaged line\n");
            } else {
                body.push_str(&serde_json::to_string(event).unwrap());
                body.push('\n');
            }
        }
        std::fs::write(&path, body).unwrap();

        let summary = summarize(&path).unwrap();
        assert_eq!(summary.parse_errors, 1);
        assert_eq!(summary.events_total, 4);
        assert!(summary.chain_link_errors >= 1);
    }
}
