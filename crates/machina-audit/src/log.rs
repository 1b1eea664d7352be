// crates/machina-audit/src/log.rs
// ============================================================================
// Module: Audit Log Writer
// Description: Append-only JSONL writer with per-event chain linking.
// Purpose: Persist one run's events as a tamper-evident byte stream.
// Dependencies: machina-core, serde_json, thiserror
// ============================================================================

//! ## Overview
//! [`AuditLog`] writes one file per run, `run_<run_id>.jsonl`, one complete
//! JSON object per line. Appends are serialized under a mutex that also owns
//! the chain tail, so concurrent emitters observe a totally ordered,
//! correctly linked stream. The first event of a run chains from the empty
//! string. Lines are flushed per append; the log is a byte stream and a torn
//! final line is detectable because its chain will not verify.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::fs::OpenOptions;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::PoisonError;

use machina_core::AuditEvent;
use machina_core::EventKind;
use machina_core::RunHeader;
use machina_core::Timestamp;
use machina_core::hashing::HashError;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the audit writer and reader.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Log file could not be created, written, or read.
    #[error("audit io failure for {path}: {source}")]
    Io {
        /// Path of the log file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Event could not be canonicalized for chaining.
    #[error("audit chain failure: {0}")]
    Chain(#[from] HashError),
    /// Event could not be serialized to a JSONL line.
    #[error("audit serialization failure: {0}")]
    Serialize(String),
    /// A line could not be parsed as an audit event.
    #[error("audit parse failure at line {line}: {detail}")]
    Parse {
        /// One-based line number.
        line: usize,
        /// Parse error detail.
        detail: String,
    },
}

// ============================================================================
// SECTION: Writer State
// ============================================================================

/// Mutable tail owned by the append mutex.
#[derive(Debug)]
struct LogTail {
    /// Open log file handle.
    file: File,
    /// `chain_hash` of the last appended event; empty before the first.
    chain_prev: String,
    /// Number of appended events.
    appended: u64,
}

// ============================================================================
// SECTION: Audit Log
// ============================================================================

/// Append-only, chain-linked JSONL log for one run.
///
/// # Invariants
/// - Appends are totally ordered; each event's `chain_hash` reflects all
///   prior events of the run.
/// - The file is never rewritten; corruption is detected on read, not here.
#[derive(Debug)]
pub struct AuditLog {
    /// Run header stamped on every event.
    header: RunHeader,
    /// Log file path.
    path: PathBuf,
    /// Serialized append state.
    tail: Mutex<LogTail>,
}

impl AuditLog {
    /// Creates the log file `run_<run_id>.jsonl` under `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Io`] when the directory or file cannot be
    /// created.
    pub fn create(dir: &Path, header: RunHeader) -> Result<Self, AuditError> {
        std::fs::create_dir_all(dir).map_err(|source| AuditError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let path = dir.join(format!("run_{}.jsonl", header.run_id));
        let file = OpenOptions::new().create(true).append(true).open(&path).map_err(|source| {
            AuditError::Io {
                path: path.display().to_string(),
                source,
            }
        })?;
        Ok(Self {
            header,
            path,
            tail: Mutex::new(LogTail {
                file,
                chain_prev: String::new(),
                appended: 0,
            }),
        })
    }

    /// Returns the log file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the run header stamped on events.
    #[must_use]
    pub const fn header(&self) -> &RunHeader {
        &self.header
    }

    /// Returns the number of appended events.
    #[must_use]
    pub fn appended(&self) -> u64 {
        self.tail.lock().unwrap_or_else(PoisonError::into_inner).appended
    }

    /// Chains and appends one event, returning the chained record.
    ///
    /// The timestamp is read here, at the emission edge, so core value types
    /// stay clock-free.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] when chaining, serialization, or the write
    /// fails. On write failure the chain tail is not advanced.
    pub fn append(
        &self,
        step: u64,
        event: EventKind,
        payload: Value,
    ) -> Result<AuditEvent, AuditError> {
        let unchained =
            AuditEvent::unchained(&self.header, step, event, Timestamp::now(), payload);
        let mut tail = self.tail.lock().unwrap_or_else(PoisonError::into_inner);
        let chained = unchained.into_chained(tail.chain_prev.clone())?;
        let mut line = serde_json::to_string(&chained)
            .map_err(|err| AuditError::Serialize(err.to_string()))?;
        line.push('\n');
        tail.file.write_all(line.as_bytes()).map_err(|source| AuditError::Io {
            path: self.path.display().to_string(),
            source,
        })?;
        tail.file.flush().map_err(|source| AuditError::Io {
            path: self.path.display().to_string(),
            source,
        })?;
        tail.chain_prev = chained.chain_hash.clone();
        tail.appended += 1;
        Ok(chained)
    }
}

// ============================================================================
// SECTION: Reader
// ============================================================================

/// Reads all events from a JSONL audit log.
///
/// Parsing is strict: a damaged line surfaces as [`AuditError::Parse`] with
/// its one-based line number. Callers that only need a summary over damaged
/// logs use [`crate::verify::summarize`], which tolerates and counts bad
/// lines instead.
///
/// # Errors
///
/// Returns [`AuditError::Io`] when the file cannot be read and
/// [`AuditError::Parse`] on the first malformed line.
pub fn read_events(path: &Path) -> Result<Vec<AuditEvent>, AuditError> {
    let file = File::open(path).map_err(|source| AuditError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let reader = BufReader::new(file);
    let mut events = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| AuditError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if line.is_empty() {
            continue;
        }
        let event: AuditEvent =
            serde_json::from_str(&line).map_err(|err| AuditError::Parse {
                line: index + 1,
                detail: err.to_string(),
            })?;
        events.push(event);
    }
    Ok(events)
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
    use machina_core::RunId;
    use serde_json::json;

    use super::*;

    /// Builds a log in a fresh temp dir.
    fn fresh_log(run: &str) -> (tempfile::TempDir, AuditLog) {
        let dir = tempfile::tempdir().unwrap();
        let header = RunHeader::new(ProfileId::new("dev"), RunId::new(run), None);
        let log = AuditLog::create(dir.path(), header).unwrap();
        (dir, log)
    }

    #[test]
    fn file_name_embeds_run_id() {
        let (_dir, log) = fresh_log("abc-123");
        assert!(log.path().ends_with("run_abc-123.jsonl"));
    }

    #[test]
    fn appended_events_read_back_in_order() {
        let (_dir, log) = fresh_log("order");
        log.append(0, EventKind::RunStart, json!({"goal_id": "goal.X.v1"})).unwrap();
        log.append(0, EventKind::MenuBuilt, json!({"menu_digest": "d0"})).unwrap();
        log.append(1, EventKind::MenuBuilt, json!({"menu_digest": "d1"})).unwrap();

        let events = read_events(log.path()).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event, EventKind::RunStart);
        assert_eq!(events[2].step, 1);
        assert_eq!(log.appended(), 3);
    }

    #[test]
    fn appends_chain_from_empty_prev() {
        let (_dir, log) = fresh_log("chain");
        let first = log.append(0, EventKind::RunStart, json!({})).unwrap();
        let second = log.append(0, EventKind::MenuBuilt, json!({})).unwrap();
        assert_eq!(first.chain_prev, "");
        assert_eq!(second.chain_prev, first.chain_hash);
    }

    #[test]
    fn damaged_line_fails_strict_read() {
        let (_dir, log) = fresh_log("damage");
        log.append(0, EventKind::RunStart, json!({})).unwrap();
        std::fs::write(
            log.path(),
            format!("{}not json\n", std::fs::read_to_string(log.path()).unwrap()),
        )
        .unwrap();
        let err = read_events(log.path()).unwrap_err();
        assert!(matches!(err, AuditError::Parse { line: 2, .. }));
    }
}
