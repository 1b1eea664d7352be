// crates/machina-audit/src/lib.rs
// ============================================================================
// Module: Machina Audit Library
// Description: Hash-chained JSONL audit log writer, verifier, and replay engine.
// Purpose: Record every run as an append-only chain and reconstruct it later.
// Dependencies: machina-core, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Machina Audit owns the durable side of the audit contract: an append-only
//! JSONL writer that chains events as they are emitted, a reader/verifier
//! that reports chain-link errors without repairing them, and the replay
//! engine that reconstructs a past run's state sequence from recorded
//! patches, re-executing only tools whose descriptors permit it.
//!
//! Security posture: log files read back from disk are untrusted input; see
//! `Docs/security/threat_model.md`.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod log;
pub mod replay;
pub mod verify;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use log::AuditError;
pub use log::AuditLog;
pub use log::read_events;
pub use replay::ReplayError;
pub use replay::ReplayOutcome;
pub use replay::ReplayToolSource;
pub use replay::replay_strict;
pub use verify::AidSummary;
pub use verify::LogSummary;
pub use verify::count_chain_link_errors;
pub use verify::summarize;
pub use verify::summarize_events;
