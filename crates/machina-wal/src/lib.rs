// crates/machina-wal/src/lib.rs
// ============================================================================
// Module: Machina WAL Library
// Description: Segmented write-ahead log and the concurrent work queue.
// Purpose: Give external collaborators durability beyond the audit log.
// Dependencies: crc32fast, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The WAL is a segmented, append-only JSONL file with size/age rotation,
//! retention enforcement, optional per-append fsync, and optional CRC-32
//! framing for integrity detection. Alongside it lives the concurrent
//! priority queue used by queue-backed collaborators: thread-safe push,
//! blocking pop with FIFO tie-break, and a shutdown that wakes every blocked
//! consumer.
//!
//! Security posture: WAL contents are caller-supplied records; framing
//! detects corruption but does not authenticate. See
//! `Docs/security/threat_model.md`.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod queue;
pub mod wal;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use queue::PriorityQueue;
pub use wal::SegmentInfo;
pub use wal::Wal;
pub use wal::WalConfig;
pub use wal::WalError;
pub use wal::WalStats;
pub use wal::WalStatsSnapshot;
