// crates/machina-toolhost/src/lib.rs
// ============================================================================
// Module: Machina Toolhost Library
// Description: NDJSON protocol types and the out-of-process tool service.
// Purpose: Execute side-effectful or untrusted tools behind a process wall.
// Dependencies: lru, machina-core, machina-tools, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The toolhost runs tools the runner refuses to execute in-process. Its
//! protocol is NDJSON: one [`HostRequest`] per line in, one [`HostResponse`]
//! per line out (single-shot mode reads the whole of stdin as one request).
//! The service holds a working state across serve-mode requests, accepts
//! full snapshots or `"delta": true` partial updates, enforces leases when
//! configured, and deduplicates retries through a per-AID idempotency LRU
//! (1024 entries, 60 s TTL).
//!
//! Security posture: requests arrive from the runner but plugins are the
//! untrusted party; the host runs them behind its own sandbox. See
//! `Docs/security/threat_model.md`.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod protocol;
pub mod service;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use protocol::HostRequest;
pub use protocol::HostResponse;
pub use service::HostConfig;
pub use service::HostService;
