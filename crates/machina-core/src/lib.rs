// crates/machina-core/src/lib.rs
// ============================================================================
// Module: Machina Core Library
// Description: Data model, transaction engine, and crypto for the Machina runtime.
// Purpose: Provide the deterministic foundation every other Machina crate builds on.
// Dependencies: serde, serde_json, serde_jcs, sha2, hmac, subtle, rand, thiserror
// ============================================================================

//! ## Overview
//! Machina Core defines the working-state model (eight artifact slots), the
//! transaction engine that is the only legal way to mutate it, the JSON patch
//! format shared by commit and replay, menu/goal/tool descriptors, the
//! hash-chained audit event model, and the crypto helpers the rest of the
//! runtime depends on. Everything here is deterministic: equal states produce
//! equal digests regardless of in-memory representation.
//!
//! Security posture: all inputs crossing this crate's boundary (selector
//! output, tool inputs, logged patches) are untrusted; see
//! `Docs/security/threat_model.md`.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod crypto;
pub mod hashing;
pub mod interfaces;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use crate::core::artifact::Artifact;
pub use crate::core::budget::Budget;
pub use crate::core::capability::Capability;
pub use crate::core::capability::CapabilityMask;
pub use crate::core::events::AuditEvent;
pub use crate::core::events::EventKind;
pub use crate::core::events::RunHeader;
pub use crate::core::events::SPEC_VERSION;
pub use crate::core::events::compute_chain_hash;
pub use crate::core::goal::GoalDesc;
pub use crate::core::goal::GoalRegistry;
pub use crate::core::identifiers::Aid;
pub use crate::core::identifiers::GoalId;
pub use crate::core::identifiers::LeaseId;
pub use crate::core::identifiers::ProfileId;
pub use crate::core::identifiers::RequestId;
pub use crate::core::identifiers::RunId;
pub use crate::core::identifiers::Sid;
pub use crate::core::identifiers::SlotIndex;
pub use crate::core::menu::Menu;
pub use crate::core::menu::MenuItem;
pub use crate::core::patch::PatchApplyError;
pub use crate::core::patch::PatchOp;
pub use crate::core::patch::SlotPath;
pub use crate::core::patch::TxPatch;
pub use crate::core::patch::apply_patch;
pub use crate::core::request::CapabilityFilter;
pub use crate::core::request::ControlMode;
pub use crate::core::request::RunRequest;
pub use crate::core::state::DsState;
pub use crate::core::time::Timestamp;
pub use crate::core::tool::LeaseTier;
pub use crate::core::tool::StepStatus;
pub use crate::core::tool::ToolDesc;
pub use crate::core::tx::Tx;
pub use crate::interfaces::DecisionSource;
pub use crate::interfaces::RegistrarError;
pub use crate::interfaces::ReplayToolSource;
pub use crate::interfaces::Selection;
pub use crate::interfaces::SelectionContext;
pub use crate::interfaces::SelectionOutcome;
pub use crate::interfaces::SelectorSource;
pub use crate::interfaces::ToolInvoker;
pub use crate::interfaces::ToolOutcome;
pub use crate::interfaces::ToolRegistrar;
