// crates/machina-sandbox/src/lib.rs
// ============================================================================
// Module: Machina Sandbox Library
// Description: Child-process resource limits and kernel syscall filtering.
// Purpose: Bound what selector and tool subprocesses can do to the host.
// Dependencies: libc, seccompiler (Linux), serde, thiserror
// ============================================================================

//! ## Overview
//! Two layers of best-effort containment for child processes: [`ProcLimits`]
//! applies rlimits (CPU seconds, address space, file size, open descriptors,
//! child processes) and sets `no_new_privs`; [`SeccompProfile`] installs an
//! allowlist BPF filter — `strict` blocks sockets, ptrace, mounts, and
//! module loading, `net` re-admits the socket family for network tools. Both
//! support x86_64 and aarch64; on non-Linux platforms every installer is a
//! no-op that reports success, and stronger isolation is delegated to the
//! host OS.
//!
//! Security posture: these limits bound damage from a misbehaving child but
//! are not a full sandbox; see `Docs/security/threat_model.md`.

#![allow(
    unsafe_code,
    reason = "Pre-exec hooks run between fork and exec and must use raw \
              syscalls; every unsafe block carries a SAFETY comment."
)]

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod limits;
pub mod seccomp;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use limits::ProcLimits;
pub use limits::SandboxError;
pub use limits::harden_command;
pub use seccomp::CompiledFilter;
pub use seccomp::SeccompProfile;
