// crates/machina-sandbox/src/limits.rs
// ============================================================================
// Module: Process Limits
// Description: Rlimits and no_new_privs applied to child processes.
// Purpose: Cap the resources a policy or tool subprocess can consume.
// Dependencies: libc (Linux), serde, thiserror
// ============================================================================

//! ## Overview
//! [`ProcLimits`] describes the resource ceilings applied to a child between
//! fork and exec: CPU seconds, address-space megabytes, maximum file size,
//! open descriptors, and child-process count. [`harden_command`] wires the
//! limits, `no_new_privs`, and an optional seccomp profile into a
//! [`std::process::Command`] via a pre-exec hook. All of it is best effort:
//! a kernel that rejects a limit fails the spawn rather than running
//! unconfined.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::process::Command;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::seccomp::SeccompProfile;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while hardening a child process.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// An rlimit could not be applied.
    #[error("rlimit failure for {resource}: {detail}")]
    Rlimit {
        /// Resource name.
        resource: &'static str,
        /// OS error detail.
        detail: String,
    },
    /// `no_new_privs` could not be set.
    #[error("no_new_privs failure: {0}")]
    NoNewPrivs(String),
    /// The seccomp filter could not be built or installed.
    #[error("seccomp failure: {0}")]
    Seccomp(String),
}

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Resource ceilings for one child process.
///
/// # Invariants
/// - `None` leaves the corresponding limit inherited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcLimits {
    /// CPU seconds before SIGKILL.
    pub cpu_secs: Option<u64>,
    /// Address-space cap in megabytes.
    pub address_space_mb: Option<u64>,
    /// Maximum size of any file the child may create, in megabytes.
    pub file_size_mb: Option<u64>,
    /// Maximum open file descriptors.
    pub open_files: Option<u64>,
    /// Maximum child processes/threads.
    pub processes: Option<u64>,
}

impl Default for ProcLimits {
    fn default() -> Self {
        Self {
            cpu_secs: Some(10),
            address_space_mb: Some(512),
            file_size_mb: Some(64),
            open_files: Some(64),
            processes: Some(16),
        }
    }
}

impl ProcLimits {
    /// Limits that inherit everything; used when a caller opts out.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            cpu_secs: None,
            address_space_mb: None,
            file_size_mb: None,
            open_files: None,
            processes: None,
        }
    }
}

// ============================================================================
// SECTION: Command Hardening
// ============================================================================

/// Wires limits, `no_new_privs`, and a seccomp profile into a command.
///
/// The seccomp program compiles here in the parent; the pre-exec hook only
/// applies finished state between fork and exec. On non-Linux platforms the
/// hook is omitted entirely.
///
/// # Errors
///
/// Returns [`SandboxError::Seccomp`] when the profile fails to compile;
/// rlimit failures surface later as spawn errors.
pub fn harden_command(
    command: &mut Command,
    limits: ProcLimits,
    profile: SeccompProfile,
) -> Result<(), SandboxError> {
    let filter = crate::seccomp::CompiledFilter::compile(profile)
        .map_err(|err| SandboxError::Seccomp(err.to_string()))?;
    #[cfg(target_os = "linux")]
    {
        linux::install_pre_exec(command, limits, filter);
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (command, limits, filter);
    }
    Ok(())
}

// ============================================================================
// SECTION: Linux Implementation
// ============================================================================

#[cfg(target_os = "linux")]
mod linux {
    //! Linux pre-exec hook: rlimits, `no_new_privs`, seccomp.

    use std::os::unix::process::CommandExt;
    use std::process::Command;

    use super::ProcLimits;
    use crate::seccomp::CompiledFilter;

    /// Megabyte, in bytes.
    const MIB: u64 = 1024 * 1024;

    /// Installs the hardening hook on a command.
    pub(super) fn install_pre_exec(
        command: &mut Command,
        limits: ProcLimits,
        filter: CompiledFilter,
    ) {
        // SAFETY: the hook only performs async-signal-safe syscalls
        // (setrlimit, prctl, seccomp BPF load) between fork and exec; the
        // filter was compiled before the fork.
        unsafe {
            command.pre_exec(move || apply_in_child(limits, &filter));
        }
    }

    /// Applies limits inside the child; any failure aborts the exec.
    fn apply_in_child(limits: ProcLimits, filter: &CompiledFilter) -> std::io::Result<()> {
        if let Some(secs) = limits.cpu_secs {
            set_rlimit(libc::RLIMIT_CPU, secs)?;
        }
        if let Some(mb) = limits.address_space_mb {
            set_rlimit(libc::RLIMIT_AS, mb.saturating_mul(MIB))?;
        }
        if let Some(mb) = limits.file_size_mb {
            set_rlimit(libc::RLIMIT_FSIZE, mb.saturating_mul(MIB))?;
        }
        if let Some(count) = limits.open_files {
            set_rlimit(libc::RLIMIT_NOFILE, count)?;
        }
        if let Some(count) = limits.processes {
            set_rlimit(libc::RLIMIT_NPROC, count)?;
        }
        set_no_new_privs()?;
        filter.install_in_child()?;
        Ok(())
    }

    /// Sets one rlimit (soft == hard).
    fn set_rlimit(resource: libc::__rlimit_resource_t, value: u64) -> std::io::Result<()> {
        let limit = libc::rlimit {
            rlim_cur: value,
            rlim_max: value,
        };
        // SAFETY: resource is a valid RLIMIT_* constant and the struct is a
        // stack value living across the call.
        let code = unsafe { libc::setrlimit(resource, &raw const limit) };
        if code == 0 { Ok(()) } else { Err(std::io::Error::last_os_error()) }
    }

    /// Sets `no_new_privs` so exec cannot regain privileges.
    fn set_no_new_privs() -> std::io::Result<()> {
        // SAFETY: PR_SET_NO_NEW_PRIVS with the documented argument pattern;
        // no pointers are passed.
        let code = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
        if code == 0 { Ok(()) } else { Err(std::io::Error::last_os_error()) }
    }
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

    use super::*;

    #[test]
    fn defaults_are_bounded() {
        let limits = ProcLimits::default();
        assert!(limits.cpu_secs.is_some());
        assert!(limits.address_space_mb.is_some());
        assert!(limits.open_files.is_some());
    }

    #[test]
    fn unlimited_inherits_everything() {
        let limits = ProcLimits::unlimited();
        assert_eq!(limits, ProcLimits {
            cpu_secs: None,
            address_space_mb: None,
            file_size_mb: None,
            open_files: None,
            processes: None,
        });
    }

    #[test]
    fn hardening_wires_without_error() {
        let mut command = Command::new("true");
        harden_command(&mut command, ProcLimits::default(), SeccompProfile::Off).unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn hardened_child_still_executes() {
        let mut command = Command::new("/bin/true");
        harden_command(&mut command, ProcLimits::default(), SeccompProfile::Off).unwrap();
        let status = command.status().unwrap();
        assert!(status.success());
    }
}
