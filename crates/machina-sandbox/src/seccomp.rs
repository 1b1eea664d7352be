// crates/machina-sandbox/src/seccomp.rs
// ============================================================================
// Module: Syscall Filter
// Description: Allowlist seccomp-BPF profiles for child processes.
// Purpose: Block the syscall surface a confined child has no business using.
// Dependencies: libc, seccompiler (Linux), serde
// ============================================================================

//! ## Overview
//! Two allowlist profiles built with seccompiler: `strict` admits the file,
//! memory, signal, process-exit, clock, and futex syscalls a well-behaved
//! policy script needs, and nothing else — socket, connect, bind, listen,
//! accept, ptrace, mount, pivot_root, reboot, setns, unshare, kexec_load,
//! module load/unload, and personality all fall through to the mismatch
//! action. `net` is strict plus the socket family for network tools.
//! Filters support x86_64 and aarch64; non-Linux installers are no-ops
//! reporting success.
//!
//! Programs are compiled in the parent before fork; the child only loads the
//! finished BPF, keeping the pre-exec window free of allocation. Filters
//! install after `no_new_privs`, which the kernel requires for unprivileged
//! seccomp.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Profiles
// ============================================================================

/// Which syscall filter to install in a child.
///
/// # Invariants
/// - Wire labels are stable for configuration files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeccompProfile {
    /// No filter.
    #[default]
    Off,
    /// File/memory/clock/futex allowlist; blocks sockets and namespace
    /// manipulation.
    Strict,
    /// Strict plus the socket family.
    Net,
}

impl SeccompProfile {
    /// Returns the stable config label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Strict => "strict",
            Self::Net => "net",
        }
    }

    /// Parses a config label.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "off" => Some(Self::Off),
            "strict" => Some(Self::Strict),
            "net" => Some(Self::Net),
            _ => None,
        }
    }
}

impl fmt::Display for SeccompProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Compiled Filters
// ============================================================================

/// A filter compiled in the parent, ready to load in a child.
///
/// # Invariants
/// - `Off` compiles to an empty filter that loads nothing.
#[derive(Clone)]
pub struct CompiledFilter {
    /// Finished BPF program, absent for `Off` or non-Linux builds.
    #[cfg(target_os = "linux")]
    program: Option<seccompiler::BpfProgram>,
}

impl fmt::Debug for CompiledFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        #[cfg(target_os = "linux")]
        let loaded = self.program.is_some();
        #[cfg(not(target_os = "linux"))]
        let loaded = false;
        f.debug_struct("CompiledFilter").field("active", &loaded).finish()
    }
}

impl CompiledFilter {
    /// Compiles the BPF program for a profile on this architecture.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the architecture is unsupported or the
    /// filter fails to assemble. Non-Linux builds always succeed with an
    /// empty filter.
    pub fn compile(profile: SeccompProfile) -> std::io::Result<Self> {
        #[cfg(target_os = "linux")]
        {
            let program = if profile == SeccompProfile::Off {
                None
            } else {
                Some(linux::compile(profile)?)
            };
            Ok(Self {
                program,
            })
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = profile;
            Ok(Self {})
        }
    }

    /// Loads the compiled program in the current (child) process.
    ///
    /// Allocation-free on the load path; safe to call between fork and exec.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the kernel rejects the program, which
    /// aborts the pending exec.
    pub fn install_in_child(&self) -> std::io::Result<()> {
        #[cfg(target_os = "linux")]
        {
            if let Some(program) = &self.program {
                seccompiler::apply_filter(program)
                    .map_err(|err| std::io::Error::other(err.to_string()))?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Linux Implementation
// ============================================================================

#[cfg(target_os = "linux")]
mod linux {
    //! seccompiler-backed filter construction for x86_64 and aarch64.

    use std::collections::BTreeMap;

    use seccompiler::BpfProgram;
    use seccompiler::SeccompAction;
    use seccompiler::SeccompFilter;
    use seccompiler::SeccompRule;
    use seccompiler::TargetArch;

    use super::SeccompProfile;

    /// Assembles the BPF program for a non-`Off` profile.
    pub(super) fn compile(profile: SeccompProfile) -> std::io::Result<BpfProgram> {
        let arch = TargetArch::try_from(std::env::consts::ARCH)
            .map_err(|_| std::io::Error::other("unsupported seccomp architecture"))?;

        let mut rules: BTreeMap<i64, Vec<SeccompRule>> = BTreeMap::new();
        for syscall in allowed_syscalls(profile) {
            rules.insert(syscall, Vec::new());
        }

        let filter = SeccompFilter::new(
            rules,
            // Mismatch: fail the syscall with EPERM instead of killing, so a
            // blocked probe surfaces in the child's own error path.
            SeccompAction::Errno(u32::try_from(libc::EPERM).unwrap_or(1)),
            SeccompAction::Allow,
            arch,
        )
        .map_err(|err| std::io::Error::other(err.to_string()))?;
        filter.try_into().map_err(|err: seccompiler::BackendError| {
            std::io::Error::other(err.to_string())
        })
    }

    /// Returns the allowlist for a profile on this architecture.
    fn allowed_syscalls(profile: SeccompProfile) -> Vec<i64> {
        let mut list: Vec<i64> = STRICT_COMMON.to_vec();
        list.extend_from_slice(STRICT_ARCH);
        if profile == SeccompProfile::Net {
            list.extend_from_slice(NET_EXTRA);
        }
        list
    }

    /// Common file, memory, signal, clock, and futex syscalls.
    const STRICT_COMMON: &[i64] = &[
        libc::SYS_read,
        libc::SYS_write,
        libc::SYS_readv,
        libc::SYS_writev,
        libc::SYS_pread64,
        libc::SYS_pwrite64,
        libc::SYS_close,
        libc::SYS_openat,
        libc::SYS_fstat,
        libc::SYS_newfstatat,
        libc::SYS_lseek,
        libc::SYS_getdents64,
        libc::SYS_faccessat,
        libc::SYS_readlinkat,
        libc::SYS_mmap,
        libc::SYS_munmap,
        libc::SYS_mprotect,
        libc::SYS_mremap,
        libc::SYS_madvise,
        libc::SYS_brk,
        libc::SYS_rt_sigaction,
        libc::SYS_rt_sigprocmask,
        libc::SYS_rt_sigreturn,
        libc::SYS_sigaltstack,
        libc::SYS_exit,
        libc::SYS_exit_group,
        libc::SYS_futex,
        libc::SYS_clock_gettime,
        libc::SYS_clock_nanosleep,
        libc::SYS_nanosleep,
        libc::SYS_gettimeofday,
        libc::SYS_getpid,
        libc::SYS_gettid,
        libc::SYS_getuid,
        libc::SYS_geteuid,
        libc::SYS_getgid,
        libc::SYS_getegid,
        libc::SYS_getrandom,
        libc::SYS_sched_yield,
        libc::SYS_sched_getaffinity,
        libc::SYS_dup,
        libc::SYS_dup3,
        libc::SYS_fcntl,
        libc::SYS_pipe2,
        libc::SYS_ppoll,
        libc::SYS_epoll_create1,
        libc::SYS_epoll_ctl,
        libc::SYS_epoll_pwait,
        libc::SYS_prlimit64,
        libc::SYS_set_robust_list,
        libc::SYS_set_tid_address,
        libc::SYS_rseq,
        libc::SYS_uname,
        libc::SYS_ioctl,
        libc::SYS_execve,
        libc::SYS_execveat,
        libc::SYS_wait4,
        libc::SYS_clone,
        libc::SYS_clone3,
    ];

    /// x86_64 carries a handful of legacy syscalls glibc still prefers.
    #[cfg(target_arch = "x86_64")]
    const STRICT_ARCH: &[i64] = &[
        libc::SYS_open,
        libc::SYS_stat,
        libc::SYS_lstat,
        libc::SYS_access,
        libc::SYS_readlink,
        libc::SYS_poll,
        libc::SYS_pipe,
        libc::SYS_dup2,
        libc::SYS_getdents,
        libc::SYS_arch_prctl,
    ];

    /// aarch64 has no legacy variants beyond the common set.
    #[cfg(not(target_arch = "x86_64"))]
    const STRICT_ARCH: &[i64] = &[];

    /// Socket-family syscalls admitted by the `net` profile.
    const NET_EXTRA: &[i64] = &[
        libc::SYS_socket,
        libc::SYS_connect,
        libc::SYS_bind,
        libc::SYS_listen,
        libc::SYS_accept4,
        libc::SYS_sendto,
        libc::SYS_recvfrom,
        libc::SYS_sendmsg,
        libc::SYS_recvmsg,
        libc::SYS_getsockname,
        libc::SYS_getpeername,
        libc::SYS_setsockopt,
        libc::SYS_getsockopt,
        libc::SYS_shutdown,
    ];
}

// ============================================================================
// SECTION: Unit Tests
// ============================================================================
