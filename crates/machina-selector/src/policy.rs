// crates/machina-selector/src/policy.rs
// ============================================================================
// Module: External Policy Selector
// Description: Hardened subprocess invocation of an external decision policy.
// Purpose: Ask an untrusted process to pick, without letting it hurt the host.
// Dependencies: machina-core, machina-sandbox, serde_json, tempfile, thiserror
// ============================================================================

//! ## Overview
//! The policy selector writes a JSON payload file (goal digest, state
//! digest, control mode, inputs, menu) and spawns the configured command
//! with the payload path as `argv[1]`. Hardening before exec: the
//! executable basename must be allow-listed, any argument that resolves to
//! an existing file must canonicalize under the allowed script root (no
//! `..` or symlink escapes), resource limits and `no_new_privs` apply, and
//! a seccomp profile may be installed. The child is killed at its deadline;
//! stdout is captured up to a cap with stderr merged after it.
//!
//! Failures — launch, timeout, non-zero exit, empty output — surface as
//! [`PolicyError`] so the composition layer can feed the circuit breaker.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Stdio;
use std::time::Duration;
use std::time::Instant;

use machina_core::SelectionContext;
use machina_sandbox::ProcLimits;
use machina_sandbox::SeccompProfile;
use machina_sandbox::harden_command;
use serde_json::json;
use thiserror::Error;

use crate::breaker::CircuitBreaker;
use crate::breaker::DEFAULT_BREAKER_COOLDOWN_MS;
use crate::breaker::DEFAULT_BREAKER_THRESHOLD;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default wall-clock timeout for one policy call.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
/// Default cap on captured output bytes.
pub const DEFAULT_STDOUT_CAP_BYTES: usize = 64 * 1024;
/// Poll interval while waiting on the child.
const WAIT_POLL: Duration = Duration::from_millis(10);

/// Interpreters allowed to host policy scripts by default.
pub const DEFAULT_ALLOWED_BASENAMES: &[&str] = &["python3", "python", "sh", "bash", "node"];

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Why an external policy call failed.
///
/// # Invariants
/// - Every variant counts as one breaker failure.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Executable basename is not on the allow-list.
    #[error("interpreter not allowed: {0}")]
    DisallowedInterpreter(String),
    /// A script argument escapes the allowed script root.
    #[error("script outside allowed root: {0}")]
    ScriptOutsideRoot(String),
    /// Payload file could not be written.
    #[error("payload write failure: {0}")]
    PayloadWrite(String),
    /// Sandbox profile could not be prepared.
    #[error("sandbox failure: {0}")]
    Sandbox(String),
    /// Child failed to spawn.
    #[error("spawn failure: {0}")]
    Spawn(String),
    /// Child ran past its deadline and was killed.
    #[error("policy timed out after {timeout_ms} ms")]
    Timeout {
        /// Configured timeout.
        timeout_ms: u64,
    },
    /// Child exited non-zero.
    #[error("policy exited with status {status}")]
    NonZeroExit {
        /// Exit status description.
        status: String,
    },
    /// Child exited zero but produced no output.
    #[error("policy produced empty output")]
    EmptyOutput,
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Policy for invoking the external selector.
///
/// # Invariants
/// - `command` is argv; element 0 is the interpreter.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Command line to run; the payload path is appended as `argv[1]`.
    pub command: Vec<String>,
    /// Allowed interpreter basenames.
    pub allowed_basenames: Vec<String>,
    /// Directory policy scripts must resolve under.
    pub allowed_script_root: PathBuf,
    /// Wall-clock deadline for one call.
    pub timeout_ms: u64,
    /// Cap on captured output bytes.
    pub stdout_cap_bytes: usize,
    /// Resource limits applied to the child.
    pub limits: ProcLimits,
    /// Syscall filter installed in the child.
    pub seccomp: SeccompProfile,
    /// Consecutive failures before the breaker opens.
    pub breaker_threshold: u32,
    /// Breaker cooldown once open.
    pub breaker_cooldown_ms: u64,
}

impl PolicyConfig {
    /// Creates a config for a command with hardening defaults.
    #[must_use]
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            allowed_basenames: DEFAULT_ALLOWED_BASENAMES
                .iter()
                .map(ToString::to_string)
                .collect(),
            allowed_script_root: PathBuf::from("policies"),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            stdout_cap_bytes: DEFAULT_STDOUT_CAP_BYTES,
            limits: ProcLimits::default(),
            seccomp: SeccompProfile::Off,
            breaker_threshold: DEFAULT_BREAKER_THRESHOLD,
            breaker_cooldown_ms: DEFAULT_BREAKER_COOLDOWN_MS,
        }
    }
}

// ============================================================================
// SECTION: Policy Selector
// ============================================================================

/// Hardened external-process decision source.
///
/// # Invariants
/// - No spawn occurs while the breaker is open; the composition layer
///   checks before calling.
#[derive(Debug)]
pub struct PolicySelector {
    /// Invocation policy.
    config: PolicyConfig,
    /// Failure gate shared with the composition layer.
    breaker: CircuitBreaker,
}

impl PolicySelector {
    /// Creates a selector and its breaker from config.
    #[must_use]
    pub fn new(config: PolicyConfig) -> Self {
        let breaker =
            CircuitBreaker::new(config.breaker_threshold, config.breaker_cooldown_ms);
        Self {
            config,
            breaker,
        }
    }

    /// Returns the breaker.
    #[must_use]
    pub const fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Returns the invocation policy.
    #[must_use]
    pub const fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Runs one external call, returning the captured raw output.
    ///
    /// The caller owns breaker bookkeeping: grammar validation happens
    /// above this layer, and only the composition layer knows whether the
    /// parsed output was ultimately acceptable.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] on launch failure, timeout, non-zero exit,
    /// or empty output.
    pub fn invoke_external(&self, ctx: &SelectionContext<'_>) -> Result<String, PolicyError> {
        self.validate_command()?;
        let payload = self.write_payload(ctx)?;

        let Some((program, args)) = self.config.command.split_first() else {
            return Err(PolicyError::Spawn("empty command".to_string()));
        };
        let mut command = Command::new(program);
        command
            .args(args)
            .arg(payload.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        harden_command(&mut command, self.config.limits, self.config.seccomp)
            .map_err(|err| PolicyError::Sandbox(err.to_string()))?;

        let mut child =
            command.spawn().map_err(|err| PolicyError::Spawn(err.to_string()))?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let cap = self.config.stdout_cap_bytes;
        let stdout_reader =
            std::thread::spawn(move || read_capped(stdout, cap));
        let stderr_reader =
            std::thread::spawn(move || read_capped(stderr, cap));

        let deadline = Instant::now() + Duration::from_millis(self.config.timeout_ms);
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    // Partial output is still captured for the audit trail,
                    // but a timeout is a failure regardless of content.
                    let _ = stdout_reader.join();
                    let _ = stderr_reader.join();
                    return Err(PolicyError::Timeout {
                        timeout_ms: self.config.timeout_ms,
                    });
                }
                Ok(None) => std::thread::sleep(WAIT_POLL),
                Err(err) => {
                    let _ = child.kill();
                    return Err(PolicyError::Spawn(err.to_string()));
                }
            }
        };

        let mut output = stdout_reader.join().unwrap_or_default();
        let errout = stderr_reader.join().unwrap_or_default();
        if output.len() < cap {
            let room = cap - output.len();
            output.extend_from_slice(&errout[.. errout.len().min(room)]);
        }
        let output = String::from_utf8_lossy(&output).into_owned();

        if !status.success() {
            return Err(PolicyError::NonZeroExit {
                status: status.to_string(),
            });
        }
        if output.trim().is_empty() {
            return Err(PolicyError::EmptyOutput);
        }
        Ok(output)
    }

    /// Validates interpreter and script-path confinement.
    fn validate_command(&self) -> Result<(), PolicyError> {
        let Some(program) = self.config.command.first() else {
            return Err(PolicyError::Spawn("empty command".to_string()));
        };
        let basename = Path::new(program)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !self.config.allowed_basenames.contains(&basename) {
            return Err(PolicyError::DisallowedInterpreter(basename));
        }

        let root = std::fs::canonicalize(&self.config.allowed_script_root)
            .map_err(|err| PolicyError::ScriptOutsideRoot(format!(
                "script root {}: {err}",
                self.config.allowed_script_root.display()
            )))?;
        for arg in self.config.command.iter().skip(1) {
            let path = Path::new(arg);
            if !path.exists() {
                continue;
            }
            let resolved = std::fs::canonicalize(path)
                .map_err(|err| PolicyError::ScriptOutsideRoot(format!("{arg}: {err}")))?;
            if !resolved.starts_with(&root) {
                return Err(PolicyError::ScriptOutsideRoot(arg.clone()));
            }
        }
        Ok(())
    }

    /// Writes the payload file handed to the policy as `argv[1]`.
    fn write_payload(
        &self,
        ctx: &SelectionContext<'_>,
    ) -> Result<tempfile::NamedTempFile, PolicyError> {
        let menu: Vec<serde_json::Value> = ctx
            .menu
            .items()
            .iter()
            .map(|item| {
                json!({
                    "sid": item.sid.to_string(),
                    "aid": item.aid,
                    "name": item.name,
                    "tags": item.tags,
                })
            })
            .collect();
        let payload = json!({
            "goal_digest": ctx.goal_digest,
            "state_digest": ctx.state_digest,
            "control_mode": ctx.control_mode,
            "inputs": ctx.inputs,
            "menu": menu,
        });
        let mut file = tempfile::Builder::new()
            .prefix("machina-policy-")
            .suffix(".json")
            .tempfile()
            .map_err(|err| PolicyError::PayloadWrite(err.to_string()))?;
        file.write_all(payload.to_string().as_bytes())
            .and_then(|()| file.flush())
            .map_err(|err| PolicyError::PayloadWrite(err.to_string()))?;
        Ok(file)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Drains a pipe into memory, stopping at the cap.
fn read_capped<R: Read>(source: Option<R>, cap: usize) -> Vec<u8> {
    let Some(mut source) = source else {
        return Vec::new();
    };
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 4096];
    while buffer.len() < cap {
        match source.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(read) => {
                let room = cap - buffer.len();
                buffer.extend_from_slice(&chunk[.. read.min(room)]);
            }
        }
    }
    // Keep draining past the cap so the child never blocks on a full pipe.
    loop {
        match source.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
    buffer
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

    use machina_core::Aid;
    use machina_core::ControlMode;
    use machina_core::Menu;
    use serde_json::Map;
    use serde_json::Value;

    use super::*;

    /// One-item menu for payload tests.
    fn menu() -> Menu {
        Menu::assign(vec![(
            Aid::new("AID.SCAN.v1"),
            "Scan".to_string(),
            vec!["scan".to_string()],
        )])
        .unwrap()
    }

    /// Builds a selector whose script root is a real temp dir containing
    /// `policy.sh` with the given body.
    fn selector_with_script(
        dir: &tempfile::TempDir,
        body: &str,
        mutate: impl FnOnce(&mut PolicyConfig),
    ) -> PolicySelector {
        let script = dir.path().join("policy.sh");
        std::fs::write(&script, body).unwrap();
        let mut config = PolicyConfig::new(vec![
            "sh".to_string(),
            script.display().to_string(),
        ]);
        config.allowed_script_root = dir.path().to_path_buf();
        config.limits = ProcLimits::unlimited();
        config.timeout_ms = 5_000;
        mutate(&mut config);
        PolicySelector::new(config)
    }

    /// Invokes the external policy against the one-item menu.
    fn invoke(selector: &PolicySelector) -> Result<String, PolicyError> {
        let inputs: Map<String, Value> = Map::new();
        let menu = menu();
        selector.invoke_external(&SelectionContext {
            menu: &menu,
            goal_digest: "goal-digest",
            state_digest: "state-digest",
            control_mode: ControlMode::PolicyOnly,
            inputs: &inputs,
        })
    }

    #[test]
    fn disallowed_interpreter_is_rejected_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let selector = selector_with_script(&dir, "", |config| {
            config.command[0] = "perl".to_string();
        });
        let err = invoke(&selector).unwrap_err();
        assert!(matches!(err, PolicyError::DisallowedInterpreter(_)));
    }

    #[test]
    fn script_outside_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let stray = outside.path().join("stray.sh");
        std::fs::write(&stray, "echo hi").unwrap();

        let selector = selector_with_script(&dir, "echo hi", |config| {
            config.command[1] = stray.display().to_string();
        });
        let err = invoke(&selector).unwrap_err();
        assert!(matches!(err, PolicyError::ScriptOutsideRoot(_)));
    }

    #[cfg(unix)]
    #[test]
    fn policy_reads_payload_and_answers() {
        let dir = tempfile::tempdir().unwrap();
        // The payload path arrives as $1; prove it is readable JSON, then
        // answer with a pick.
        let selector = selector_with_script(
            &dir,
            "grep -q goal_digest \"$1\" && printf '<PICK><SID0001><END>'\n",
            |_| {},
        );
        let output = invoke(&selector).unwrap();
        assert!(output.contains("<PICK><SID0001><END>"));
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let selector = selector_with_script(&dir, "exit 3\n", |_| {});
        let err = invoke(&selector).unwrap_err();
        assert!(matches!(err, PolicyError::NonZeroExit { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn empty_output_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let selector = selector_with_script(&dir, "exit 0\n", |_| {});
        let err = invoke(&selector).unwrap_err();
        assert!(matches!(err, PolicyError::EmptyOutput));
    }

    #[cfg(unix)]
    #[test]
    fn overdue_child_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let selector = selector_with_script(&dir, "sleep 30\n", |config| {
            config.timeout_ms = 100;
        });
        let started = Instant::now();
        let err = invoke(&selector).unwrap_err();
        assert!(matches!(err, PolicyError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn stderr_is_merged_after_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let selector = selector_with_script(
            &dir,
            "printf '<NOOP><END>'; printf 'diag' 1>&2\n",
            |_| {},
        );
        let output = invoke(&selector).unwrap();
        assert!(output.contains("<NOOP><END>"));
        assert!(output.contains("diag"));
    }
}
