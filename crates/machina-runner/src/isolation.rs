// crates/machina-runner/src/isolation.rs
// ============================================================================
// Module: Subprocess Isolation
// Description: Routes a dispatch through the machina-toolhost binary.
// Purpose: Keep side-effectful or untrusted tools out of the runner process.
// Dependencies: machina-core, machina-sandbox, machina-toolhost, serde_json
// ============================================================================

//! ## Overview
//! [`SubprocessInvoker`] is a [`ToolInvoker`] whose body lives in another
//! process: it spawns `machina-toolhost --run`, sends one request carrying
//! the transaction's working-state snapshot on stdin, and applies the
//! response state back onto the working copy. The child is hardened like
//! any other Machina subprocess (limits, `no_new_privs`, optional seccomp)
//! and killed at its deadline. From the runner's point of view the result
//! is an ordinary [`ToolOutcome`]; commit or rollback stays with the
//! transaction owner.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Read;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::process::Stdio;
use std::time::Duration;
use std::time::Instant;

use machina_core::Aid;
use machina_core::StepStatus;
use machina_core::ToolInvoker;
use machina_core::ToolOutcome;
use machina_core::Tx;
use machina_sandbox::ProcLimits;
use machina_sandbox::SeccompProfile;
use machina_sandbox::harden_command;
use machina_toolhost::HostRequest;
use machina_toolhost::HostResponse;
use machina_toolhost::protocol::decode_state_onto;
use machina_toolhost::protocol::encode_state;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default wall-clock timeout for one isolated dispatch.
pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 30_000;
/// Poll interval while waiting on the child.
const WAIT_POLL: Duration = Duration::from_millis(10);

// ============================================================================
// SECTION: Subprocess Invoker
// ============================================================================

/// Tool invoker backed by the out-of-process tool host.
///
/// # Invariants
/// - The working copy mutates only from an `ok` response; failures leave it
///   untouched for the runner to roll back.
#[derive(Debug, Clone)]
pub struct SubprocessInvoker {
    /// Path to the `machina-toolhost` binary.
    toolhost_bin: PathBuf,
    /// Plugin the host should load (`builtin` for the builtin set).
    plugin: String,
    /// Tool this invoker dispatches.
    aid: Aid,
    /// Wall-clock deadline per dispatch.
    timeout_ms: u64,
    /// Resource limits applied to the host process.
    limits: ProcLimits,
    /// Syscall filter the host installs before loading the plugin.
    seccomp: SeccompProfile,
}

impl SubprocessInvoker {
    /// Creates an invoker for one AID.
    #[must_use]
    pub fn new(toolhost_bin: PathBuf, plugin: impl Into<String>, aid: Aid) -> Self {
        Self {
            toolhost_bin,
            plugin: plugin.into(),
            aid,
            timeout_ms: DEFAULT_TOOL_TIMEOUT_MS,
            limits: ProcLimits::default(),
            seccomp: SeccompProfile::Off,
        }
    }

    /// Sets the dispatch deadline.
    #[must_use]
    pub const fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Sets the child resource limits.
    #[must_use]
    pub const fn limits(mut self, limits: ProcLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the child syscall filter.
    #[must_use]
    pub const fn seccomp(mut self, seccomp: SeccompProfile) -> Self {
        self.seccomp = seccomp;
        self
    }

    /// Runs the host once and returns its raw response line.
    fn call_host(&self, request_line: &str) -> Result<String, String> {
        let mut command = Command::new(&self.toolhost_bin);
        command
            .arg("--run")
            .arg(&self.plugin)
            .arg(self.aid.as_str())
            .arg("--seccomp")
            .arg(self.seccomp.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        harden_command(&mut command, self.limits, SeccompProfile::Off)
            .map_err(|err| format!("sandbox failure: {err}"))?;

        let mut child = command.spawn().map_err(|err| format!("spawn failure: {err}"))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request_line.as_bytes())
                .and_then(|()| stdin.write_all(b"\n"))
                .map_err(|err| format!("stdin write failure: {err}"))?;
        }

        let stdout = child.stdout.take();
        let reader = std::thread::spawn(move || {
            let mut body = String::new();
            if let Some(mut stdout) = stdout {
                let _ = stdout.read_to_string(&mut body);
            }
            body
        });

        let deadline = Instant::now() + Duration::from_millis(self.timeout_ms);
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    let body = reader.join().unwrap_or_default();
                    if !status.success() {
                        return Err(format!("toolhost exited with {status}"));
                    }
                    return Ok(body);
                }
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = reader.join();
                    return Err(format!("toolhost timed out after {} ms", self.timeout_ms));
                }
                Ok(None) => std::thread::sleep(WAIT_POLL),
                Err(err) => {
                    let _ = child.kill();
                    return Err(format!("wait failure: {err}"));
                }
            }
        }
    }
}

impl ToolInvoker for SubprocessInvoker {
    fn invoke(&self, input_json: &str, tx: &mut Tx) -> ToolOutcome {
        let mut request = HostRequest::new(self.aid.clone());
        request.input_json = Some(input_json.to_string());
        request.ds_state = Some(encode_state(tx.tmp()));

        let request_line = match serde_json::to_string(&request) {
            Ok(line) => line,
            Err(err) => return ToolOutcome::tool_error(format!("request encode: {err}")),
        };
        let body = match self.call_host(&request_line) {
            Ok(body) => body,
            Err(err) => return ToolOutcome::tool_error(err),
        };
        let response: HostResponse = match serde_json::from_str(body.trim()) {
            Ok(response) => response,
            Err(err) => {
                return ToolOutcome::tool_error(format!("response parse failure: {err}"));
            }
        };

        if response.ok {
            if let Err(detail) = decode_state_onto(tx.tmp_mut(), &response.ds_state) {
                return ToolOutcome::tool_error(format!("response state invalid: {detail}"));
            }
            return ToolOutcome::ok(response.output_json);
        }
        ToolOutcome {
            status: match response.status {
                StepStatus::Ok => StepStatus::ToolError,
                other => other,
            },
            output_json: response.output_json,
            error: response.error,
        }
    }
}
