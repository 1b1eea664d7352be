// crates/machina-toolhost/src/main.rs
// ============================================================================
// Module: Toolhost Binary
// Description: Out-of-process tool execution over stdin/stdout NDJSON.
// Purpose: The process wall between the runner and side-effectful tools.
// Dependencies: clap, machina-core, machina-plugins, machina-sandbox,
//               machina-tools, machina-toolhost, serde_json
// ============================================================================

//! ## Overview
//! Two modes. `--run <plugin> <aid>` reads the whole of stdin as one JSON
//! request, executes, writes one JSON response, and exits. `--serve
//! <plugin>` answers one NDJSON request per line until stdin closes. In both
//! modes the host optionally installs a seccomp profile before the plugin is
//! loaded, registers the builtin tool set, and loads the named plugin
//! (subject to the usual pinning and capability gates) so its tools resolve.
//! The plugin path `builtin` skips loading and serves the builtins alone.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::BufRead;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use machina_core::StepStatus;
use machina_plugins::PluginConfig;
use machina_plugins::PluginManager;
use machina_sandbox::CompiledFilter;
use machina_sandbox::SeccompProfile;
use machina_tools::LeaseManager;
use machina_tools::ToolRegistry;
use machina_tools::register_builtin_tools;
use machina_toolhost::HostConfig;
use machina_toolhost::HostRequest;
use machina_toolhost::HostResponse;
use machina_toolhost::HostService;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Plugin-path sentinel that serves the builtin tools with no load.
const BUILTIN_PLUGIN: &str = "builtin";

// ============================================================================
// SECTION: CLI
// ============================================================================

/// Out-of-process tool host for the Machina runtime.
#[derive(Debug, Parser)]
#[command(name = "machina-toolhost", version, about)]
struct Cli {
    /// Single-shot mode: plugin path and AID; the request arrives on stdin.
    #[arg(long, num_args = 2, value_names = ["PLUGIN", "AID"], conflicts_with = "serve")]
    run: Option<Vec<String>>,

    /// Serve mode: plugin path; one NDJSON request per stdin line.
    #[arg(long, value_name = "PLUGIN")]
    serve: Option<PathBuf>,

    /// Syscall filter installed before the plugin loads.
    #[arg(long, value_name = "PROFILE", default_value = "off")]
    seccomp: String,

    /// Enforce leases for tier-1+ tools.
    #[arg(long)]
    lease_enforce: bool,
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "machina-toolhost: {message}");
            ExitCode::FAILURE
        }
    }
}

/// Dispatches the selected mode.
fn run(cli: Cli) -> Result<(), String> {
    let Some(profile) = SeccompProfile::parse(&cli.seccomp) else {
        return Err(format!("unknown seccomp profile: {}", cli.seccomp));
    };
    install_filter(profile)?;

    if let Some(run_args) = cli.run {
        let [plugin, aid] = run_args.as_slice() else {
            return Err("--run takes exactly <PLUGIN> <AID>".to_string());
        };
        let service = build_service(Path::new(plugin), cli.lease_enforce)?;
        return single_shot(&service, aid);
    }
    if let Some(plugin) = cli.serve {
        let service = build_service(&plugin, cli.lease_enforce)?;
        return serve(&service);
    }
    Err("one of --run or --serve is required".to_string())
}

/// Installs the syscall filter in this process, before any plugin loads.
fn install_filter(profile: SeccompProfile) -> Result<(), String> {
    let filter = CompiledFilter::compile(profile)
        .map_err(|err| format!("seccomp compile failure: {err}"))?;
    filter.install_in_child().map_err(|err| format!("seccomp install failure: {err}"))
}

/// Builds the registry (builtins plus the named plugin) and the service.
fn build_service(plugin: &Path, lease_enforce: bool) -> Result<HostService, String> {
    let registry = Arc::new(ToolRegistry::new());
    register_builtin_tools(registry.as_ref())
        .map_err(|err| format!("builtin registration failure: {err}"))?;

    if plugin.as_os_str() != BUILTIN_PLUGIN {
        let manager = PluginManager::new(PluginConfig::default());
        manager
            .load(plugin, registry.as_ref())
            .map_err(|err| format!("plugin load failure: {err}"))?;
        // The manager's handle table must outlive every registered invoker;
        // leak it so the library stays mapped for the process lifetime.
        Box::leak(Box::new(manager));
    }

    let leases = lease_enforce.then(|| Arc::new(LeaseManager::new()));
    Ok(HostService::new(registry, leases, HostConfig {
        lease_enforce,
        ..HostConfig::default()
    }))
}

/// Single-shot mode: whole stdin is one request for the given AID.
fn single_shot(service: &HostService, aid: &str) -> Result<(), String> {
    let mut body = String::new();
    std::io::stdin()
        .lock()
        .read_to_string(&mut body)
        .map_err(|err| format!("stdin read failure: {err}"))?;

    let response = match parse_request(&body, Some(aid)) {
        Ok(request) => service.handle(&request),
        Err(detail) => bad_request(detail),
    };
    write_response(&response)
}

/// Serve mode: one NDJSON request per line until stdin closes.
fn serve(service: &HostService) -> Result<(), String> {
    let stdin = std::io::stdin().lock();
    for line in stdin.lines() {
        let line = line.map_err(|err| format!("stdin read failure: {err}"))?;
        if line.trim().is_empty() {
            continue;
        }
        let response = match parse_request(&line, None) {
            Ok(request) => service.handle(&request),
            Err(detail) => bad_request(detail),
        };
        write_response(&response)?;
    }
    Ok(())
}

/// Parses a request body, optionally forcing the AID from the command line.
fn parse_request(body: &str, forced_aid: Option<&str>) -> Result<HostRequest, String> {
    let request: HostRequest = serde_json::from_str(body.trim())
        .map_err(|err| format!("bad request: {err}"))?;
    if let Some(aid) = forced_aid {
        if request.aid.as_str() != aid {
            return Err(format!(
                "request aid {} does not match --run aid {aid}",
                request.aid
            ));
        }
    }
    Ok(request)
}

/// Builds the response for an unparseable request.
fn bad_request(detail: String) -> HostResponse {
    HostResponse {
        ok: false,
        status: StepStatus::ToolError,
        output_json: "{}".to_string(),
        error: detail,
        ds_state: serde_json::Map::new(),
        idempotent_hit: None,
    }
}

/// Writes one response line to stdout.
fn write_response(response: &HostResponse) -> Result<(), String> {
    let body = serde_json::to_string(response)
        .map_err(|err| format!("response serialize failure: {err}"))?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{body}")
        .and_then(|()| stdout.flush())
        .map_err(|err| format!("stdout write failure: {err}"))
}
