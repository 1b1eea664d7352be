// crates/machina-runner/src/runner.rs
// ============================================================================
// Module: Goal Loop
// Description: The central state machine driving one run.
// Purpose: Execute selector picks transactionally until the goal is done
//          or a budget trips.
// Dependencies: machina-audit, machina-core, machina-plugins, machina-tools,
//               serde_json, thiserror, uuid
// ============================================================================

//! ## Overview
//! Per step: completion check, budget and loop-guard check, menu
//! construction (tag intersection plus terminal options, AID-filtered),
//! selection, interpretation, safe merge, lease gate, transactional
//! dispatch, commit-or-rollback, optional plugin rescan. Every observable
//! event chains into the run's audit log in order. Committed state changes
//! happen in exactly one place: the commit after a tool reports `OK`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use machina_audit::AuditError;
use machina_audit::AuditLog;
use machina_core::Aid;
use machina_core::Artifact;
use machina_core::Budget;
use machina_core::CapabilityFilter;
use machina_core::DecisionSource;
use machina_core::DsState;
use machina_core::EventKind;
use machina_core::GoalRegistry;
use machina_core::Menu;
use machina_core::ProfileId;
use machina_core::RunHeader;
use machina_core::RunId;
use machina_core::RunRequest;
use machina_core::Selection;
use machina_core::SelectionContext;
use machina_core::SelectionOutcome;
use machina_core::SlotIndex;
use machina_core::StepStatus;
use machina_core::Tx;
use machina_core::hashing::HashError;
use machina_plugins::PluginManager;
use machina_tools::AID_ASK_SUP;
use machina_tools::AID_NOOP;
use machina_tools::LeaseManager;
use machina_tools::RegisteredTool;
use machina_tools::ToolRegistry;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::isolation::SubprocessInvoker;
use crate::merge::LEASE_TOKEN_KEY;
use crate::merge::safe_merge;
use crate::stats::RunnerStats;
use crate::stats::RunnerStatsSnapshot;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Consecutive identical (menu, state) digests before the loop guard trips.
const LOOP_GUARD_STREAK: u32 = 3;
/// Cap on raw selector output recorded per audit event.
const RAW_OUTPUT_AUDIT_CAP: usize = 4_096;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors that prevent a run from proceeding at all.
///
/// # Invariants
/// - Step-level failures (tool errors, invalid picks) are not errors here;
///   they are recorded events inside a run.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Goal is unknown and the request supplied no candidate tags.
    #[error("unknown goal: {0}")]
    UnknownGoal(String),
    /// Audit log could not be created or written.
    #[error("audit failure: {0}")]
    Audit(#[from] AuditError),
    /// A digest could not be computed.
    #[error("digest failure: {0}")]
    Hash(#[from] HashError),
    /// Menu exceeded the SID space.
    #[error("menu too large for SID space")]
    MenuTooLarge,
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Host policy for the runner.
///
/// # Invariants
/// - `isolate_aids` patterns follow the AID filter syntax (exact or
///   `prefix.*`).
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Directory for per-run audit logs.
    pub audit_dir: PathBuf,
    /// Profile stamped on every event.
    pub profile_id: ProfileId,
    /// Step and invalid-pick ceilings.
    pub budget: Budget,
    /// Require leases for tier-1+ tools.
    pub lease_enforce: bool,
    /// Directory rescanned for new plugins after each step.
    pub plugin_dir: Option<PathBuf>,
    /// AIDs routed through the subprocess tool host.
    pub isolate_aids: Vec<String>,
    /// Path to the `machina-toolhost` binary for isolated dispatch.
    pub toolhost_bin: Option<PathBuf>,
    /// Per-AID input-patch allow-lists.
    pub tool_input_allowlists: BTreeMap<String, Vec<String>>,
}

impl RunnerConfig {
    /// Creates a config with defaults for one audit directory.
    #[must_use]
    pub fn new(audit_dir: PathBuf, profile_id: ProfileId) -> Self {
        Self {
            audit_dir,
            profile_id,
            budget: Budget::default(),
            lease_enforce: false,
            plugin_dir: None,
            isolate_aids: Vec::new(),
            toolhost_bin: None,
            tool_input_allowlists: BTreeMap::new(),
        }
    }
}

// ============================================================================
// SECTION: Outcomes
// ============================================================================

/// How a run ended.
///
/// # Invariants
/// - Mirrors the final audit event (`goal_done` or `breaker_trip`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Run ended OK; `via` is `goal`, `noop`, or `ask_sup`.
    GoalDone {
        /// What ended the run.
        via: String,
    },
    /// A budget or guard tripped; `reason` is `max_steps`, `invalid_picks`,
    /// `loop_guard`, or `tool_breaker`.
    BreakerTrip {
        /// What tripped.
        reason: String,
    },
}

/// Result of one completed run.
#[derive(Debug)]
pub struct RunOutcome {
    /// Run identifier.
    pub run_id: RunId,
    /// Path of the run's audit log.
    pub audit_path: PathBuf,
    /// How the run ended.
    pub termination: Termination,
    /// Steps executed.
    pub steps: u64,
    /// Invalid picks observed.
    pub invalid_picks: u32,
    /// Final committed state.
    pub final_state: DsState,
}

// ============================================================================
// SECTION: Runner
// ============================================================================

/// The goal loop.
///
/// # Invariants
/// - Single-threaded per run: one `run` call owns its state and transactions
///   exclusively.
/// - Committed state mutates only at the post-dispatch commit.
pub struct Runner {
    /// Tools available to menus and dispatch.
    registry: Arc<ToolRegistry>,
    /// Goal completion predicates.
    goals: GoalRegistry,
    /// Decision source for every step.
    selector: Arc<dyn DecisionSource>,
    /// Lease verifier for tiered tools.
    leases: Option<Arc<LeaseManager>>,
    /// Plugin loader for the post-step rescan.
    plugins: Option<Arc<PluginManager>>,
    /// Host policy.
    config: RunnerConfig,
    /// Monotonic counters.
    stats: RunnerStats,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Runner {
    /// Creates a runner over its collaborators.
    #[must_use]
    pub fn new(
        registry: Arc<ToolRegistry>,
        goals: GoalRegistry,
        selector: Arc<dyn DecisionSource>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            registry,
            goals,
            selector,
            leases: None,
            plugins: None,
            config,
            stats: RunnerStats::default(),
        }
    }

    /// Attaches a lease manager.
    #[must_use]
    pub fn with_leases(mut self, leases: Arc<LeaseManager>) -> Self {
        self.leases = Some(leases);
        self
    }

    /// Attaches a plugin manager for the post-step rescan.
    #[must_use]
    pub fn with_plugins(mut self, plugins: Arc<PluginManager>) -> Self {
        self.plugins = Some(plugins);
        self
    }

    /// Snapshots the runner counters.
    #[must_use]
    pub fn stats_snapshot(&self) -> RunnerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Runs one request to completion or trip.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError`] when the run cannot proceed at all (unknown
    /// goal without tags, audit failure, digest failure). Step-level
    /// failures are recorded in the audit log and do not surface here.
    pub fn run(&self, request: &RunRequest) -> Result<RunOutcome, RunnerError> {
        let candidate_tags = match (&request.candidate_tags, self.goals.resolve(&request.goal_id))
        {
            (Some(tags), _) => tags.clone(),
            (None, Some(goal)) => goal.candidate_tags.clone(),
            (None, None) => {
                return Err(RunnerError::UnknownGoal(request.goal_id.as_str().to_string()));
            }
        };

        let run_id = RunId::new(Uuid::new_v4().to_string());
        let header = RunHeader::new(
            self.config.profile_id.clone(),
            run_id.clone(),
            request.request_id.clone(),
        );
        let log = AuditLog::create(&self.config.audit_dir, header)?;
        self.stats.runs_started.fetch_add(1, Ordering::Relaxed);

        let mut state = DsState::new();
        let mut inputs = request.inputs.clone();
        let mut step: u64 = 0;
        let mut invalid_picks: u32 = 0;
        let mut guard_pair: Option<(u64, u64)> = None;
        let mut guard_streak: u32 = 0;

        log.append(step, EventKind::RunStart, json!({
            "goal_id": request.goal_id,
            "control_mode": request.control_mode,
            "candidate_tags": candidate_tags,
            "inputs_keys": keys_of(&inputs),
        }))?;

        let termination = loop {
            // 1. Completion.
            if self.goals.is_complete(&request.goal_id, &state) {
                log.append(step, EventKind::GoalDone, json!({"via": "goal"}))?;
                break Termination::GoalDone {
                    via: "goal".to_string(),
                };
            }

            // 2. Budgets.
            if step >= u64::from(self.config.budget.max_steps) {
                log.append(step, EventKind::BreakerTrip, json!({"reason": "max_steps"}))?;
                break Termination::BreakerTrip {
                    reason: "max_steps".to_string(),
                };
            }
            if invalid_picks >= self.config.budget.max_invalid_picks {
                log.append(step, EventKind::BreakerTrip, json!({"reason": "invalid_picks"}))?;
                break Termination::BreakerTrip {
                    reason: "invalid_picks".to_string(),
                };
            }

            // 3. Menu.
            let menu = self.build_menu(&candidate_tags, request.capability_filter.as_ref())?;
            let menu_digest = menu.digest()?;
            log.append(step, EventKind::MenuBuilt, json!({
                "menu_digest": menu_digest,
                "items": menu.len(),
            }))?;

            // Loop guard over the fast digests.
            let pair = (menu.digest_fast()?, state.digest_fast()?);
            if guard_pair == Some(pair) {
                guard_streak += 1;
            } else {
                guard_pair = Some(pair);
                guard_streak = 1;
            }
            if guard_streak >= LOOP_GUARD_STREAK {
                log.append(step, EventKind::BreakerTrip, json!({"reason": "loop_guard"}))?;
                break Termination::BreakerTrip {
                    reason: "loop_guard".to_string(),
                };
            }

            // 4. Selection.
            let goal_digest = format!(
                "{}|{}|FLAGS:{}",
                request.goal_id, menu_digest, request.control_mode
            );
            let state_digest = state.digest()?;
            log.append(step, EventKind::SelectorInvoked, json!({
                "control_mode": request.control_mode,
                "goal_digest": goal_digest,
                "state_digest": state_digest,
            }))?;
            let outcome = self.selector.decide(&SelectionContext {
                menu: &menu,
                goal_digest: &goal_digest,
                state_digest: &state_digest,
                control_mode: request.control_mode,
                inputs: &inputs,
            });
            self.append_selector_chosen(&log, step, &outcome)?;

            // 5. Interpretation.
            match outcome.selection {
                Selection::Noop => {
                    log.append(step, EventKind::GoalDone, json!({"via": "noop"}))?;
                    break Termination::GoalDone {
                        via: "noop".to_string(),
                    };
                }
                Selection::AskSup => {
                    break self.finish_ask_sup(&log, step, request, &mut state)?;
                }
                Selection::Invalid => {
                    invalid_picks += 1;
                    self.stats.invalid_picks_total.fetch_add(1, Ordering::Relaxed);
                    log.append(step, EventKind::InvalidPick, json!({
                        "raw_output": cap_raw(&outcome.raw_output),
                    }))?;
                }
                Selection::Pick {
                    sid,
                    input_patch,
                } => {
                    let Some(item) = menu.lookup(sid) else {
                        invalid_picks += 1;
                        self.stats.invalid_picks_total.fetch_add(1, Ordering::Relaxed);
                        log.append(step, EventKind::InvalidPick, json!({
                            "reason": "sid not in menu",
                            "sid": sid.to_string(),
                        }))?;
                        step += 1;
                        self.stats.steps_total.fetch_add(1, Ordering::Relaxed);
                        continue;
                    };
                    let aid = item.aid.clone();

                    // Terminal picks behave like their grammar forms.
                    if aid.as_str() == AID_NOOP {
                        log.append(step, EventKind::GoalDone, json!({"via": "noop"}))?;
                        break Termination::GoalDone {
                            via: "noop".to_string(),
                        };
                    }
                    if aid.as_str() == AID_ASK_SUP {
                        break self.finish_ask_sup(&log, step, request, &mut state)?;
                    }

                    // 6. Input patch.
                    if let Some(patch) = input_patch {
                        let allowlist = self
                            .config
                            .tool_input_allowlists
                            .get(aid.as_str())
                            .map(Vec::as_slice);
                        let applied_keys = safe_merge(&mut inputs, &patch, allowlist);
                        let applied: Map<String, Value> = applied_keys
                            .iter()
                            .filter_map(|key| {
                                inputs.get(key).map(|value| (key.clone(), value.clone()))
                            })
                            .collect();
                        log.append(step, EventKind::InputsPatched, json!({
                            "keys": applied_keys,
                            "patch": applied,
                        }))?;
                    }

                    // 7-9. Lease gate and dispatch.
                    if let Some(trip) =
                        self.dispatch(&log, step, &aid, &mut inputs, &mut state, &mut invalid_picks)?
                    {
                        break trip;
                    }
                }
            }

            // 10. Post-step plugin rescan.
            if let (Some(plugins), Some(dir)) = (&self.plugins, &self.config.plugin_dir) {
                // Scan failures are not step failures; new tools simply do
                // not appear this run.
                let _ = plugins.load_new_from_dir(dir, self.registry.as_ref());
            }

            step += 1;
            self.stats.steps_total.fetch_add(1, Ordering::Relaxed);
        };

        match &termination {
            Termination::GoalDone {
                ..
            } => self.stats.runs_completed.fetch_add(1, Ordering::Relaxed),
            Termination::BreakerTrip {
                ..
            } => self.stats.runs_tripped.fetch_add(1, Ordering::Relaxed),
        };
        Ok(RunOutcome {
            run_id,
            audit_path: log.path().to_path_buf(),
            termination,
            steps: step,
            invalid_picks,
            final_state: state,
        })
    }

    /// Builds the step menu: tag hits plus terminal options, AID-filtered.
    fn build_menu(
        &self,
        candidate_tags: &[String],
        filter: Option<&CapabilityFilter>,
    ) -> Result<Menu, RunnerError> {
        let mut descs = self.registry.by_tags(&candidate_tags.to_vec());
        for terminal in [AID_NOOP, AID_ASK_SUP] {
            let aid = Aid::new(terminal);
            if !descs.iter().any(|desc| desc.aid == aid) {
                if let Some(tool) = self.registry.lookup(&aid) {
                    descs.push(tool.desc);
                }
            }
        }
        let candidates: Vec<(Aid, String, Vec<String>)> = descs
            .into_iter()
            .filter(|desc| filter.is_none_or(|filter| filter.permits(&desc.aid)))
            .map(|desc| (desc.aid, desc.name, desc.tags))
            .collect();
        Menu::assign(candidates).ok_or(RunnerError::MenuTooLarge)
    }

    /// Appends the `selector_chosen` event.
    fn append_selector_chosen(
        &self,
        log: &AuditLog,
        step: u64,
        outcome: &SelectionOutcome,
    ) -> Result<(), RunnerError> {
        let mut payload = json!({
            "kind": outcome.selection.kind(),
            "source": outcome.source,
            "raw_output": cap_raw(&outcome.raw_output),
        });
        if let Some(shadow) = &outcome.shadow_raw_output {
            payload["shadow_raw_output"] = Value::String(cap_raw(shadow));
        }
        log.append(step, EventKind::SelectorChosen, payload)?;
        Ok(())
    }

    /// Writes the supervisor-request marker to DS1 and ends the run OK.
    fn finish_ask_sup(
        &self,
        log: &AuditLog,
        step: u64,
        request: &RunRequest,
        state: &mut DsState,
    ) -> Result<Termination, RunnerError> {
        let marker = json!({
            "goal_id": request.goal_id,
            "step": step,
        });
        let mut tx = Tx::begin(state);
        tx.tmp_mut().set_slot(
            SlotIndex::DS1,
            Some(Artifact::new("supervisor_request", marker.to_string(), "runner")),
        );
        let patch = tx.commit(state);
        log.append(step, EventKind::GoalDone, json!({
            "via": "ask_sup",
            "tx_patch": patch,
        }))?;
        Ok(Termination::GoalDone {
            via: "ask_sup".to_string(),
        })
    }

    /// Lease gate plus transactional dispatch for one picked tool.
    ///
    /// Returns `Some(termination)` when the tool demands the run stop.
    fn dispatch(
        &self,
        log: &AuditLog,
        step: u64,
        aid: &Aid,
        inputs: &mut Map<String, Value>,
        state: &mut DsState,
        invalid_picks: &mut u32,
    ) -> Result<Option<Termination>, RunnerError> {
        let Some(tool) = self.registry.lookup(aid) else {
            log.append(step, EventKind::ToolError, json!({
                "aid": aid,
                "error": "tool disappeared from registry",
                "inputs_keys": keys_of(inputs),
            }))?;
            return Ok(None);
        };

        // 7. Lease gate; the token is stripped whether or not it was needed.
        let lease_token = inputs.remove(LEASE_TOKEN_KEY);
        if self.config.lease_enforce && tool.desc.tier.level() > 0 {
            let Some(leases) = &self.leases else {
                log.append(step, EventKind::ToolError, json!({
                    "aid": aid,
                    "reason": "lease_required",
                    "tier": tool.desc.tier.level(),
                    "error": "lease enforcement on without a lease manager",
                    "inputs_keys": keys_of(inputs),
                }))?;
                return Ok(None);
            };
            let Some(token) = lease_token.as_ref().and_then(Value::as_str) else {
                log.append(step, EventKind::ToolError, json!({
                    "aid": aid,
                    "reason": "lease_required",
                    "tier": tool.desc.tier.level(),
                    "error": "no _lease_token in inputs",
                    "inputs_keys": keys_of(inputs),
                }))?;
                return Ok(None);
            };
            match leases.verify_and_consume(token, aid) {
                Ok(lease) => {
                    log.append(step, EventKind::LeaseConsumed, json!({
                        "aid": aid,
                        "lease_id": lease.id,
                        "tier": lease.tier.level(),
                    }))?;
                }
                Err(rejection) => {
                    log.append(step, EventKind::ToolError, json!({
                        "aid": aid,
                        "reason": "lease_rejected",
                        "detail": rejection.as_str(),
                        "inputs_keys": keys_of(inputs),
                    }))?;
                    return Ok(None);
                }
            }
        }

        // 8. Dispatch inside a transaction.
        let input_json = serde_json::to_string(inputs)
            .map_err(|err| RunnerError::Audit(AuditError::Serialize(err.to_string())))?;
        log.append(step, EventKind::ToolInvoked, json!({
            "aid": aid,
            "inputs_keys": keys_of(inputs),
        }))?;

        let invoker = self.route_invoker(aid, &tool);
        let mut tx = Tx::begin(state);
        let started = Instant::now();
        let outcome = invoker.invoke(&input_json, &mut tx);
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        // 9. Commit or roll back.
        match outcome.status {
            StepStatus::Ok => {
                let patch = tx.commit(state);
                log.append(step, EventKind::ToolOk, json!({
                    "aid": aid,
                    "duration_ms": duration_ms,
                    "status": StepStatus::Ok,
                    "tx_patch": patch,
                }))?;
                Ok(None)
            }
            StepStatus::InvalidPick => {
                tx.rollback();
                *invalid_picks += 1;
                self.stats.invalid_picks_total.fetch_add(1, Ordering::Relaxed);
                log.append(step, EventKind::InvalidPick, json!({
                    "aid": aid,
                    "error": outcome.error,
                }))?;
                Ok(None)
            }
            StepStatus::ToolError => {
                tx.rollback();
                log.append(step, EventKind::ToolError, json!({
                    "aid": aid,
                    "error": outcome.error,
                    "duration_ms": duration_ms,
                    "inputs_keys": keys_of(inputs),
                }))?;
                Ok(None)
            }
            StepStatus::BreakerTrip => {
                tx.rollback();
                log.append(step, EventKind::ToolError, json!({
                    "aid": aid,
                    "error": outcome.error,
                    "inputs_keys": keys_of(inputs),
                }))?;
                log.append(step, EventKind::BreakerTrip, json!({"reason": "tool_breaker"}))?;
                Ok(Some(Termination::BreakerTrip {
                    reason: "tool_breaker".to_string(),
                }))
            }
        }
    }

    /// Chooses in-process or subprocess execution for an AID.
    fn route_invoker(
        &self,
        aid: &Aid,
        tool: &RegisteredTool,
    ) -> Arc<dyn machina_core::ToolInvoker> {
        let isolated = self
            .config
            .isolate_aids
            .iter()
            .any(|pattern| CapabilityFilter::pattern_matches(pattern, aid));
        match (&self.config.toolhost_bin, isolated) {
            (Some(bin), true) => Arc::new(SubprocessInvoker::new(
                bin.clone(),
                "builtin",
                aid.clone(),
            )),
            _ => Arc::clone(&tool.invoker),
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the key list of a JSON object, for diagnostics (never values).
fn keys_of(inputs: &Map<String, Value>) -> Vec<String> {
    inputs.keys().cloned().collect()
}

/// Caps raw selector output for the audit record.
fn cap_raw(raw: &str) -> String {
    if raw.len() <= RAW_OUTPUT_AUDIT_CAP {
        return raw.to_string();
    }
    let mut end = RAW_OUTPUT_AUDIT_CAP;
    while end > 0 && !raw.is_char_boundary(end) {
        end -= 1;
    }
    raw[.. end].to_string()
}
