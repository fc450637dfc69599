//! Repair engine: discrepancy → corrective action.
//!
//! Repairs run sequentially against in-memory copies of the runtime config
//! and the state record. The engine never writes either document; it
//! reports `config_dirty` / `state_dirty` and the caller persists only what
//! changed. Workspace files are the exception: restoring them is the repair.
//!
//! There is no cross-discrepancy atomicity. A failed repair is logged,
//! counted, and the pass moves on.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use formation_core::atomic::write_atomic;
use formation_core::hash::sha256_hex;
use formation_core::interpolate::safe_variables;
use formation_core::patcher::{self, AgentEntry};
use formation_core::paths::join_relative;
use formation_core::types::file_hash_key;
use formation_core::{
    AgentId, AgentSlug, Discrepancy, DiscrepancyTarget, Interpolator, LastAppliedState,
    RuntimeConfig,
};
use formation_gateway::{
    CronAddSpec, CronScheduler, GatewayClient, GatewayError, ResolvedGateway,
};

use crate::error::{io_err, SyncError};
use crate::source::RepairSource;

// ---------------------------------------------------------------------------
// Scheduler access
// ---------------------------------------------------------------------------

/// Opens a scheduler session on demand.
#[async_trait]
pub trait SchedulerConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn CronScheduler>, GatewayError>;
}

/// Connects through the gateway RPC client.
#[derive(Debug, Clone)]
pub struct GatewayConnector {
    resolved: ResolvedGateway,
}

impl GatewayConnector {
    pub fn new(resolved: ResolvedGateway) -> Self {
        Self { resolved }
    }
}

#[async_trait]
impl SchedulerConnector for GatewayConnector {
    async fn connect(&self) -> Result<Box<dyn CronScheduler>, GatewayError> {
        let client = GatewayClient::connect(&self.resolved).await?;
        Ok(Box::new(client))
    }
}

/// One connection attempt per repair pass.
enum Session {
    NotTried,
    Open(Box<dyn CronScheduler>),
    Failed(String),
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairAction {
    Repaired,
    /// Something was done but the entity is not fully restored.
    Partial,
    NeedsSource,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepairLogEntry {
    pub discrepancy: Discrepancy,
    pub action: RepairAction,
    pub detail: String,
}

/// A cron job recreated during the pass, with its new scheduler id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecreatedJob {
    pub name: String,
    pub old_id: String,
    pub new_id: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RepairOutcome {
    pub repaired: usize,
    pub partial: usize,
    pub needs_source: usize,
    pub failed: usize,
    pub log: Vec<RepairLogEntry>,
    pub recreated_jobs: Vec<RecreatedJob>,
    pub config_dirty: bool,
    pub state_dirty: bool,
}

impl RepairOutcome {
    fn record(
        &mut self,
        discrepancy: &Discrepancy,
        action: RepairAction,
        detail: impl Into<String>,
    ) {
        match action {
            RepairAction::Repaired => self.repaired += 1,
            RepairAction::Partial => self.partial += 1,
            RepairAction::NeedsSource => self.needs_source += 1,
            RepairAction::Failed => self.failed += 1,
        }
        self.log.push(RepairLogEntry {
            discrepancy: discrepancy.clone(),
            action,
            detail: detail.into(),
        });
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub struct RepairEngine<C: SchedulerConnector> {
    connector: C,
    source: Option<RepairSource>,
    env: EnvLookup,
}

impl<C: SchedulerConnector> RepairEngine<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            source: None,
            env: Arc::new(|name| std::env::var(name).ok()),
        }
    }

    /// Source tree used to restore workspace files.
    pub fn with_source(mut self, source: Option<RepairSource>) -> Self {
        self.source = source;
        self
    }

    /// Replace the environment lookup used for sensitive variables.
    pub fn with_env<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(env);
        self
    }

    /// Apply every repair it can. Mutates `state` and `config` in memory.
    pub async fn repair(
        &self,
        discrepancies: &[Discrepancy],
        state: &mut LastAppliedState,
        config: &mut RuntimeConfig,
    ) -> Result<RepairOutcome, SyncError> {
        let mut outcome = RepairOutcome::default();
        let mut session = Session::NotTried;
        let env = self.env.clone();
        let interpolator = Interpolator::new(safe_variables(&state.variables, |name| env(name)))?;

        for discrepancy in discrepancies {
            let (action, detail) = match self
                .repair_one(discrepancy, state, config, &interpolator, &mut session, &mut outcome)
                .await
            {
                Ok(result) => result,
                Err(err) => {
                    tracing::warn!(kind = %discrepancy.kind, error = %err, "repair failed");
                    (RepairAction::Failed, err.to_string())
                }
            };
            match action {
                RepairAction::Repaired | RepairAction::Partial => tracing::info!(
                    kind = %discrepancy.kind,
                    action = ?action,
                    "{}",
                    detail
                ),
                _ => tracing::debug!(kind = %discrepancy.kind, action = ?action, "{}", detail),
            }
            outcome.record(discrepancy, action, detail);
        }

        if let Session::Open(scheduler) = session {
            scheduler.close().await;
        }
        Ok(outcome)
    }

    async fn repair_one(
        &self,
        discrepancy: &Discrepancy,
        state: &mut LastAppliedState,
        config: &mut RuntimeConfig,
        interpolator: &Interpolator,
        session: &mut Session,
        outcome: &mut RepairOutcome,
    ) -> Result<(RepairAction, String), SyncError> {
        match (&discrepancy.target, discrepancy.fixable) {
            (DiscrepancyTarget::Agent { slug, agent_id }, true) => {
                let Some(agent) = state.agents.get(slug) else {
                    return Ok((RepairAction::Failed, format!("no recorded agent '{slug}'")));
                };
                let entry = AgentEntry::from_state(agent);
                if patcher::add_agent_entry(config, &entry)? {
                    outcome.config_dirty = true;
                }
                Ok((RepairAction::Repaired, format!("restored agents.list entry '{agent_id}'")))
            }

            (DiscrepancyTarget::Binding { binding }, true) => {
                if patcher::add_binding(config, binding)? {
                    outcome.config_dirty = true;
                }
                Ok((
                    RepairAction::Repaired,
                    format!("restored binding for '{}'", binding.agent_id),
                ))
            }

            (DiscrepancyTarget::AgentToAgent { pattern }, true) => {
                let changed = match state.edges.edges() {
                    Some(edges) if edges.values().any(|targets| !targets.is_empty()) => {
                        patcher::recompute_agent_to_agent(config, &state.namespace, Some(edges))?
                    }
                    _ => patcher::allow_namespace(config, &state.namespace)?,
                };
                if changed {
                    outcome.config_dirty = true;
                }
                Ok((RepairAction::Repaired, format!("restored '{pattern}' in agentToAgent.allow")))
            }

            (DiscrepancyTarget::CronJob { job_id, .. }, true) => {
                self.recreate_cron_job(job_id, state, session, outcome).await
            }

            (DiscrepancyTarget::Workspace { slug, agent_id, path }, _) => {
                self.restore_workspace(slug, agent_id, path, state, interpolator, outcome)
            }

            (DiscrepancyTarget::File { slug, agent_id, rel_path, path }, _) => {
                self.restore_file(slug, agent_id, rel_path, path, state, interpolator, outcome)
            }

            _ => Ok((RepairAction::NeedsSource, discrepancy.description.clone())),
        }
    }

    async fn recreate_cron_job(
        &self,
        job_id: &str,
        state: &mut LastAppliedState,
        session: &mut Session,
        outcome: &mut RepairOutcome,
    ) -> Result<(RepairAction, String), SyncError> {
        let Some(index) = state.cron_jobs.iter().position(|job| job.id == job_id) else {
            return Ok((RepairAction::Failed, format!("no recorded cron job '{job_id}'")));
        };
        let job = state.cron_jobs[index].clone();
        let (Some(schedule), Some(prompt)) = (job.schedule.clone(), job.prompt.clone()) else {
            return Ok((RepairAction::NeedsSource, format!("cron job '{}' not retained", job.name)));
        };
        let Some(agent_id) = state.agent_id_of(&job.agent_slug).cloned() else {
            return Ok((
                RepairAction::Failed,
                format!("cron job '{}' targets unknown agent '{}'", job.name, job.agent_slug),
            ));
        };

        if let Session::NotTried = session {
            *session = match self.connector.connect().await {
                Ok(scheduler) => Session::Open(scheduler),
                Err(err) => {
                    tracing::warn!(error = %err, "scheduler unreachable; skipping cron repairs");
                    Session::Failed(err.to_string())
                }
            };
        }
        let scheduler = match session {
            Session::Open(scheduler) => scheduler,
            Session::Failed(reason) => {
                return Ok((RepairAction::Failed, format!("scheduler unreachable: {reason}")));
            }
            Session::NotTried => {
                return Ok((RepairAction::Failed, "scheduler session not opened".to_string()));
            }
        };

        let spec = CronAddSpec {
            name: job.name.clone(),
            agent_id: agent_id.to_string(),
            schedule,
            timezone: job.timezone.clone(),
            prompt,
        };
        match scheduler.add_job(&spec).await {
            Ok(added) => {
                state.cron_jobs[index].id = added.id.clone();
                outcome.state_dirty = true;
                outcome.recreated_jobs.push(RecreatedJob {
                    name: job.name.clone(),
                    old_id: job.id.clone(),
                    new_id: added.id.clone(),
                });
                Ok((
                    RepairAction::Repaired,
                    format!("recreated cron job '{}' as {}", job.name, added.id),
                ))
            }
            Err(err) => {
                tracing::warn!(job = %job.name, error = %err, "cron.add failed");
                Ok((RepairAction::Failed, format!("cron.add for '{}' failed: {err}", job.name)))
            }
        }
    }

    fn restore_workspace(
        &self,
        slug: &AgentSlug,
        agent_id: &AgentId,
        path: &Path,
        state: &mut LastAppliedState,
        interpolator: &Interpolator,
        outcome: &mut RepairOutcome,
    ) -> Result<(RepairAction, String), SyncError> {
        std::fs::create_dir_all(path).map_err(|e| io_err(path, e))?;
        let Some(source) = &self.source else {
            return Ok((
                RepairAction::Partial,
                format!("recreated empty workspace {}; files need a source", path.display()),
            ));
        };

        let tracked: Vec<String> = state
            .tracked_files(agent_id)
            .map(|(rel, _)| rel.to_string())
            .collect();
        let mut unresolved = Vec::new();
        for rel in &tracked {
            match source.render_file(slug, rel, interpolator)? {
                Some(bytes) => {
                    let target = join_relative(path, rel)?;
                    write_tracked(state, agent_id, &target, rel, &bytes, outcome)?;
                }
                None => unresolved.push(rel.clone()),
            }
        }

        if unresolved.is_empty() {
            Ok((
                RepairAction::Repaired,
                format!("restored workspace {} ({} files)", path.display(), tracked.len()),
            ))
        } else {
            Ok((
                RepairAction::Partial,
                format!(
                    "restored workspace {}; not in source: {}",
                    path.display(),
                    unresolved.join(", ")
                ),
            ))
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn restore_file(
        &self,
        slug: &AgentSlug,
        agent_id: &AgentId,
        rel_path: &str,
        path: &Path,
        state: &mut LastAppliedState,
        interpolator: &Interpolator,
        outcome: &mut RepairOutcome,
    ) -> Result<(RepairAction, String), SyncError> {
        let Some(source) = &self.source else {
            return Ok((RepairAction::NeedsSource, format!("{rel_path} needs a source to restore")));
        };
        match source.render_file(slug, rel_path, interpolator)? {
            Some(bytes) => {
                write_tracked(state, agent_id, path, rel_path, &bytes, outcome)?;
                Ok((RepairAction::Repaired, format!("restored {}", path.display())))
            }
            None => Ok((
                RepairAction::NeedsSource,
                format!("{rel_path} not found in source for '{slug}'"),
            )),
        }
    }
}

/// Write rendered bytes and record the hash of what was written.
fn write_tracked(
    state: &mut LastAppliedState,
    agent_id: &AgentId,
    path: &Path,
    rel_path: &str,
    bytes: &[u8],
    outcome: &mut RepairOutcome,
) -> Result<(), SyncError> {
    write_atomic(path, bytes, false)?;
    let hash = sha256_hex(bytes);
    let key = file_hash_key(agent_id, rel_path);
    if state.file_hashes.get(&key) != Some(&hash) {
        state.file_hashes.insert(key, hash);
        outcome.state_dirty = true;
    }
    Ok(())
}
