//! Workflow entrypoints used by the CLI: status, repair, and plan.
//!
//! Each workflow loads the installed record first; a formation that is not
//! installed (or whose record is malformed) fails before anything else is
//! read or written.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use formation_core::{
    paths, state_store, Discrepancy, Interpolator, LastAppliedState, MigrationPlan, RuntimeConfig,
};
use formation_gateway::{resolve, GatewayOptions};

use crate::differ::{collect_discrepancies, LiveJobs};
use crate::error::SyncError;
use crate::planner::plan_migration;
use crate::repair::{GatewayConnector, RepairEngine, RepairOutcome, SchedulerConnector};
use crate::source::{compute_file_hashes, resolve_variables, RepairSource};

/// Where a workflow reads and writes, and how it reaches the gateway.
#[derive(Debug, Clone)]
pub struct Context {
    pub home: PathBuf,
    pub namespace: String,
    pub name: String,
    pub runtime_config_path: PathBuf,
    pub gateway: GatewayOptions,
}

impl Context {
    /// Runtime config path follows `$FORMATION_RUNTIME_CONFIG` when set.
    pub fn new(
        home: impl Into<PathBuf>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let home = home.into();
        let runtime_config_path = paths::runtime_config_path_at(&home);
        Self {
            home,
            namespace: namespace.into(),
            name: name.into(),
            runtime_config_path,
            gateway: GatewayOptions::default(),
        }
    }

    pub fn with_gateway(mut self, gateway: GatewayOptions) -> Self {
        self.gateway = gateway;
        self
    }

    pub fn with_runtime_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.runtime_config_path = path.into();
        self
    }

    fn load(&self) -> Result<(LastAppliedState, RuntimeConfig), SyncError> {
        let state = state_store::load_at(&self.home, &self.namespace, &self.name)?;
        let config = RuntimeConfig::load(&self.runtime_config_path)?;
        Ok((state, config))
    }

    /// Resolve the gateway against `config`. Credential and URL problems are
    /// fatal here rather than degrading to "unreachable".
    pub fn connector(&self, config: &RuntimeConfig) -> Result<GatewayConnector, SyncError> {
        let resolved = resolve(&self.gateway, None, config, |key| std::env::var(key).ok())?;
        Ok(GatewayConnector::new(resolved))
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SchedulerStatus {
    Reachable,
    /// Cron checks were skipped.
    Unknown { reason: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub namespace: String,
    pub name: String,
    pub version: String,
    pub scheduler: SchedulerStatus,
    pub discrepancies: Vec<Discrepancy>,
}

impl StatusReport {
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }

    pub fn fixable(&self) -> usize {
        self.discrepancies.iter().filter(|d| d.fixable).count()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    /// Status before any repair ran.
    pub status: StatusReport,
    pub outcome: RepairOutcome,
    pub config_written: bool,
    pub state_written: bool,
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Compare the installed record with the runtime config, the workspaces,
/// and the scheduler.
pub async fn check(ctx: &Context) -> Result<StatusReport, SyncError> {
    let (state, config) = ctx.load()?;
    let connector = ctx.connector(&config)?;
    Ok(inspect(&state, &config, &connector).await)
}

/// [`check`] against an explicit scheduler connector.
pub async fn check_with<C: SchedulerConnector>(
    ctx: &Context,
    connector: &C,
) -> Result<StatusReport, SyncError> {
    let (state, config) = ctx.load()?;
    Ok(inspect(&state, &config, connector).await)
}

async fn inspect<C: SchedulerConnector>(
    state: &LastAppliedState,
    config: &RuntimeConfig,
    connector: &C,
) -> StatusReport {
    let (live, scheduler) = fetch_live_jobs(connector).await;
    StatusReport {
        namespace: state.namespace.clone(),
        name: state.name.clone(),
        version: state.version.clone(),
        scheduler,
        discrepancies: collect_discrepancies(state, config, &live),
    }
}

/// List scheduler jobs. Any failure to reach or query the scheduler
/// degrades to [`LiveJobs::Unreachable`].
pub async fn fetch_live_jobs<C: SchedulerConnector>(connector: &C) -> (LiveJobs, SchedulerStatus) {
    let scheduler = match connector.connect().await {
        Ok(scheduler) => scheduler,
        Err(err) => {
            tracing::warn!(error = %err, "scheduler unreachable; cron status unknown");
            return (
                LiveJobs::Unreachable,
                SchedulerStatus::Unknown {
                    reason: err.to_string(),
                },
            );
        }
    };
    let listed = scheduler.list_jobs().await;
    scheduler.close().await;
    match listed {
        Ok(jobs) => {
            tracing::debug!(jobs = jobs.len(), "listed scheduler jobs");
            (LiveJobs::Jobs(jobs), SchedulerStatus::Reachable)
        }
        Err(err) => {
            tracing::warn!(error = %err, "cron.list failed; cron status unknown");
            (
                LiveJobs::Unreachable,
                SchedulerStatus::Unknown {
                    reason: err.to_string(),
                },
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Repair
// ---------------------------------------------------------------------------

/// Check, repair in memory, then persist whichever documents changed.
pub async fn repair(
    ctx: &Context,
    source: Option<RepairSource>,
) -> Result<RepairReport, SyncError> {
    let config = RuntimeConfig::load(&ctx.runtime_config_path)?;
    let connector = ctx.connector(&config)?;
    repair_with(ctx, source, connector).await
}

/// [`repair`] against an explicit scheduler connector.
pub async fn repair_with<C: SchedulerConnector>(
    ctx: &Context,
    source: Option<RepairSource>,
    connector: C,
) -> Result<RepairReport, SyncError> {
    let (mut state, mut config) = ctx.load()?;
    let status = inspect(&state, &config, &connector).await;
    if status.is_clean() {
        tracing::info!(namespace = %ctx.namespace, name = %ctx.name, "nothing to repair");
        return Ok(RepairReport {
            status,
            outcome: RepairOutcome::default(),
            config_written: false,
            state_written: false,
        });
    }

    let engine = RepairEngine::new(connector).with_source(source);
    let outcome = engine
        .repair(&status.discrepancies, &mut state, &mut config)
        .await?;

    let config_written = outcome.config_dirty;
    if config_written {
        if let Err(err) = config.save_to(&ctx.runtime_config_path) {
            warn_unsaved_jobs(&outcome);
            return Err(err.into());
        }
    }

    let state_written = outcome.state_dirty;
    if state_written {
        state.updated_at = Utc::now();
        if let Err(err) = state_store::save_at(&ctx.home, &state) {
            warn_unsaved_jobs(&outcome);
            return Err(err.into());
        }
        tracing::info!(namespace = %state.namespace, name = %state.name, "saved formation state");
    }

    tracing::info!(
        repaired = outcome.repaired,
        partial = outcome.partial,
        needs_source = outcome.needs_source,
        failed = outcome.failed,
        "repair finished"
    );
    Ok(RepairReport {
        status,
        outcome,
        config_written,
        state_written,
    })
}

/// Jobs recreated in the scheduler whose new ids never reached the record.
fn warn_unsaved_jobs(outcome: &RepairOutcome) {
    for job in &outcome.recreated_jobs {
        tracing::warn!(
            job = %job.name,
            old_id = %job.old_id,
            new_id = %job.new_id,
            "cron job recreated but state not saved; remove the duplicate by hand before retrying"
        );
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Plan an upgrade of the installed formation to the manifest at
/// `manifest_path`. Nothing is written.
pub fn plan(ctx: &Context, manifest_path: &Path) -> Result<MigrationPlan, SyncError> {
    plan_with_env(ctx, manifest_path, |key| std::env::var(key).ok())
}

/// [`plan`] with an explicit environment lookup for variables.
pub fn plan_with_env<F>(
    ctx: &Context,
    manifest_path: &Path,
    env: F,
) -> Result<MigrationPlan, SyncError>
where
    F: Fn(&str) -> Option<String>,
{
    let state = state_store::load_at(&ctx.home, &ctx.namespace, &ctx.name)?;
    let source = RepairSource::load(manifest_path)?;
    let manifest = &source.manifest;
    if manifest.namespace != state.namespace {
        tracing::warn!(
            installed = %state.namespace,
            manifest = %manifest.namespace,
            "manifest namespace differs from the installed one"
        );
    }

    let variables = resolve_variables(manifest, Some(&state), env);
    let interpolator = Interpolator::new(variables)?;
    let agent_ids = manifest.agent_ids();
    let hashes = compute_file_hashes(&source, &agent_ids, &interpolator)?;
    let plan = plan_migration(
        &state,
        manifest,
        &manifest.namespace,
        &agent_ids,
        &hashes,
        &interpolator,
    );
    tracing::debug!(empty = plan.is_empty, "planned migration");
    Ok(plan)
}
