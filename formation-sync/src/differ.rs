//! State differ: last-applied state vs. observed reality.
//!
//! Three independent sub-diffs, one per live source. All are read-only; the
//! filesystem diff reads files but never writes them.

use std::collections::BTreeSet;

use formation_core::hash::hash_file;
use formation_core::patcher::has_binding;
use formation_core::paths::join_relative;
use formation_core::types::namespace_pattern;
use formation_core::{Discrepancy, DiscrepancyType, LastAppliedState, RuntimeConfig};
use formation_gateway::CronJob;

/// What the scheduler reported. `Unreachable` is not the same as "no jobs":
/// cron checks are skipped rather than reported as drift.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveJobs {
    Unreachable,
    Jobs(Vec<CronJob>),
}

impl LiveJobs {
    pub fn is_reachable(&self) -> bool {
        matches!(self, LiveJobs::Jobs(_))
    }
}

/// Agents, bindings and the agent-to-agent allow pattern against the
/// runtime config.
pub fn diff_state_vs_config(state: &LastAppliedState, config: &RuntimeConfig) -> Vec<Discrepancy> {
    let mut out = Vec::new();

    for (slug, agent) in &state.agents {
        if !config.has_agent(agent.id.as_str()) {
            out.push(Discrepancy::agent_missing(slug, &agent.id));
        }
    }

    for binding in &state.bindings {
        if !has_binding(config, binding) {
            out.push(Discrepancy::binding_missing(binding));
        }
    }

    let allow_added = state.agent_to_agent.is_some_and(|record| record.allow_added);
    if allow_added {
        let pattern = namespace_pattern(&state.namespace);
        if !config.agent_to_agent_allow().contains(&pattern.as_str()) {
            out.push(Discrepancy::agent_to_agent_missing(&state.namespace));
        }
    }
    out
}

/// Workspaces and tracked files against their recorded hashes.
pub fn diff_state_vs_filesystem(state: &LastAppliedState) -> Vec<Discrepancy> {
    let mut out = Vec::new();

    for (slug, agent) in &state.agents {
        if !agent.workspace.is_dir() {
            out.push(Discrepancy::workspace_missing(slug, &agent.id, agent.workspace.clone()));
            continue;
        }
        for (rel, recorded) in state.tracked_files(&agent.id) {
            let path = match join_relative(&agent.workspace, rel) {
                Ok(path) => path,
                Err(err) => {
                    tracing::warn!(agent_id = %agent.id, error = %err, "skipping tracked file");
                    continue;
                }
            };
            if !path.exists() {
                out.push(Discrepancy::file(DiscrepancyType::Missing, slug, &agent.id, rel, path));
                continue;
            }
            let matches = match hash_file(&path) {
                Ok(actual) => actual == recorded,
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "cannot hash tracked file"
                    );
                    false
                }
            };
            if !matches {
                out.push(Discrepancy::file(DiscrepancyType::Changed, slug, &agent.id, rel, path));
            }
        }
    }
    out
}

/// Recorded cron jobs against the scheduler's job list.
pub fn diff_state_vs_cron(state: &LastAppliedState, live: &LiveJobs) -> Vec<Discrepancy> {
    let LiveJobs::Jobs(jobs) = live else {
        tracing::debug!("scheduler unreachable; cron state unknown");
        return Vec::new();
    };
    let live_ids: BTreeSet<&str> = jobs.iter().map(|job| job.id.as_str()).collect();
    state
        .cron_jobs
        .iter()
        .filter(|job| !live_ids.contains(job.id.as_str()))
        .map(Discrepancy::cron_missing)
        .collect()
}

/// Config, then filesystem, then cron. Sources are not cross-deduplicated.
pub fn collect_discrepancies(
    state: &LastAppliedState,
    config: &RuntimeConfig,
    live: &LiveJobs,
) -> Vec<Discrepancy> {
    let mut all = diff_state_vs_config(state, config);
    all.extend(diff_state_vs_filesystem(state));
    all.extend(diff_state_vs_cron(state, live));
    tracing::debug!(
        namespace = %state.namespace,
        name = %state.name,
        count = all.len(),
        "collected discrepancies"
    );
    all
}
