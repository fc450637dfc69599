//! Migration planner: desired manifest vs. last-applied state.
//!
//! Pure and deterministic. The only inputs besides the two documents are the
//! `slug → agentId` map, freshly computed `fileHashes` for the candidate
//! source tree, and an interpolator over the resolved variables.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use formation_core::patcher::prune_match_object;
use formation_core::plan::{
    AgentChange, AgentChangeKind, BindingChange, CronChange, CronChangeKind, EdgeChange,
    EdgeChangeKind, SetChangeKind, VersionChange,
};
use formation_core::state::{StateBinding, StateCronJob};
use formation_core::types::{agent_id, file_hash_key, split_file_hash_key};
use formation_core::{
    AgentId, AgentSlug, EdgeRecord, Interpolator, LastAppliedState, Manifest, MigrationPlan,
};

pub fn plan_migration(
    state: &LastAppliedState,
    manifest: &Manifest,
    namespace: &str,
    agent_ids: &BTreeMap<AgentSlug, AgentId>,
    new_hashes: &BTreeMap<String, String>,
    interpolator: &Interpolator,
) -> MigrationPlan {
    let resolve_id = |slug: &AgentSlug| {
        agent_ids
            .get(slug)
            .cloned()
            .unwrap_or_else(|| agent_id(namespace, slug))
    };

    let plan = MigrationPlan::new(
        plan_agents(state, manifest, &resolve_id, new_hashes),
        plan_bindings(state, manifest, &resolve_id, interpolator),
        plan_cron(state, manifest, interpolator),
        plan_edges(state, manifest),
        (state.version != manifest.version).then(|| VersionChange {
            from: state.version.clone(),
            to: manifest.version.clone(),
        }),
    );
    tracing::debug!(
        namespace,
        changed_agents = plan.changed_agents().count(),
        bindings = plan.bindings.len(),
        cron = plan.cron.len(),
        a2a = plan.a2a.len(),
        is_empty = plan.is_empty,
        "planned migration"
    );
    plan
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

fn plan_agents(
    state: &LastAppliedState,
    manifest: &Manifest,
    resolve_id: &dyn Fn(&AgentSlug) -> AgentId,
    new_hashes: &BTreeMap<String, String>,
) -> Vec<AgentChange> {
    let mut changes: Vec<AgentChange> = manifest
        .agents
        .keys()
        .filter(|slug| !state.agents.contains_key(*slug))
        .map(|slug| AgentChange {
            slug: slug.clone(),
            kind: AgentChangeKind::Add,
            changed_files: None,
        })
        .collect();

    for (slug, agent) in &state.agents {
        if !manifest.agents.contains_key(slug) {
            changes.push(AgentChange {
                slug: slug.clone(),
                kind: AgentChangeKind::Remove,
                changed_files: None,
            });
            continue;
        }

        let new_id = resolve_id(slug);
        let mut changed = BTreeSet::new();
        let mut tracked = BTreeSet::new();
        for (rel, hash) in state.tracked_files(&agent.id) {
            tracked.insert(rel);
            if new_hashes.get(&file_hash_key(&new_id, rel)).map(String::as_str) != Some(hash) {
                changed.insert(rel.to_string());
            }
        }
        for key in new_hashes.keys() {
            if let Some((id, rel)) = split_file_hash_key(key) {
                if id == new_id.as_str() && !tracked.contains(rel) {
                    changed.insert(rel.to_string());
                }
            }
        }

        changes.push(if changed.is_empty() {
            AgentChange {
                slug: slug.clone(),
                kind: AgentChangeKind::Unchanged,
                changed_files: None,
            }
        } else {
            AgentChange {
                slug: slug.clone(),
                kind: AgentChangeKind::Update,
                changed_files: Some(changed.into_iter().collect()),
            }
        });
    }
    changes
}

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

type BindingKey = (String, String);

fn binding_key(agent_id: &AgentId, pruned: &Value) -> BindingKey {
    (agent_id.to_string(), sorted_keys(pruned).to_string())
}

/// Copy of `value` with every object's keys in sorted order. Maps keep
/// document order, so equal matches can otherwise render differently.
fn sorted_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            Value::Object(
                sorted
                    .into_iter()
                    .map(|(key, item)| (key.clone(), sorted_keys(item)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted_keys).collect()),
        other => other.clone(),
    }
}

fn plan_bindings(
    state: &LastAppliedState,
    manifest: &Manifest,
    resolve_id: &dyn Fn(&AgentSlug) -> AgentId,
    interpolator: &Interpolator,
) -> Vec<BindingChange> {
    let desired: Vec<StateBinding> = manifest
        .bindings
        .iter()
        .map(|binding| StateBinding {
            agent_id: resolve_id(&binding.agent_slug),
            match_: prune_match_object(&interpolator.render_value(&binding.match_)),
        })
        .collect();
    let current: Vec<StateBinding> = state
        .bindings
        .iter()
        .map(|binding| StateBinding {
            agent_id: binding.agent_id.clone(),
            match_: prune_match_object(&binding.match_),
        })
        .collect();

    let desired_keys: BTreeSet<BindingKey> = desired
        .iter()
        .map(|b| binding_key(&b.agent_id, &b.match_))
        .collect();
    let current_keys: BTreeSet<BindingKey> = current
        .iter()
        .map(|b| binding_key(&b.agent_id, &b.match_))
        .collect();

    let mut changes = Vec::new();
    let mut emitted = BTreeSet::new();
    for binding in desired {
        let key = binding_key(&binding.agent_id, &binding.match_);
        if !current_keys.contains(&key) && emitted.insert(key) {
            changes.push(BindingChange {
                kind: SetChangeKind::Add,
                binding,
            });
        }
    }
    for binding in current {
        let key = binding_key(&binding.agent_id, &binding.match_);
        if !desired_keys.contains(&key) && emitted.insert(key) {
            changes.push(BindingChange {
                kind: SetChangeKind::Remove,
                binding,
            });
        }
    }
    changes
}

// ---------------------------------------------------------------------------
// Cron
// ---------------------------------------------------------------------------

fn plan_cron(
    state: &LastAppliedState,
    manifest: &Manifest,
    interpolator: &Interpolator,
) -> Vec<CronChange> {
    let recorded: BTreeMap<(&AgentSlug, &str), &StateCronJob> = state
        .cron_jobs
        .iter()
        .map(|job| ((&job.agent_slug, job.name.as_str()), job))
        .collect();

    let mut changes = Vec::new();
    let mut seen = BTreeSet::new();
    for (entry, name) in manifest.cron.iter().zip(manifest.cron_job_names()) {
        seen.insert((entry.agent_slug.clone(), name.clone()));
        let kind = match recorded.get(&(&entry.agent_slug, name.as_str())) {
            None => Some(CronChangeKind::Add),
            Some(job) => {
                let prompt = interpolator.render(&entry.prompt);
                let schedule_differs = job.schedule.as_ref().is_some_and(|s| *s != entry.schedule);
                let prompt_differs = job.prompt.as_ref().is_some_and(|p| *p != prompt);
                // Timezone is only meaningful on records that kept the schedule.
                let timezone_differs = (job.schedule.is_some() || job.timezone.is_some())
                    && job.timezone != entry.timezone;
                (schedule_differs || prompt_differs || timezone_differs)
                    .then_some(CronChangeKind::Update)
            }
        };
        if let Some(kind) = kind {
            changes.push(CronChange {
                kind,
                name,
                agent_slug: entry.agent_slug.clone(),
            });
        }
    }

    for job in &state.cron_jobs {
        if !seen.contains(&(job.agent_slug.clone(), job.name.clone())) {
            changes.push(CronChange {
                kind: CronChangeKind::Remove,
                name: job.name.clone(),
                agent_slug: job.agent_slug.clone(),
            });
        }
    }
    changes
}

// ---------------------------------------------------------------------------
// Agent-to-agent
// ---------------------------------------------------------------------------

fn plan_edges(state: &LastAppliedState, manifest: &Manifest) -> Vec<EdgeChange> {
    let declared = &manifest.agent_to_agent;
    let mut changes = Vec::new();

    match &state.edges {
        EdgeRecord::Legacy => {
            for (from, targets) in declared {
                for to in targets {
                    changes.push(EdgeChange {
                        kind: EdgeChangeKind::Reapply,
                        from: from.clone(),
                        to: to.clone(),
                    });
                }
            }
        }
        EdgeRecord::Current(recorded) => {
            let sources: BTreeSet<&AgentSlug> = declared.keys().chain(recorded.keys()).collect();
            for from in sources {
                let new: BTreeSet<&AgentSlug> = declared.get(from).into_iter().flatten().collect();
                let old: BTreeSet<&AgentSlug> = recorded.get(from).into_iter().flatten().collect();
                for to in new.difference(&old) {
                    changes.push(EdgeChange {
                        kind: EdgeChangeKind::Add,
                        from: from.clone(),
                        to: (*to).clone(),
                    });
                }
                for to in old.difference(&new) {
                    changes.push(EdgeChange {
                        kind: EdgeChangeKind::Remove,
                        from: from.clone(),
                        to: (*to).clone(),
                    });
                }
            }
        }
    }
    changes
}
