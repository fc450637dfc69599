//! Observed divergence between the last-applied state and the live world.
//!
//! Each discrepancy carries a typed [`DiscrepancyTarget`]; repair dispatches
//! on that, never on the human-readable description.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::state::{StateBinding, StateCronJob};
use crate::types::{namespace_pattern, AgentId, AgentSlug};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscrepancyKind {
    Agent,
    Binding,
    Cron,
    A2a,
    File,
}

impl fmt::Display for DiscrepancyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiscrepancyKind::Agent => "agent",
            DiscrepancyKind::Binding => "binding",
            DiscrepancyKind::Cron => "cron",
            DiscrepancyKind::A2a => "a2a",
            DiscrepancyKind::File => "file",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscrepancyType {
    Missing,
    Changed,
}

impl fmt::Display for DiscrepancyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiscrepancyType::Missing => "missing",
            DiscrepancyType::Changed => "changed",
        })
    }
}

/// The entity a discrepancy is about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DiscrepancyTarget {
    Agent {
        slug: AgentSlug,
        agent_id: AgentId,
    },
    Binding {
        binding: StateBinding,
    },
    CronJob {
        job_id: String,
        name: String,
        agent_slug: AgentSlug,
    },
    AgentToAgent {
        pattern: String,
    },
    Workspace {
        slug: AgentSlug,
        agent_id: AgentId,
        path: PathBuf,
    },
    File {
        slug: AgentSlug,
        agent_id: AgentId,
        rel_path: String,
        path: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discrepancy {
    pub kind: DiscrepancyKind,
    #[serde(rename = "type")]
    pub type_: DiscrepancyType,
    pub description: String,
    pub fixable: bool,
    pub needs_source: bool,
    pub target: DiscrepancyTarget,
}

impl Discrepancy {
    /// Runtime id of the agent this discrepancy concerns, if any.
    pub fn agent_id(&self) -> Option<&AgentId> {
        match &self.target {
            DiscrepancyTarget::Agent { agent_id, .. }
            | DiscrepancyTarget::Workspace { agent_id, .. }
            | DiscrepancyTarget::File { agent_id, .. } => Some(agent_id),
            DiscrepancyTarget::Binding { binding } => Some(&binding.agent_id),
            DiscrepancyTarget::CronJob { .. } | DiscrepancyTarget::AgentToAgent { .. } => None,
        }
    }

    pub fn agent_missing(slug: &AgentSlug, agent_id: &AgentId) -> Self {
        Self {
            kind: DiscrepancyKind::Agent,
            type_: DiscrepancyType::Missing,
            description: format!("agent '{agent_id}' is missing from agents.list"),
            fixable: true,
            needs_source: false,
            target: DiscrepancyTarget::Agent {
                slug: slug.clone(),
                agent_id: agent_id.clone(),
            },
        }
    }

    pub fn binding_missing(binding: &StateBinding) -> Self {
        let channel = binding.channel().unwrap_or("*");
        Self {
            kind: DiscrepancyKind::Binding,
            type_: DiscrepancyType::Missing,
            description: format!(
                "binding {channel} -> '{}' is missing from bindings",
                binding.agent_id
            ),
            fixable: true,
            needs_source: false,
            target: DiscrepancyTarget::Binding {
                binding: binding.clone(),
            },
        }
    }

    pub fn agent_to_agent_missing(namespace: &str) -> Self {
        let pattern = namespace_pattern(namespace);
        Self {
            kind: DiscrepancyKind::A2a,
            type_: DiscrepancyType::Missing,
            description: format!("'{pattern}' is missing from tools.agentToAgent.allow"),
            fixable: true,
            needs_source: false,
            target: DiscrepancyTarget::AgentToAgent { pattern },
        }
    }

    pub fn workspace_missing(slug: &AgentSlug, agent_id: &AgentId, path: PathBuf) -> Self {
        Self {
            kind: DiscrepancyKind::File,
            type_: DiscrepancyType::Missing,
            description: format!("workspace {} of '{agent_id}' is missing", path.display()),
            fixable: false,
            needs_source: true,
            target: DiscrepancyTarget::Workspace {
                slug: slug.clone(),
                agent_id: agent_id.clone(),
                path,
            },
        }
    }

    pub fn file(
        type_: DiscrepancyType,
        slug: &AgentSlug,
        agent_id: &AgentId,
        rel_path: &str,
        path: PathBuf,
    ) -> Self {
        let what = match type_ {
            DiscrepancyType::Missing => "is missing",
            DiscrepancyType::Changed => "was modified",
        };
        Self {
            kind: DiscrepancyKind::File,
            type_,
            description: format!("{rel_path} of '{agent_id}' {what}"),
            fixable: false,
            needs_source: true,
            target: DiscrepancyTarget::File {
                slug: slug.clone(),
                agent_id: agent_id.clone(),
                rel_path: rel_path.to_string(),
                path,
            },
        }
    }

    /// A recorded job the scheduler no longer knows. Fixable only when the
    /// record retained enough to recreate it.
    pub fn cron_missing(job: &StateCronJob) -> Self {
        let fixable = job.is_recreatable();
        Self {
            kind: DiscrepancyKind::Cron,
            type_: DiscrepancyType::Missing,
            description: format!("cron job '{}' ({}) is not scheduled", job.name, job.id),
            fixable,
            needs_source: !fixable,
            target: DiscrepancyTarget::CronJob {
                job_id: job.id.clone(),
                name: job.name.clone(),
                agent_slug: job.agent_slug.clone(),
            },
        }
    }
}
