//! Last-applied state: the durable record of the previous successful apply.
//!
//! This record is the only anchor reconciliation has. Older records predate
//! edge tracking and carry no `agentToAgentEdges`; that difference is
//! resolved once, at deserialization, into [`EdgeRecord`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FormationError;
use crate::paths::is_plain_relative;
use crate::types::{split_file_hash_key, AgentId, AgentSlug};

/// Adjacency map of declared agent-to-agent edges, by slug.
pub type Topology = BTreeMap<AgentSlug, Vec<AgentSlug>>;

// ---------------------------------------------------------------------------
// Record types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StateDocument", into = "StateDocument")]
pub struct LastAppliedState {
    pub namespace: String,
    pub name: String,
    pub version: String,
    pub installed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub agents: BTreeMap<AgentSlug, StateAgent>,
    pub bindings: Vec<StateBinding>,
    pub cron_jobs: Vec<StateCronJob>,
    /// Resolved values, or `"$ENV_NAME"` placeholders for sensitive ones.
    pub variables: BTreeMap<String, String>,
    /// `"{agentId}:{relPath}" → sha256hex`.
    pub file_hashes: BTreeMap<String, String>,
    pub edges: EdgeRecord,
    pub agent_to_agent: Option<AgentToAgentRecord>,
}

/// Whether the record knows which agent-to-agent edges were applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeRecord {
    /// Written before edges were tracked; the applied edge set is unknown.
    Legacy,
    Current(Topology),
}

impl EdgeRecord {
    pub fn edges(&self) -> Option<&Topology> {
        match self {
            EdgeRecord::Legacy => None,
            EdgeRecord::Current(edges) => Some(edges),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateAgent {
    pub id: AgentId,
    pub workspace: PathBuf,
    #[serde(default)]
    pub files: Vec<String>,
    /// Snapshot of the runtime-config entry written at apply time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<AgentSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateBinding {
    pub agent_id: AgentId,
    #[serde(rename = "match")]
    pub match_: Value,
}

impl StateBinding {
    /// The `channel` member of the match object, if it is a string.
    pub fn channel(&self) -> Option<&str> {
        self.match_.get("channel").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateCronJob {
    pub id: String,
    pub name: String,
    pub agent_slug: AgentSlug,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl StateCronJob {
    /// Enough data retained to recreate the job without the manifest.
    pub fn is_recreatable(&self) -> bool {
        self.schedule.is_some() && self.prompt.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentToAgentRecord {
    /// `tools.agentToAgent.enabled` before this formation was applied.
    pub was_enabled: bool,
    /// Whether apply added this namespace's allow pattern.
    pub allow_added: bool,
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

impl LastAppliedState {
    /// Look up an agent by runtime id.
    pub fn agent_by_id(&self, id: &AgentId) -> Option<(&AgentSlug, &StateAgent)> {
        self.agents.iter().find(|(_, agent)| &agent.id == id)
    }

    /// Runtime id recorded for `slug`.
    pub fn agent_id_of(&self, slug: &AgentSlug) -> Option<&AgentId> {
        self.agents.get(slug).map(|agent| &agent.id)
    }

    /// `(relPath, hash)` for every tracked file of `agent_id`, sorted by path.
    pub fn tracked_files<'a>(
        &'a self,
        agent_id: &'a AgentId,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.file_hashes.iter().filter_map(move |(key, hash)| {
            let (id, rel) = split_file_hash_key(key)?;
            (id == agent_id.as_str()).then_some((rel, hash.as_str()))
        })
    }

    /// Check the structural invariants of the record.
    ///
    /// Every `fileHashes` key and every binding must reference an agent id
    /// present in `agents`. Tracked file paths must stay inside the agent
    /// workspace.
    pub fn validate(&self) -> Result<(), FormationError> {
        let ids: BTreeSet<&str> = self.agents.values().map(|a| a.id.as_str()).collect();

        for key in self.file_hashes.keys() {
            let Some((id, rel)) = split_file_hash_key(key) else {
                return Err(self.invalid(format!("malformed fileHashes key '{key}'")));
            };
            if !is_plain_relative(rel) {
                return Err(self.invalid(format!("fileHashes key '{key}' leaves the workspace")));
            }
            if !ids.contains(id) {
                return Err(self.invalid(format!(
                    "fileHashes key '{key}' references unknown agent '{id}'"
                )));
            }
        }

        for (slug, agent) in &self.agents {
            if let Some(file) = agent.files.iter().find(|f| !is_plain_relative(f)) {
                return Err(self.invalid(format!(
                    "agent '{slug}' tracks '{file}' outside its workspace"
                )));
            }
        }

        for binding in &self.bindings {
            if !ids.contains(binding.agent_id.as_str()) {
                return Err(self.invalid(format!(
                    "binding references unknown agent '{}'",
                    binding.agent_id
                )));
            }
        }
        Ok(())
    }

    fn invalid(&self, reason: String) -> FormationError {
        FormationError::InvalidState {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            reason,
        }
    }
}

// ---------------------------------------------------------------------------
// On-disk document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateDocument {
    namespace: String,
    name: String,
    version: String,
    installed_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    agents: BTreeMap<AgentSlug, StateAgent>,
    #[serde(default)]
    bindings: Vec<StateBinding>,
    #[serde(default)]
    cron_jobs: Vec<StateCronJob>,
    #[serde(default)]
    variables: BTreeMap<String, String>,
    #[serde(default)]
    file_hashes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    agent_to_agent_edges: Option<Topology>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    agent_to_agent: Option<AgentToAgentRecord>,
}

impl From<StateDocument> for LastAppliedState {
    fn from(doc: StateDocument) -> Self {
        Self {
            namespace: doc.namespace,
            name: doc.name,
            version: doc.version,
            installed_at: doc.installed_at,
            updated_at: doc.updated_at,
            agents: doc.agents,
            bindings: doc.bindings,
            cron_jobs: doc.cron_jobs,
            variables: doc.variables,
            file_hashes: doc.file_hashes,
            edges: match doc.agent_to_agent_edges {
                Some(edges) => EdgeRecord::Current(edges),
                None => EdgeRecord::Legacy,
            },
            agent_to_agent: doc.agent_to_agent,
        }
    }
}

impl From<LastAppliedState> for StateDocument {
    fn from(state: LastAppliedState) -> Self {
        Self {
            namespace: state.namespace,
            name: state.name,
            version: state.version,
            installed_at: state.installed_at,
            updated_at: state.updated_at,
            agents: state.agents,
            bindings: state.bindings,
            cron_jobs: state.cron_jobs,
            variables: state.variables,
            file_hashes: state.file_hashes,
            agent_to_agent_edges: match state.edges {
                EdgeRecord::Legacy => None,
                EdgeRecord::Current(edges) => Some(edges),
            },
            agent_to_agent: state.agent_to_agent,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(extra: Value) -> Value {
        let mut base = json!({
            "namespace": "acme",
            "name": "support",
            "version": "1.0.0",
            "installedAt": "2026-01-01T00:00:00Z",
            "updatedAt": "2026-01-01T00:00:00Z",
            "agents": {
                "lead": { "id": "acme-lead", "workspace": "/w/lead", "files": ["SOUL.md"] }
            },
            "bindings": [{ "agentId": "acme-lead", "match": { "channel": "slack" } }],
            "fileHashes": { "acme-lead:SOUL.md": "abc" }
        });
        if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        base
    }

    #[test]
    fn record_without_edges_is_legacy() {
        let state: LastAppliedState = serde_json::from_value(doc(json!({}))).unwrap();
        assert_eq!(state.edges, EdgeRecord::Legacy);
        state.validate().unwrap();
    }

    #[test]
    fn record_with_edges_is_current_and_roundtrips() {
        let state: LastAppliedState = serde_json::from_value(doc(json!({
            "agentToAgentEdges": { "lead": ["worker"] },
            "agentToAgent": { "wasEnabled": false, "allowAdded": true }
        })))
        .unwrap();
        let edges = state.edges.edges().expect("current record");
        assert_eq!(edges.get("lead"), Some(&vec![AgentSlug::from("worker")]));

        let back = serde_json::to_value(&state).unwrap();
        assert_eq!(back["agentToAgentEdges"], json!({ "lead": ["worker"] }));
        assert_eq!(back["agentToAgent"]["allowAdded"], json!(true));
    }

    #[test]
    fn legacy_record_serializes_without_edges_key() {
        let state: LastAppliedState = serde_json::from_value(doc(json!({}))).unwrap();
        let back = serde_json::to_value(&state).unwrap();
        assert!(back.get("agentToAgentEdges").is_none());
    }

    #[test]
    fn validate_rejects_orphan_file_hash() {
        let state: LastAppliedState = serde_json::from_value(doc(json!({
            "fileHashes": { "acme-ghost:SOUL.md": "abc" }
        })))
        .unwrap();
        let err = state.validate().unwrap_err();
        assert!(err.to_string().contains("acme-ghost"), "got: {err}");
    }

    #[test]
    fn validate_rejects_path_outside_workspace() {
        let state: LastAppliedState = serde_json::from_value(doc(json!({
            "fileHashes": { "acme-lead:../../.ssh/authorized_keys": "abc" }
        })))
        .unwrap();
        let err = state.validate().unwrap_err();
        assert!(err.to_string().contains("leaves the workspace"), "got: {err}");
    }

    #[test]
    fn validate_rejects_orphan_binding() {
        let state: LastAppliedState = serde_json::from_value(doc(json!({
            "bindings": [{ "agentId": "acme-ghost", "match": { "channel": "slack" } }]
        })))
        .unwrap();
        assert!(matches!(
            state.validate(),
            Err(FormationError::InvalidState { .. })
        ));
    }

    #[test]
    fn tracked_files_filters_by_agent() {
        let state: LastAppliedState = serde_json::from_value(doc(json!({
            "agents": {
                "lead": { "id": "acme-lead", "workspace": "/w/lead" },
                "worker": { "id": "acme-worker", "workspace": "/w/worker" }
            },
            "fileHashes": {
                "acme-lead:SOUL.md": "a",
                "acme-lead:memory/x.md": "b",
                "acme-worker:SOUL.md": "c"
            }
        })))
        .unwrap();
        let id = AgentId::from("acme-lead");
        let files: Vec<_> = state.tracked_files(&id).collect();
        assert_eq!(files, vec![("SOUL.md", "a"), ("memory/x.md", "b")]);
    }

    #[test]
    fn cron_job_recreatable_needs_schedule_and_prompt() {
        let mut job = StateCronJob {
            id: "j1".into(),
            name: "acme-lead-1".into(),
            agent_slug: AgentSlug::from("lead"),
            schedule: Some("0 9 * * *".into()),
            prompt: None,
            timezone: None,
        };
        assert!(!job.is_recreatable());
        job.prompt = Some("report".into());
        assert!(job.is_recreatable());
    }
}
