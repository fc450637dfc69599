//! Desired-state manifest.
//!
//! Schema validation happens upstream; this module only deserializes an
//! already-validated document (YAML or JSON, chosen by file extension).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{io_err, FormationError};
use crate::types::{agent_id_map, AgentId, AgentSlug};

/// Conventional manifest file name inside a formation source tree.
pub const MANIFEST_FILE: &str = "formation.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub namespace: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub agents: BTreeMap<AgentSlug, ManifestAgent>,
    #[serde(default)]
    pub bindings: Vec<ManifestBinding>,
    #[serde(default)]
    pub cron: Vec<ManifestCron>,
    #[serde(default)]
    pub agent_to_agent: BTreeMap<AgentSlug, Vec<AgentSlug>>,
    #[serde(default)]
    pub variables: BTreeMap<String, VariableDecl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestAgent {
    /// Directory holding the agent's workspace files, relative to the manifest.
    pub source_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestBinding {
    /// Match object; string leaves may carry `{{VAR}}` tokens.
    #[serde(rename = "match")]
    pub match_: Value,
    pub agent_slug: AgentSlug,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestCron {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub schedule: String,
    pub agent_slug: AgentSlug,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableDecl {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Manifest {
    /// `slug → agentId` for every declared agent.
    pub fn agent_ids(&self) -> BTreeMap<AgentSlug, AgentId> {
        agent_id_map(&self.namespace, self.agents.keys())
    }

    /// Resolved name of every cron entry, in declaration order.
    ///
    /// An entry without an explicit `name` is called
    /// `"{namespace}-{agentSlug}-{n}"`, `n` counting that agent's entries
    /// from 1.
    pub fn cron_job_names(&self) -> Vec<String> {
        let mut per_agent: BTreeMap<&AgentSlug, usize> = BTreeMap::new();
        self.cron
            .iter()
            .map(|entry| {
                let n = per_agent.entry(&entry.agent_slug).or_insert(0);
                *n += 1;
                match &entry.name {
                    Some(name) => name.clone(),
                    None => format!("{}-{}-{}", self.namespace, entry.agent_slug, n),
                }
            })
            .collect()
    }
}

/// Load a manifest from `path`. `.json` parses as JSON; anything else as YAML.
pub fn load_manifest(path: &Path) -> Result<Manifest, FormationError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if is_json {
        serde_json::from_str(&contents).map_err(|source| FormationError::Json {
            path: path.to_path_buf(),
            source,
        })
    } else {
        serde_yaml::from_str(&contents).map_err(|source| FormationError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }
}
