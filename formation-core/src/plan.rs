//! Migration plan: what an update from the last-applied state would change.

use serde::{Deserialize, Serialize};

use crate::state::StateBinding;
use crate::types::AgentSlug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentChangeKind {
    Add,
    Remove,
    Update,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentChange {
    pub slug: AgentSlug,
    #[serde(rename = "type")]
    pub kind: AgentChangeKind,
    /// Relative paths whose content differs; set only for `update`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_files: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetChangeKind {
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingChange {
    #[serde(rename = "type")]
    pub kind: SetChangeKind,
    /// Resolved and pruned binding.
    pub binding: StateBinding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CronChangeKind {
    Add,
    Remove,
    Update,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronChange {
    #[serde(rename = "type")]
    pub kind: CronChangeKind,
    pub name: String,
    pub agent_slug: AgentSlug,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeChangeKind {
    Add,
    Remove,
    /// The record predates edge tracking; the edge is applied again.
    Reapply,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeChange {
    #[serde(rename = "type")]
    pub kind: EdgeChangeKind,
    pub from: AgentSlug,
    pub to: AgentSlug,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionChange {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPlan {
    pub agents: Vec<AgentChange>,
    pub bindings: Vec<BindingChange>,
    pub cron: Vec<CronChange>,
    pub a2a: Vec<EdgeChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_change: Option<VersionChange>,
    pub is_empty: bool,
}

impl MigrationPlan {
    /// Assemble a plan, deriving `is_empty`.
    pub fn new(
        agents: Vec<AgentChange>,
        bindings: Vec<BindingChange>,
        cron: Vec<CronChange>,
        a2a: Vec<EdgeChange>,
        version_change: Option<VersionChange>,
    ) -> Self {
        let is_empty = agents.iter().all(|a| a.kind == AgentChangeKind::Unchanged)
            && bindings.is_empty()
            && cron.is_empty()
            && a2a.is_empty()
            && version_change.is_none();
        Self {
            agents,
            bindings,
            cron,
            a2a,
            version_change,
            is_empty,
        }
    }

    /// Agents whose plan entry is anything but `unchanged`.
    pub fn changed_agents(&self) -> impl Iterator<Item = &AgentChange> {
        self.agents
            .iter()
            .filter(|a| a.kind != AgentChangeKind::Unchanged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unchanged(slug: &str) -> AgentChange {
        AgentChange {
            slug: AgentSlug::from(slug),
            kind: AgentChangeKind::Unchanged,
            changed_files: None,
        }
    }

    #[test]
    fn only_unchanged_agents_is_empty() {
        let plan = MigrationPlan::new(
            vec![unchanged("a"), unchanged("b")],
            vec![],
            vec![],
            vec![],
            None,
        );
        assert!(plan.is_empty);
        assert_eq!(plan.changed_agents().count(), 0);
    }

    #[test]
    fn version_change_alone_is_not_empty() {
        let plan = MigrationPlan::new(
            vec![unchanged("a")],
            vec![],
            vec![],
            vec![],
            Some(VersionChange {
                from: "1.0.0".into(),
                to: "1.1.0".into(),
            }),
        );
        assert!(!plan.is_empty);
    }

    #[test]
    fn serializes_with_type_tags() {
        let plan = MigrationPlan::new(
            vec![AgentChange {
                slug: AgentSlug::from("x"),
                kind: AgentChangeKind::Update,
                changed_files: Some(vec!["SOUL.md".into()]),
            }],
            vec![],
            vec![],
            vec![EdgeChange {
                kind: EdgeChangeKind::Reapply,
                from: AgentSlug::from("lead"),
                to: AgentSlug::from("worker"),
            }],
            None,
        );
        let value = serde_json::to_value(&plan).unwrap();
        assert_eq!(
            value["agents"][0],
            json!({ "slug": "x", "type": "update", "changedFiles": ["SOUL.md"] })
        );
        assert_eq!(value["a2a"][0]["type"], json!("reapply"));
        assert_eq!(value["isEmpty"], json!(false));
        assert!(value.get("versionChange").is_none());
    }
}
