//! In-memory scheduler and fixtures shared by unit tests.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map};

use formation_core::hash::sha256_hex;
use formation_core::state::{
    AgentSnapshot, AgentToAgentRecord, StateAgent, StateBinding, StateCronJob,
};
use formation_core::{AgentId, AgentSlug, EdgeRecord, LastAppliedState, Topology};
use formation_gateway::{CronAddSpec, CronAdded, CronJob, CronScheduler, GatewayError};

use crate::repair::SchedulerConnector;
use crate::source::RepairSource;

// ---------------------------------------------------------------------------
// Fake scheduler
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct Recorder {
    pub added: Mutex<Vec<CronAddSpec>>,
    pub jobs: Mutex<Vec<CronJob>>,
    pub connects: AtomicUsize,
}

impl Recorder {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

pub fn live_job(id: &str) -> CronJob {
    CronJob {
        id: id.to_string(),
        name: None,
        agent_id: None,
        schedule: None,
        timezone: None,
        prompt: None,
        enabled: Some(true),
        extra: Map::new(),
    }
}

struct FakeScheduler {
    recorder: Arc<Recorder>,
    fail_add: bool,
}

#[async_trait]
impl CronScheduler for FakeScheduler {
    async fn add_job(&self, spec: &CronAddSpec) -> Result<CronAdded, GatewayError> {
        if self.fail_add {
            return Err(GatewayError::Rpc {
                method: "cron.add".into(),
                code: None,
                message: "quota".into(),
            });
        }
        let mut added = self.recorder.added.lock().unwrap();
        added.push(spec.clone());
        let id = format!("new-{}", added.len());
        self.recorder.jobs.lock().unwrap().push(live_job(&id));
        Ok(CronAdded { id })
    }

    async fn list_jobs(&self) -> Result<Vec<CronJob>, GatewayError> {
        Ok(self.recorder.jobs.lock().unwrap().clone())
    }

    async fn close(&self) {}
}

pub struct FakeConnector {
    recorder: Arc<Recorder>,
    reachable: bool,
    fail_add: bool,
}

impl FakeConnector {
    pub fn new(reachable: bool, fail_add: bool) -> (Self, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        (
            Self {
                recorder: recorder.clone(),
                reachable,
                fail_add,
            },
            recorder,
        )
    }

    pub fn reachable() -> (Self, Arc<Recorder>) {
        Self::new(true, false)
    }

    pub fn unreachable() -> (Self, Arc<Recorder>) {
        Self::new(false, false)
    }
}

#[async_trait]
impl SchedulerConnector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn CronScheduler>, GatewayError> {
        self.recorder.connects.fetch_add(1, Ordering::SeqCst);
        if !self.reachable {
            return Err(GatewayError::Connection {
                url: "tcp://127.0.0.1:1".into(),
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            });
        }
        Ok(Box::new(FakeScheduler {
            recorder: self.recorder.clone(),
            fail_add: self.fail_add,
        }))
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Rendered `SOUL.md` for the fixture, with the sensitive token unbound.
pub const SOUL_RENDERED: &str = "Team Blue, key {{API_KEY}}";

/// One agent `acme-lead` with its workspace under `root/ws/lead`, one
/// binding, two recreatable cron jobs and an edge to `worker`.
pub fn state_at(root: &Path) -> LastAppliedState {
    let now = Utc::now();
    let mut agents = BTreeMap::new();
    agents.insert(
        AgentSlug::from("lead"),
        StateAgent {
            id: AgentId::from("acme-lead"),
            workspace: root.join("ws/lead"),
            files: vec!["SOUL.md".into()],
            config: Some(AgentSnapshot {
                name: Some("Lead".into()),
                model: Some(json!({ "primary": "m" })),
                tools: Some(json!({ "allow": ["read"] })),
                ..AgentSnapshot::default()
            }),
        },
    );
    let mut file_hashes = BTreeMap::new();
    file_hashes.insert(
        "acme-lead:SOUL.md".to_string(),
        sha256_hex(SOUL_RENDERED.as_bytes()),
    );
    let mut edges = Topology::new();
    edges.insert(AgentSlug::from("lead"), vec![AgentSlug::from("worker")]);
    let mut variables = BTreeMap::new();
    variables.insert("TEAM".to_string(), "Blue".to_string());
    variables.insert("API_KEY".to_string(), "$FORMATION_TEST_UNSET_KEY".to_string());
    LastAppliedState {
        namespace: "acme".into(),
        name: "support".into(),
        version: "1.0.0".into(),
        installed_at: now,
        updated_at: now,
        agents,
        bindings: vec![StateBinding {
            agent_id: AgentId::from("acme-lead"),
            match_: json!({ "channel": "slack" }),
        }],
        cron_jobs: vec![
            StateCronJob {
                id: "old-1".into(),
                name: "acme-lead-1".into(),
                agent_slug: AgentSlug::from("lead"),
                schedule: Some("0 9 * * *".into()),
                prompt: Some("Morning".into()),
                timezone: Some("UTC".into()),
            },
            StateCronJob {
                id: "old-2".into(),
                name: "acme-lead-2".into(),
                agent_slug: AgentSlug::from("lead"),
                schedule: Some("0 17 * * *".into()),
                prompt: Some("Evening".into()),
                timezone: None,
            },
        ],
        variables,
        file_hashes,
        edges: EdgeRecord::Current(edges),
        agent_to_agent: Some(AgentToAgentRecord {
            was_enabled: false,
            allow_added: true,
        }),
    }
}

/// Write the fixture workspace so the filesystem diff is clean.
pub fn write_workspace(root: &Path) {
    let ws = root.join("ws/lead");
    fs::create_dir_all(&ws).unwrap();
    fs::write(ws.join("SOUL.md"), SOUL_RENDERED).unwrap();
}

/// A source tree under `root/src` matching the fixture state.
pub fn source_at(root: &Path) -> RepairSource {
    let src = root.join("src");
    fs::create_dir_all(src.join("agents/lead")).unwrap();
    fs::write(
        src.join("formation.yaml"),
        concat!(
            "namespace: acme\nname: support\nversion: 1.0.0\n",
            "agents:\n  lead:\n    sourceDir: agents/lead\n",
        ),
    )
    .unwrap();
    fs::write(src.join("agents/lead/SOUL.md"), "Team {{TEAM}}, key {{API_KEY}}").unwrap();
    RepairSource::open(&src).unwrap()
}
