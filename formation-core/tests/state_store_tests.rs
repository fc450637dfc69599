//! State record error-message, atomic-write-safety, and legacy-record tests.
//! Layout: <home>/.formation/state/<namespace>/<name>.json

use assert_fs::prelude::*;
use formation_core::{state_store, EdgeRecord, FormationError};
use predicates::prelude::*;
use serde_json::json;
use std::fs;

fn record(extra: serde_json::Value) -> serde_json::Value {
    let mut base = json!({
        "namespace": "acme",
        "name": "support",
        "version": "1.0.0",
        "installedAt": "2026-03-01T10:00:00Z",
        "updatedAt": "2026-03-01T10:00:00Z",
        "agents": {
            "lead": { "id": "acme-lead", "workspace": "/w/lead", "files": ["SOUL.md"] }
        },
        "bindings": [],
        "cronJobs": [],
        "variables": {},
        "fileHashes": { "acme-lead:SOUL.md": "00" }
    });
    if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            base.insert(k.clone(), v.clone());
        }
    }
    base
}

fn write_record(home: &assert_fs::TempDir, value: &serde_json::Value) {
    home.child(".formation/state/acme/support.json")
        .write_str(&serde_json::to_string_pretty(value).expect("json"))
        .expect("write");
}

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_record_is_not_installed() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = state_store::load_at(home.path(), "acme", "support").unwrap_err();
    assert!(matches!(err, FormationError::NotInstalled { .. }), "got: {err}");
    assert!(err.to_string().contains("not installed"));
}

#[test]
fn load_wrong_shape_reports_json_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".formation/state/acme/support.json")
        .write_str("[\"not\", \"a\", \"record\"]")
        .expect("write");

    let err = state_store::load_at(home.path(), "acme", "support").unwrap_err();
    assert!(matches!(err, FormationError::Json { .. }), "got: {err}");
    assert!(err.to_string().contains("support.json"));
}

#[test]
fn load_binding_to_unknown_agent_is_invalid_state() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_record(
        &home,
        &record(json!({
            "bindings": [{ "agentId": "acme-ghost", "match": { "channel": "slack" } }]
        })),
    );
    let err = state_store::load_at(home.path(), "acme", "support").unwrap_err();
    assert!(matches!(err, FormationError::InvalidState { .. }), "got: {err}");
    assert!(err.to_string().contains("acme-ghost"));
}

// ---------------------------------------------------------------------------
// 2. Legacy records
// ---------------------------------------------------------------------------

#[test]
fn legacy_record_loads_and_stays_legacy_on_save() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_record(&home, &record(json!({})));

    let state = state_store::load_at(home.path(), "acme", "support").expect("load");
    assert_eq!(state.edges, EdgeRecord::Legacy);

    state_store::save_at(home.path(), &state).expect("save");
    home.child(".formation/state/acme/support.json")
        .assert(predicate::str::contains("agentToAgentEdges").not());
}

#[test]
fn current_record_keeps_edges() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_record(
        &home,
        &record(json!({ "agentToAgentEdges": { "lead": [] } })),
    );
    let state = state_store::load_at(home.path(), "acme", "support").expect("load");
    assert!(matches!(state.edges, EdgeRecord::Current(_)));

    state_store::save_at(home.path(), &state).expect("save");
    home.child(".formation/state/acme/support.json")
        .assert(predicate::str::contains("agentToAgentEdges"));
}

// ---------------------------------------------------------------------------
// 3. Atomic write safety
// ---------------------------------------------------------------------------

#[test]
fn save_leaves_no_tmp_file() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_record(&home, &record(json!({})));
    let state = state_store::load_at(home.path(), "acme", "support").expect("load");
    state_store::save_at(home.path(), &state).expect("save");

    let dir = home.path().join(".formation/state/acme");
    let names: Vec<String> = fs::read_dir(&dir)
        .expect("read_dir")
        .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["support.json".to_string()]);
}

#[cfg(unix)]
#[test]
fn saved_record_is_private() {
    use std::os::unix::fs::PermissionsExt;

    let home = assert_fs::TempDir::new().expect("tempdir");
    write_record(&home, &record(json!({})));
    let state = state_store::load_at(home.path(), "acme", "support").expect("load");
    state_store::save_at(home.path(), &state).expect("save");

    let meta = fs::metadata(home.path().join(".formation/state/acme/support.json")).expect("meta");
    assert_eq!(meta.permissions().mode() & 0o777, 0o600);
}
