//! The orchestrator's runtime configuration document.
//!
//! The document belongs to the orchestrator and may hold anything. This
//! module reads it wholesale and only ever touches three sub-paths:
//! `agents.list`, `bindings`, and `tools.agentToAgent`. Everything else
//! survives a load → mutate → save cycle unchanged.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::atomic::write_atomic;
use crate::error::{io_err, FormationError};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuntimeConfig {
    path: Option<PathBuf>,
    root: Map<String, Value>,
}

impl RuntimeConfig {
    /// Wrap an in-memory document. The root must be a JSON object.
    pub fn from_value(value: Value) -> Result<Self, FormationError> {
        Self::from_root(None, value)
    }

    /// Read the document at `path`. A missing file reads as `{}`.
    pub fn load(path: &Path) -> Result<Self, FormationError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "runtime config missing; starting empty");
            return Ok(Self {
                path: Some(path.to_path_buf()),
                root: Map::new(),
            });
        }
        let bytes = std::fs::read(path).map_err(|e| io_err(path, e))?;
        let value: Value = serde_json::from_slice(&bytes).map_err(|source| FormationError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_root(Some(path.to_path_buf()), value)
    }

    /// Write the document back to the path it was loaded from.
    pub fn save(&self) -> Result<(), FormationError> {
        let path = self.path.as_deref().ok_or_else(|| FormationError::InvalidConfig {
            location: self.location(),
            reason: "document was not loaded from a file".to_string(),
        })?;
        self.save_to(path)
    }

    /// Atomically write the document to `path`.
    pub fn save_to(&self, path: &Path) -> Result<(), FormationError> {
        let mut bytes = serde_json::to_vec_pretty(&self.root)?;
        bytes.push(b'\n');
        write_atomic(path, &bytes, false)?;
        tracing::info!(path = %path.display(), "wrote runtime config");
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.root
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.root)
    }

    // -----------------------------------------------------------------------
    // Read accessors
    // -----------------------------------------------------------------------

    /// Entries of `agents.list`; empty when absent.
    pub fn agent_entries(&self) -> &[Value] {
        self.root
            .get("agents")
            .and_then(|agents| agents.get("list"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_agent(&self, id: &str) -> bool {
        self.agent_entries()
            .iter()
            .any(|entry| entry.get("id").and_then(Value::as_str) == Some(id))
    }

    /// Entries of `bindings`; empty when absent.
    pub fn bindings(&self) -> &[Value] {
        self.root
            .get("bindings")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// `tools.agentToAgent.allow`; empty when absent.
    pub fn agent_to_agent_allow(&self) -> Vec<&str> {
        self.agent_to_agent()
            .and_then(|a2a| a2a.get("allow"))
            .and_then(Value::as_array)
            .map(|allow| allow.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// `tools.agentToAgent.enabled`; `false` when absent.
    pub fn agent_to_agent_enabled(&self) -> bool {
        self.agent_to_agent()
            .and_then(|a2a| a2a.get("enabled"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Whether `tools.agentToAgent` exists at all.
    pub fn has_agent_to_agent(&self) -> bool {
        self.agent_to_agent().is_some()
    }

    fn agent_to_agent(&self) -> Option<&Value> {
        self.root.get("tools").and_then(|tools| tools.get("agentToAgent"))
    }

    /// `gateway.port`, when set to a valid port number.
    pub fn gateway_port(&self) -> Option<u16> {
        self.root
            .get("gateway")
            .and_then(|gw| gw.get("port"))
            .and_then(Value::as_u64)
            .and_then(|port| u16::try_from(port).ok())
    }

    /// `gateway.auth.<field>` as a non-empty string.
    pub fn gateway_auth(&self, field: &str) -> Option<&str> {
        self.root
            .get("gateway")
            .and_then(|gw| gw.get("auth"))
            .and_then(|auth| auth.get(field))
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    }

    // -----------------------------------------------------------------------
    // Mutable accessors (create intermediate objects on demand)
    // -----------------------------------------------------------------------

    pub(crate) fn agent_entries_mut(&mut self) -> Result<&mut Vec<Value>, FormationError> {
        let location = self.location();
        let agents = object_slot(&mut self.root, "agents", &location)?;
        array_slot(agents, "list", &location)
    }

    pub(crate) fn bindings_mut(&mut self) -> Result<&mut Vec<Value>, FormationError> {
        let location = self.location();
        array_slot(&mut self.root, "bindings", &location)
    }

    pub(crate) fn agent_to_agent_mut(&mut self) -> Result<&mut Map<String, Value>, FormationError> {
        let location = self.location();
        let tools = object_slot(&mut self.root, "tools", &location)?;
        object_slot(tools, "agentToAgent", &location)
    }

    fn location(&self) -> String {
        match &self.path {
            Some(path) => path.display().to_string(),
            None => "<memory>".to_string(),
        }
    }

    fn from_root(path: Option<PathBuf>, value: Value) -> Result<Self, FormationError> {
        let location = path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<memory>".to_string());
        let Value::Object(root) = value else {
            return Err(FormationError::InvalidConfig {
                location,
                reason: "expected a JSON object at the root".to_string(),
            });
        };
        let config = Self { path, root };
        config.check_shape()?;
        Ok(config)
    }

    /// Reject documents whose touched paths exist with the wrong type, so
    /// later mutation never has to overwrite foreign content.
    fn check_shape(&self) -> Result<(), FormationError> {
        let expect = |ok: bool, what: &str| {
            if ok {
                Ok(())
            } else {
                Err(FormationError::InvalidConfig {
                    location: self.location(),
                    reason: format!("expected {what}"),
                })
            }
        };
        if let Some(agents) = self.root.get("agents") {
            expect(agents.is_object(), "'agents' to be an object")?;
            if let Some(list) = agents.get("list") {
                expect(list.is_array(), "'agents.list' to be an array")?;
            }
        }
        if let Some(bindings) = self.root.get("bindings") {
            expect(bindings.is_array(), "'bindings' to be an array")?;
        }
        if let Some(tools) = self.root.get("tools") {
            expect(tools.is_object(), "'tools' to be an object")?;
            if let Some(a2a) = tools.get("agentToAgent") {
                expect(a2a.is_object(), "'tools.agentToAgent' to be an object")?;
                if let Some(allow) = a2a.get("allow") {
                    expect(allow.is_array(), "'tools.agentToAgent.allow' to be an array")?;
                }
            }
        }
        Ok(())
    }
}

fn object_slot<'a>(
    map: &'a mut Map<String, Value>,
    key: &str,
    location: &str,
) -> Result<&'a mut Map<String, Value>, FormationError> {
    map.entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| FormationError::InvalidConfig {
            location: location.to_string(),
            reason: format!("expected '{key}' to be an object"),
        })
}

fn array_slot<'a>(
    map: &'a mut Map<String, Value>,
    key: &str,
    location: &str,
) -> Result<&'a mut Vec<Value>, FormationError> {
    map.entry(key.to_string())
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or_else(|| FormationError::InvalidConfig {
            location: location.to_string(),
            reason: format!("expected '{key}' to be an array"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn missing_file_reads_as_empty_object() {
        let tmp = TempDir::new().unwrap();
        let config = RuntimeConfig::load(&tmp.path().join("runtime.json")).unwrap();
        assert!(config.as_map().is_empty());
        assert!(config.agent_entries().is_empty());
        assert!(!config.agent_to_agent_enabled());
    }

    #[test]
    fn unrelated_content_survives_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("runtime.json");
        let original = json!({
            "gateway": { "port": 19000, "auth": { "token": "t0k" } },
            "agents": { "defaults": { "model": "m1" }, "list": [{ "id": "main" }] },
            "channels": { "slack": { "enabled": true } }
        });
        std::fs::write(&path, serde_json::to_vec(&original).unwrap()).unwrap();

        let mut config = RuntimeConfig::load(&path).unwrap();
        config
            .agent_entries_mut()
            .unwrap()
            .push(json!({ "id": "acme-lead" }));
        config.save().unwrap();

        let written: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["channels"], original["channels"]);
        assert_eq!(written["agents"]["defaults"], original["agents"]["defaults"]);
        assert_eq!(written["agents"]["list"].as_array().unwrap().len(), 2);
        assert_eq!(config.gateway_port(), Some(19000));
        assert_eq!(config.gateway_auth("token"), Some("t0k"));
    }

    #[test]
    fn save_keeps_document_key_order() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("runtime.json");
        std::fs::write(
            &path,
            r#"{"zeta":1,"agents":{"list":[],"defaults":{"b":1,"a":2}},"alpha":2}"#,
        )
        .unwrap();

        let mut config = RuntimeConfig::load(&path).unwrap();
        config
            .bindings_mut()
            .unwrap()
            .push(json!({ "agentId": "acme-lead", "match": { "channel": "slack" } }));
        config.save().unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        let at = |needle: &str| written.find(needle).unwrap();
        assert!(at("\"zeta\"") < at("\"agents\""));
        assert!(at("\"agents\"") < at("\"alpha\""));
        assert!(at("\"alpha\"") < at("\"bindings\""));
        assert!(at("\"b\"") < at("\"a\""));
    }

    #[test]
    fn rejects_non_object_root() {
        assert!(RuntimeConfig::from_value(json!([1, 2])).is_err());
    }

    #[test]
    fn rejects_wrongly_typed_touched_path() {
        let err = RuntimeConfig::from_value(json!({ "bindings": {} })).unwrap_err();
        assert!(err.to_string().contains("bindings"), "got: {err}");
    }

    #[test]
    fn in_memory_document_cannot_save_without_path() {
        let config = RuntimeConfig::from_value(json!({})).unwrap();
        assert!(config.save().is_err());
    }
}
