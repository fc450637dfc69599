//! Gateway wire protocol: newline-delimited JSON frames.
//!
//! ```text
//! server → {"type":"event","event":"connect.challenge","payload":{"nonce":"…"}}
//! client → {"type":"req","id":"<uuid>","method":"connect","params":{…}}
//! server → {"type":"res","id":"<uuid>","ok":true,"payload":{…}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GatewayError;

pub const CHALLENGE_EVENT: &str = "connect.challenge";

pub const METHOD_CONNECT: &str = "connect";
pub const METHOD_CRON_ADD: &str = "cron.add";
pub const METHOD_CRON_REMOVE: &str = "cron.remove";
pub const METHOD_CRON_LIST: &str = "cron.list";
pub const METHOD_CRON_UPDATE: &str = "cron.update";

/// One line on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Req {
        id: String,
        method: String,
        #[serde(default)]
        params: Value,
    },
    Res {
        id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ResponseError>,
    },
    Event {
        event: String,
        #[serde(default)]
        payload: Value,
    },
}

impl Frame {
    pub fn ok(id: impl Into<String>, payload: Value) -> Self {
        Frame::Res {
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Frame::Res {
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(ResponseError {
                code: None,
                message: message.into(),
            }),
        }
    }

    pub fn challenge(nonce: impl Into<String>) -> Self {
        Frame::Event {
            event: CHALLENGE_EVENT.to_string(),
            payload: serde_json::json!({ "nonce": nonce.into() }),
        }
    }

    /// Serialize as one wire line, trailing newline included.
    pub fn encode(&self) -> Result<Vec<u8>, GatewayError> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    pub fn decode(line: &str) -> Result<Self, GatewayError> {
        serde_json::from_str(line.trim_end())
            .map_err(|err| GatewayError::Protocol(format!("malformed frame: {err}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    /// Gateways send string or numeric codes; both are kept as text.
    #[serde(
        default,
        deserialize_with = "code_as_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

fn code_as_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(code)) => Some(code),
        Some(other) => Some(other.to_string()),
    })
}

/// The `id` of a response line that did not decode as a [`Frame`].
pub(crate) fn response_id(line: &str) -> Option<String> {
    let value: Value = serde_json::from_str(line.trim_end()).ok()?;
    if value.get("type").and_then(Value::as_str) != Some("res") {
        return None;
    }
    value.get("id").and_then(Value::as_str).map(str::to_string)
}

// ---------------------------------------------------------------------------
// Method payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub client: ClientInfo,
    pub nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<ConnectAuth>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "formation".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// A job as the scheduler reports it. Unknown members are preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJob {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Parameters of `cron.add`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronAddSpec {
    pub name: String,
    pub agent_id: String,
    pub schedule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    pub prompt: String,
}

/// Result of `cron.add`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronAdded {
    pub id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronListOptions {
    #[serde(default)]
    pub include_disabled: bool,
}

/// Partial update for `cron.update`; absent fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// `cron.list` answers either `{"jobs": [...]}` or a bare array.
pub(crate) fn parse_job_list(payload: Value) -> Result<Vec<CronJob>, GatewayError> {
    let jobs = match payload {
        Value::Object(mut map) => map.remove("jobs").unwrap_or(Value::Array(Vec::new())),
        Value::Null => Value::Array(Vec::new()),
        other => other,
    };
    Ok(serde_json::from_value(jobs)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_frame_shape() {
        let frame = Frame::Req {
            id: "1".into(),
            method: METHOD_CRON_LIST.into(),
            params: json!({}),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({ "type": "req", "id": "1", "method": "cron.list", "params": {} })
        );
    }

    #[test]
    fn decodes_error_response() {
        let frame =
            Frame::decode(r#"{"type":"res","id":"9","ok":false,"error":{"message":"nope"}}"#)
                .unwrap();
        match frame {
            Frame::Res { ok, error, .. } => {
                assert!(!ok);
                assert_eq!(error.unwrap().message, "nope");
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn numeric_error_code_is_kept_as_text() {
        let frame = Frame::decode(
            r#"{"type":"res","id":"9","ok":false,"error":{"code":404,"message":"no such job"}}"#,
        )
        .unwrap();
        match frame {
            Frame::Res { error, .. } => assert_eq!(error.unwrap().code.as_deref(), Some("404")),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn response_id_of_undecodable_response() {
        let line = r#"{"type":"res","id":"7","ok":"maybe"}"#;
        assert!(Frame::decode(line).is_err());
        assert_eq!(response_id(line).as_deref(), Some("7"));
        assert_eq!(response_id(r#"{"type":"event","id":"7"}"#), None);
        assert_eq!(response_id("not json"), None);
    }

    #[test]
    fn decode_rejects_unknown_frame_type() {
        let err = Frame::decode(r#"{"type":"bogus"}"#).unwrap_err();
        assert!(matches!(err, GatewayError::Protocol(_)));
    }

    #[test]
    fn job_list_accepts_both_shapes() {
        let wrapped = parse_job_list(json!({ "jobs": [{ "id": "a", "custom": 1 }] })).unwrap();
        assert_eq!(wrapped[0].id, "a");
        assert_eq!(wrapped[0].extra.get("custom"), Some(&json!(1)));

        let bare = parse_job_list(json!([{ "id": "b", "name": "n" }])).unwrap();
        assert_eq!(bare[0].name.as_deref(), Some("n"));

        assert!(parse_job_list(Value::Null).unwrap().is_empty());
    }
}
