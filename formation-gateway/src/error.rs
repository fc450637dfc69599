use std::time::Duration;

use thiserror::Error;

/// Error surface for the gateway RPC client.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The socket could not be opened. Never retried inside the client.
    #[error("cannot connect to gateway at {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("gateway call '{method}' timed out after {}ms", timeout.as_millis())]
    Timeout { method: String, timeout: Duration },

    /// The connection went away while a call was in flight.
    #[error("gateway connection closed")]
    Closed,

    /// The gateway answered `ok: false`.
    #[error("gateway rejected '{method}': {message}")]
    Rpc {
        method: String,
        code: Option<String>,
        message: String,
    },

    #[error("gateway protocol error: {0}")]
    Protocol(String),

    /// A non-default URL was given without an explicit token or password.
    #[error("gateway URL {url} differs from the default; pass an explicit token or password")]
    ExplicitCredentialsRequired { url: String },

    #[error("invalid gateway URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The client was closed and can no longer issue calls.
    #[error("gateway client is not connected")]
    NotConnected,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] formation_core::FormationError),
}

impl GatewayError {
    /// Whether this error means the gateway could not be reached at all, as
    /// opposed to a reachable gateway refusing a call.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            GatewayError::Connection { .. }
                | GatewayError::Timeout { .. }
                | GatewayError::Closed
                | GatewayError::NotConnected
        )
    }
}
