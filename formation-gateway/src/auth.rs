//! Gateway endpoint and credential resolution.
//!
//! Credential precedence, highest first:
//! 1. the credential passed at the call site
//! 2. [`GatewayOptions`] token / password
//! 3. `$FORMATION_GATEWAY_TOKEN`, then `$FORMATION_GATEWAY_PASSWORD`
//! 4. runtime config `gateway.auth.token`, then `gateway.auth.password`
//!
//! Pointing the client at anything but the default endpoint requires an
//! explicit credential (1 or 2), so locally stored secrets are never sent to
//! a foreign host.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use formation_core::paths::{parse_timeout_ms, DEFAULT_GATEWAY_TIMEOUT, GATEWAY_TIMEOUT_ENV};
use formation_core::RuntimeConfig;
use url::Url;

use crate::error::GatewayError;
use crate::protocol::ConnectAuth;

pub const DEFAULT_PORT: u16 = 18789;
pub const TOKEN_ENV: &str = "FORMATION_GATEWAY_TOKEN";
pub const PASSWORD_ENV: &str = "FORMATION_GATEWAY_PASSWORD";

/// Caller overrides for reaching the gateway.
#[derive(Debug, Clone, Default)]
pub struct GatewayOptions {
    pub url: Option<String>,
    pub token: Option<String>,
    pub password: Option<String>,
    pub timeout: Option<Duration>,
}

impl GatewayOptions {
    fn credential(&self) -> Option<Credential> {
        non_empty(self.token.as_deref())
            .map(Credential::Token)
            .or_else(|| non_empty(self.password.as_deref()).map(Credential::Password))
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Token(String),
    Password(String),
}

impl Credential {
    pub fn to_auth(&self) -> ConnectAuth {
        match self {
            Credential::Token(token) => ConnectAuth {
                token: Some(token.clone()),
                password: None,
            },
            Credential::Password(password) => ConnectAuth {
                token: None,
                password: Some(password.clone()),
            },
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Token(_) => f.write_str("Token(***)"),
            Credential::Password(_) => f.write_str("Password(***)"),
        }
    }
}

/// Where the gateway listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl Endpoint {
    /// Parse `tcp://host:port` or `unix:///path/to/socket`.
    pub fn parse(raw: &str) -> Result<Self, GatewayError> {
        let invalid = |reason: &str| GatewayError::InvalidUrl {
            url: raw.to_string(),
            reason: reason.to_string(),
        };
        let url = Url::parse(raw).map_err(|err| invalid(&err.to_string()))?;
        match url.scheme() {
            "tcp" => {
                let host = url
                    .host_str()
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| invalid("missing host"))?;
                let port = url.port().unwrap_or(DEFAULT_PORT);
                Ok(Endpoint::Tcp {
                    host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
                    port,
                })
            }
            "unix" => {
                let path = url.path();
                if path.is_empty() || path == "/" {
                    return Err(invalid("missing socket path"));
                }
                Ok(Endpoint::Unix(PathBuf::from(path)))
            }
            other => Err(invalid(&format!("unsupported scheme '{other}'"))),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } if host.contains(':') => {
                write!(f, "tcp://[{host}]:{port}")
            }
            Endpoint::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Everything needed to open a connection.
#[derive(Debug, Clone)]
pub struct ResolvedGateway {
    pub endpoint: Endpoint,
    pub credential: Option<Credential>,
    pub timeout: Duration,
}

/// The endpoint used when no URL is supplied.
pub fn default_endpoint(config: &RuntimeConfig) -> Endpoint {
    Endpoint::Tcp {
        host: "127.0.0.1".to_string(),
        port: config.gateway_port().unwrap_or(DEFAULT_PORT),
    }
}

/// Resolve endpoint, credential and timeout. `env` looks up environment
/// variables; pass `|k| std::env::var(k).ok()` outside tests.
pub fn resolve<F>(
    options: &GatewayOptions,
    call_site: Option<&Credential>,
    config: &RuntimeConfig,
    env: F,
) -> Result<ResolvedGateway, GatewayError>
where
    F: Fn(&str) -> Option<String>,
{
    let default = default_endpoint(config);
    let endpoint = match non_empty(options.url.as_deref()) {
        Some(url) => Endpoint::parse(&url)?,
        None => default.clone(),
    };

    let explicit = call_site.cloned().or_else(|| options.credential());
    if endpoint != default && explicit.is_none() {
        return Err(GatewayError::ExplicitCredentialsRequired {
            url: endpoint.to_string(),
        });
    }

    let credential = explicit
        .or_else(|| non_empty(env(TOKEN_ENV).as_deref()).map(Credential::Token))
        .or_else(|| non_empty(env(PASSWORD_ENV).as_deref()).map(Credential::Password))
        .or_else(|| config.gateway_auth("token").map(|t| Credential::Token(t.to_string())))
        .or_else(|| {
            config
                .gateway_auth("password")
                .map(|p| Credential::Password(p.to_string()))
        });

    let timeout = options
        .timeout
        .or_else(|| env(GATEWAY_TIMEOUT_ENV).and_then(|raw| parse_timeout_ms(&raw)))
        .unwrap_or(DEFAULT_GATEWAY_TIMEOUT);

    tracing::debug!(
        endpoint = %endpoint,
        has_credential = credential.is_some(),
        timeout_ms = timeout.as_millis() as u64,
        "resolved gateway"
    );
    Ok(ResolvedGateway {
        endpoint,
        credential,
        timeout,
    })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}
