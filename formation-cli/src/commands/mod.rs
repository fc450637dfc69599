//! Subcommand implementations and the arguments they share.

pub mod cron;
pub mod gateway;
pub mod plan;
pub mod repair;
pub mod status;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use formation_core::{paths, RuntimeConfig};
use formation_gateway::{GatewayOptions, ResolvedGateway};
use formation_sync::Context as SyncContext;

/// Flags accepted by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Log progress to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit machine-readable JSON.
    #[arg(long, global = true)]
    pub json: bool,

    /// Gateway URL (`tcp://host:port` or `unix:///path`).
    #[arg(long, global = true, value_name = "URL")]
    pub gateway_url: Option<String>,

    /// Gateway token.
    #[arg(long, global = true, value_name = "TOKEN")]
    pub gateway_token: Option<String>,

    /// Gateway password.
    #[arg(long, global = true, value_name = "PASSWORD", conflicts_with = "gateway_token")]
    pub gateway_password: Option<String>,

    /// Gateway RPC timeout in milliseconds.
    #[arg(long, global = true, value_name = "MS")]
    pub timeout_ms: Option<u64>,
}

impl GlobalArgs {
    pub fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            url: self.gateway_url.clone(),
            token: self.gateway_token.clone(),
            password: self.gateway_password.clone(),
            timeout: self.timeout_ms.filter(|ms| *ms > 0).map(Duration::from_millis),
        }
    }

    pub fn context(&self, target: &FormationRef) -> Result<SyncContext> {
        let home = paths::home().context("could not determine home directory")?;
        let ctx = SyncContext::new(home, &target.namespace, &target.name)
            .with_gateway(self.gateway_options());
        tracing::debug!(
            formation = %target,
            home = %ctx.home.display(),
            runtime_config = %ctx.runtime_config_path.display(),
            "resolved workflow context"
        );
        Ok(ctx)
    }
}

/// Per-command gateway overrides; they win over the global flags.
#[derive(Args, Debug, Clone, Default)]
pub struct GatewayArgs {
    /// Gateway URL.
    #[arg(long, value_name = "URL")]
    pub url: Option<String>,

    /// Gateway token.
    #[arg(long, value_name = "TOKEN", conflicts_with = "password")]
    pub token: Option<String>,

    /// Gateway password.
    #[arg(long, value_name = "PASSWORD")]
    pub password: Option<String>,
}

impl GatewayArgs {
    /// Resolve against the runtime config under the current home.
    pub fn resolve(&self, global: &GlobalArgs) -> Result<ResolvedGateway> {
        let mut options = global.gateway_options();
        if self.url.is_some() {
            options.url = self.url.clone();
        }
        if self.token.is_some() || self.password.is_some() {
            options.token = self.token.clone();
            options.password = self.password.clone();
        }

        let home = paths::home().context("could not determine home directory")?;
        let config_path = paths::runtime_config_path_at(&home);
        let config = RuntimeConfig::load(&config_path)
            .with_context(|| format!("failed to read runtime config {}", config_path.display()))?;
        formation_gateway::resolve(&options, None, &config, |key| std::env::var(key).ok())
            .context("cannot resolve gateway")
    }
}

/// `<namespace>/<name>` on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormationRef {
    pub namespace: String,
    pub name: String,
}

impl FromStr for FormationRef {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((namespace, name))
                if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(format!("expected <namespace>/<name>, got '{s}'")),
        }
    }
}

impl fmt::Display for FormationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize JSON output")?
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formation_ref_parses_namespace_and_name() {
        let parsed: FormationRef = "acme/support".parse().unwrap();
        assert_eq!(parsed.namespace, "acme");
        assert_eq!(parsed.name, "support");
        assert_eq!(parsed.to_string(), "acme/support");
    }

    #[test]
    fn formation_ref_rejects_malformed_input() {
        for bad in ["acme", "/support", "acme/", "a/b/c"] {
            assert!(bad.parse::<FormationRef>().is_err(), "{bad}");
        }
    }

    #[test]
    fn zero_timeout_falls_back_to_default() {
        let args = GlobalArgs {
            timeout_ms: Some(0),
            ..GlobalArgs::default()
        };
        assert!(args.gateway_options().timeout.is_none());
    }
}
