//! `formation gateway`: connectivity checks.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use serde::Serialize;

use super::{print_json, GatewayArgs, GlobalArgs};

#[derive(Subcommand, Debug)]
pub enum GatewayCommand {
    /// Connect, authenticate, and disconnect.
    Probe(GatewayArgs),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProbeJson {
    endpoint: String,
    reachable: bool,
    latency_ms: u64,
}

pub async fn run(command: GatewayCommand, global: &GlobalArgs) -> Result<ExitCode> {
    match command {
        GatewayCommand::Probe(args) => {
            let resolved = args.resolve(global)?;
            let endpoint = resolved.endpoint.to_string();
            let latency = formation_gateway::probe(&resolved)
                .await
                .with_context(|| format!("gateway at {endpoint} is not reachable"))?;

            if global.json {
                print_json(&ProbeJson {
                    endpoint,
                    reachable: true,
                    latency_ms: latency.as_millis() as u64,
                })?;
            } else {
                println!(
                    "{} gateway at {endpoint} answered in {} ms",
                    "✓".green().bold(),
                    latency.as_millis()
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
