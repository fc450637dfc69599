//! `formation cron`: read-only view of scheduler jobs.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use tabled::{settings::Style, Table, Tabled};

use formation_gateway::{CronJob, CronListOptions, GatewayClient};

use super::{print_json, GatewayArgs, GlobalArgs};

#[derive(Subcommand, Debug)]
pub enum CronCommand {
    /// List jobs known to the scheduler.
    List(CronListArgs),
}

#[derive(Args, Debug)]
pub struct CronListArgs {
    #[command(flatten)]
    pub gateway: GatewayArgs,

    /// Include disabled jobs.
    #[arg(long)]
    pub all: bool,
}

#[derive(Tabled)]
struct JobRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "agent")]
    agent: String,
    #[tabled(rename = "schedule")]
    schedule: String,
    #[tabled(rename = "enabled")]
    enabled: String,
}

pub async fn run(command: CronCommand, global: &GlobalArgs) -> Result<ExitCode> {
    match command {
        CronCommand::List(args) => {
            let resolved = args.gateway.resolve(global)?;
            let client = GatewayClient::connect(&resolved)
                .await
                .with_context(|| format!("cannot connect to gateway at {}", resolved.endpoint))?;
            let listed = client
                .cron_list(CronListOptions {
                    include_disabled: args.all,
                })
                .await;
            client.close().await;
            let jobs = listed.context("cron.list failed")?;

            if global.json {
                print_json(&jobs)?;
            } else if jobs.is_empty() {
                println!("No scheduler jobs.");
            } else {
                let mut table = Table::new(jobs.iter().map(row));
                table.with(Style::rounded());
                println!("{table}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn row(job: &CronJob) -> JobRow {
    let text = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());
    JobRow {
        id: job.id.clone(),
        name: text(&job.name),
        agent: text(&job.agent_id),
        schedule: match (&job.schedule, &job.timezone) {
            (Some(schedule), Some(tz)) => format!("{schedule} ({tz})"),
            (Some(schedule), None) => schedule.clone(),
            _ => "-".to_string(),
        },
        enabled: match job.enabled {
            Some(false) => "no".to_string(),
            _ => "yes".to_string(),
        },
    }
}
