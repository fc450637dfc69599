//! Formation: inspect, repair, and plan installed agent formations.
//!
//! # Usage
//!
//! ```text
//! formation status <namespace>/<name> [--json]
//! formation repair <namespace>/<name> [--source <dir>] [--json]
//! formation plan <namespace>/<name> --manifest <file> [--json]
//! formation gateway probe [--url <url>] [--token <t> | --password <p>]
//! formation cron list [--url <url>] [--all]
//! ```

mod commands;

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use commands::{
    cron::CronCommand, gateway::GatewayCommand, plan::PlanArgs, repair::RepairArgs,
    status::StatusArgs, GlobalArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "formation",
    version,
    about = "Check and repair installed agent formations",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compare an installed formation with the runtime config, workspaces, and scheduler.
    Status(StatusArgs),

    /// Restore what drifted from the installed record.
    Repair(RepairArgs),

    /// Show what upgrading to a new manifest would change.
    Plan(PlanArgs),

    /// Gateway connectivity.
    Gateway {
        #[command(subcommand)]
        command: GatewayCommand,
    },

    /// Scheduler jobs.
    Cron {
        #[command(subcommand)]
        command: CronCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);

    match cli.command {
        Commands::Status(args) => args.run(&cli.global).await,
        Commands::Repair(args) => args.run(&cli.global).await,
        Commands::Plan(args) => args.run(&cli.global),
        Commands::Gateway { command } => commands::gateway::run(command, &cli.global).await,
        Commands::Cron { command } => commands::cron::run(command, &cli.global).await,
    }
}

/// Logs go to stderr so `--json` output on stdout stays parseable.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}
