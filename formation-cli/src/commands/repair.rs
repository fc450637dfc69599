//! `formation repair`: restore drifted config, files, and cron jobs.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use formation_sync::{pipeline, RepairAction, RepairReport, RepairSource};

use super::{print_json, FormationRef, GlobalArgs};

/// Arguments for `formation repair`.
#[derive(Args, Debug)]
pub struct RepairArgs {
    /// Installed formation, as `<namespace>/<name>`.
    pub formation: FormationRef,

    /// Formation source (manifest file or the directory holding it) used to
    /// restore workspace files.
    #[arg(long, value_name = "DIR")]
    pub source: Option<PathBuf>,
}

impl RepairArgs {
    pub async fn run(self, global: &GlobalArgs) -> Result<ExitCode> {
        let ctx = global.context(&self.formation)?;
        let source = match &self.source {
            Some(path) => Some(
                RepairSource::open(path)
                    .with_context(|| format!("failed to load source {}", path.display()))?,
            ),
            None => None,
        };

        let report = pipeline::repair(&ctx, source)
            .await
            .with_context(|| format!("repair failed for '{}'", self.formation))?;

        if global.json {
            print_json(&report)?;
        } else {
            print_report(&report);
        }

        if report.outcome.failed > 0 {
            return Ok(ExitCode::FAILURE);
        }
        Ok(ExitCode::SUCCESS)
    }
}

#[derive(Tabled)]
struct ActionRow {
    #[tabled(rename = "result")]
    result: String,
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "detail")]
    detail: String,
}

fn print_report(report: &RepairReport) {
    let status = &report.status;
    if status.is_clean() {
        println!(
            "{} {}/{}: nothing to repair",
            "✓".green().bold(),
            status.namespace,
            status.name
        );
        return;
    }

    let outcome = &report.outcome;
    println!(
        "{}/{}: {} repaired, {} partial, {} need a source, {} failed",
        status.namespace,
        status.name,
        outcome.repaired,
        outcome.partial,
        outcome.needs_source,
        outcome.failed,
    );

    let rows: Vec<ActionRow> = outcome
        .log
        .iter()
        .map(|entry| ActionRow {
            result: action_label(entry.action),
            kind: entry.discrepancy.kind.to_string(),
            detail: entry.detail.clone(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    let mut written = Vec::new();
    if report.config_written {
        written.push("runtime config");
    }
    if report.state_written {
        written.push("state record");
    }
    if !written.is_empty() {
        println!("Updated {}.", written.join(" and "));
    }
    if outcome.needs_source > 0 {
        println!("Re-run with '--source <dir>' to restore workspace files.");
    }
}

fn action_label(action: RepairAction) -> String {
    match action {
        RepairAction::Repaired => "REPAIRED".green().to_string(),
        RepairAction::Partial => "PARTIAL".yellow().to_string(),
        RepairAction::NeedsSource => "NEEDS SOURCE".bright_black().to_string(),
        RepairAction::Failed => "FAILED".red().bold().to_string(),
    }
}
