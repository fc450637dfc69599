//! `formation status`: drift between the installed record and reality.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use formation_core::{Discrepancy, DiscrepancyType};
use formation_sync::{pipeline, SchedulerStatus, StatusReport};

use super::{print_json, FormationRef, GlobalArgs};

/// Arguments for `formation status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Installed formation, as `<namespace>/<name>`.
    pub formation: FormationRef,
}

impl StatusArgs {
    pub async fn run(self, global: &GlobalArgs) -> Result<ExitCode> {
        let ctx = global.context(&self.formation)?;
        let report = pipeline::check(&ctx)
            .await
            .with_context(|| format!("status check failed for '{}'", self.formation))?;

        if global.json {
            print_json(&report)?;
        } else {
            print_report(&report);
        }
        Ok(ExitCode::SUCCESS)
    }
}

#[derive(Tabled)]
struct DiscrepancyRow {
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "repair")]
    repair: String,
    #[tabled(rename = "detail")]
    detail: String,
}

fn print_report(report: &StatusReport) {
    println!(
        "{}/{} v{} | {} discrepancies | scheduler {}",
        report.namespace,
        report.name,
        report.version,
        report.discrepancies.len(),
        scheduler_label(&report.scheduler),
    );

    if report.is_clean() {
        println!("{} everything matches the installed record", "✓".green().bold());
        return;
    }

    let rows: Vec<DiscrepancyRow> = report.discrepancies.iter().map(row).collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if report.fixable() > 0 {
        println!(
            "Run 'formation repair {}/{}' to fix {} of them.",
            report.namespace,
            report.name,
            report.fixable()
        );
    }
}

fn row(discrepancy: &Discrepancy) -> DiscrepancyRow {
    DiscrepancyRow {
        kind: discrepancy.kind.to_string(),
        state: match discrepancy.type_ {
            DiscrepancyType::Missing => "MISSING".red().to_string(),
            DiscrepancyType::Changed => "CHANGED".yellow().to_string(),
        },
        repair: repair_label(discrepancy).to_string(),
        detail: discrepancy.description.clone(),
    }
}

fn repair_label(discrepancy: &Discrepancy) -> &'static str {
    if discrepancy.fixable {
        "auto"
    } else if discrepancy.needs_source {
        "needs source"
    } else {
        "manual"
    }
}

fn scheduler_label(status: &SchedulerStatus) -> String {
    match status {
        SchedulerStatus::Reachable => "reachable".green().to_string(),
        SchedulerStatus::Unknown { reason } => {
            format!("{} ({reason})", "unknown".bright_black())
        }
    }
}
