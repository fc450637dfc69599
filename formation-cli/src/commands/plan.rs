//! `formation plan`: preview an upgrade without applying it.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use formation_core::plan::{
    AgentChangeKind, CronChangeKind, EdgeChangeKind, MigrationPlan, SetChangeKind,
};
use formation_sync::pipeline;

use super::{print_json, FormationRef, GlobalArgs};

/// Arguments for `formation plan`.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Installed formation, as `<namespace>/<name>`.
    pub formation: FormationRef,

    /// New manifest (`.yaml`, `.yml`, or `.json`).
    #[arg(long, value_name = "FILE")]
    pub manifest: PathBuf,
}

impl PlanArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<ExitCode> {
        let ctx = global.context(&self.formation)?;
        let plan = pipeline::plan(&ctx, &self.manifest).with_context(|| {
            format!(
                "failed to plan '{}' against {}",
                self.formation,
                self.manifest.display()
            )
        })?;

        if global.json {
            print_json(&plan)?;
        } else {
            print_plan(&self.formation, &plan);
        }
        Ok(ExitCode::SUCCESS)
    }
}

#[derive(Tabled)]
struct ChangeRow {
    #[tabled(rename = "area")]
    area: &'static str,
    #[tabled(rename = "change")]
    change: String,
    #[tabled(rename = "subject")]
    subject: String,
}

fn print_plan(formation: &FormationRef, plan: &MigrationPlan) {
    if plan.is_empty {
        println!("{} {formation} is up to date", "✓".green().bold());
        return;
    }
    if let Some(version) = &plan.version_change {
        println!("{formation}: {} → {}", version.from, version.to.bold());
    } else {
        println!("{formation}: same version, content changed");
    }

    let mut table = Table::new(rows(plan));
    table.with(Style::rounded());
    println!("{table}");
}

fn rows(plan: &MigrationPlan) -> Vec<ChangeRow> {
    let mut rows = Vec::new();
    for change in &plan.agents {
        let label = match change.kind {
            AgentChangeKind::Unchanged => continue,
            AgentChangeKind::Add => "add".green().to_string(),
            AgentChangeKind::Remove => "remove".red().to_string(),
            AgentChangeKind::Update => "update".yellow().to_string(),
        };
        let subject = match &change.changed_files {
            Some(files) => format!("{} ({})", change.slug, files.join(", ")),
            None => change.slug.to_string(),
        };
        rows.push(ChangeRow {
            area: "agent",
            change: label,
            subject,
        });
    }
    for change in &plan.bindings {
        rows.push(ChangeRow {
            area: "binding",
            change: set_label(change.kind),
            subject: format!("{} {}", change.binding.agent_id, change.binding.match_),
        });
    }
    for change in &plan.cron {
        let label = match change.kind {
            CronChangeKind::Add => "add".green().to_string(),
            CronChangeKind::Remove => "remove".red().to_string(),
            CronChangeKind::Update => "update".yellow().to_string(),
        };
        rows.push(ChangeRow {
            area: "cron",
            change: label,
            subject: format!("{} ({})", change.name, change.agent_slug),
        });
    }
    for change in &plan.a2a {
        let label = match change.kind {
            EdgeChangeKind::Add => "add".green().to_string(),
            EdgeChangeKind::Remove => "remove".red().to_string(),
            EdgeChangeKind::Reapply => "reapply".cyan().to_string(),
        };
        rows.push(ChangeRow {
            area: "a2a",
            change: label,
            subject: format!("{} → {}", change.from, change.to),
        });
    }
    rows
}

fn set_label(kind: SetChangeKind) -> String {
    match kind {
        SetChangeKind::Add => "add".green().to_string(),
        SetChangeKind::Remove => "remove".red().to_string(),
    }
}
