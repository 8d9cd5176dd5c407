use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::merge::{MergeKind, MergeOptions};
use crate::commands::update::UpdateOptions;
use crate::commands::{self, CommandReport};

#[derive(Parser, Debug)]
#[command(
    name = "lotw-dxcc",
    version,
    about = "Mirror a Logbook of the World report locally and track DXCC confirmations"
)]
pub struct Cli {
    /// Print the command report as JSON.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch from LoTW and update the local log and statistics.
    Update {
        /// Download the whole log even when an incremental update would do.
        #[arg(long)]
        full: bool,
    },
    /// Recompute statistics from the local log.
    Parse,
    /// Merge a downloaded report of new QSOs into the local log.
    MergeQso {
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
    },
    /// Apply a downloaded report of QSL updates to the local log.
    MergeQsl {
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
    },
    /// Fix the record count in the local log header.
    Recount,
    /// Show paths, local data and the strategy the next update would use.
    Status,
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let state = if report.ok { "ok" } else { "issues" };
    println!("{}: {state}", report.command);
    for detail in &report.details {
        println!("  {detail}");
    }
    for issue in &report.issues {
        println!("  issue: {issue}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let report = match cli.command {
        Command::Update { full } => commands::update::run(&UpdateOptions { full })?,
        Command::Parse => commands::parse::run()?,
        Command::MergeQso { input } => commands::merge::run(&MergeOptions {
            kind: MergeKind::Qso,
            input,
        })?,
        Command::MergeQsl { input } => commands::merge::run(&MergeOptions {
            kind: MergeKind::Qsl,
            input,
        })?,
        Command::Recount => commands::recount::run()?,
        Command::Status => commands::status::run()?,
    };

    print_report(&report, cli.json)?;
    if !report.ok {
        bail!(
            "{} finished with {} issue(s)",
            report.command,
            report.issues.len()
        );
    }
    Ok(())
}
