use anyhow::Result;
use chrono::Utc;

use crate::commands::{CommandReport, snapshot_details};
use crate::lotw::config::load_config;
use crate::lotw::paths::resolve_paths;
use crate::lotw::snapshot::{
    IncrementalStats, SnapshotValidator, derive_from_log, load_snapshot, save_snapshot,
};

/// Re-derive the snapshot from the local log without contacting LoTW.
pub fn run() -> Result<CommandReport> {
    let cfg = load_config()?;
    let paths = resolve_paths(&cfg)?;
    let validator = SnapshotValidator::embedded()?;

    let previous = load_snapshot(&paths.snapshot_file)?;
    let mut snapshot = derive_from_log(&paths.log_file, Utc::now())?;
    snapshot.incremental_stats = Some(IncrementalStats::between(previous.as_ref(), &snapshot));

    let mut report = CommandReport::new("parse");
    for problem in validator.problems(&snapshot)? {
        report.detail(format!("schema warning: {problem}"));
    }
    save_snapshot(&paths.snapshot_file, &snapshot, &validator)?;

    report.detail(format!("snapshot_file={}", paths.snapshot_file.display()));
    snapshot_details(&mut report, &snapshot);
    Ok(report)
}
