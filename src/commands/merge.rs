use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::path::PathBuf;

use crate::commands::{CommandReport, snapshot_details};
use crate::lotw::backup::{self, BackupPolicy};
use crate::lotw::config::load_config;
use crate::lotw::merge::{merge_qsl_file, merge_qso_file, update_record_count};
use crate::lotw::paths::resolve_paths;
use crate::lotw::snapshot::{
    IncrementalStats, SnapshotValidator, derive_from_log, load_snapshot, save_snapshot,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    /// New QSOs, prepended to the log.
    Qso,
    /// Confirmation updates for QSOs already in the log.
    Qsl,
}

#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub kind: MergeKind,
    pub input: PathBuf,
}

/// Apply a report downloaded by hand, with the same backup protection and
/// follow-up steps as an update.
pub fn run(opts: &MergeOptions) -> Result<CommandReport> {
    let cfg = load_config()?;
    let paths = resolve_paths(&cfg)?;
    let validator = SnapshotValidator::embedded()?;
    let incoming = fs::read_to_string(&opts.input)
        .with_context(|| format!("failed to read {}", opts.input.display()))?;

    let command = match opts.kind {
        MergeKind::Qso => "merge-qso",
        MergeKind::Qsl => "merge-qsl",
    };
    let mut report = CommandReport::new(command);
    report.detail(format!("input={}", opts.input.display()));

    let policy = BackupPolicy {
        enabled: cfg.storage.backup_enabled,
        keep: cfg.storage.keep_backup,
    };
    let now = Utc::now();
    let previous = load_snapshot(&paths.snapshot_file)?;
    let log_file = &paths.log_file;

    let snapshot = backup::guarded(log_file, policy, |guard| {
        if let Some(path) = guard.backup_path() {
            report.detail(format!("backup={}", path.display()));
        }
        match opts.kind {
            MergeKind::Qso => {
                let appended = merge_qso_file(log_file, &incoming, now)?;
                report.detail(format!("appended_qsos={appended}"));
            }
            MergeKind::Qsl => {
                let outcome = merge_qsl_file(log_file, &incoming, now)?;
                report.detail(format!(
                    "qsl_updates={} matched={}",
                    outcome.updated, outcome.matched
                ));
                for key in &outcome.unmatched {
                    report.detail(format!("unmatched={key}"));
                }
            }
        }
        let count = update_record_count(log_file)?;
        report.detail(format!("records={count}"));

        let mut snapshot = derive_from_log(log_file, now)?;
        snapshot.incremental_stats =
            Some(IncrementalStats::between(previous.as_ref(), &snapshot));
        save_snapshot(&paths.snapshot_file, &snapshot, &validator)?;
        Ok(snapshot)
    })?;

    snapshot_details(&mut report, &snapshot);
    Ok(report)
}
