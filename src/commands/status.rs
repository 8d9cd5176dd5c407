use anyhow::{Context, Result};
use chrono::Utc;
use std::env;
use std::fs;

use crate::commands::{CommandReport, snapshot_details};
use crate::lotw::adif::{self, END_OF_RECORD};
use crate::lotw::backup::list_backups;
use crate::lotw::config::{LotwConfig, load_config, load_credentials};
use crate::lotw::paths::{LotwPaths, resolve_paths};
use crate::lotw::snapshot::load_snapshot;
use crate::lotw::strategy::{UpdatePolicy, decide};

mod generated {
    include!(concat!(env!("OUT_DIR"), "/lotw_env_allowlist.rs"));
}

/// `LOTW_*` variables in the environment that nothing reads.
pub fn unknown_env_keys<I>(keys: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut unknown: Vec<String> = keys
        .into_iter()
        .filter(|key| key.starts_with("LOTW_"))
        .filter(|key| !generated::GENERATED_LOTW_ENV_ALLOWLIST.contains(&key.as_str()))
        .collect();
    unknown.sort();
    unknown
}

fn env_report() -> CommandReport {
    let mut report = CommandReport::new("env");
    for key in unknown_env_keys(env::vars().map(|(k, _)| k)) {
        report.issue(format!("unknown environment variable {key} (typo?)"));
    }
    if load_credentials().is_err() {
        report.detail("credentials=missing (needed for update)");
    } else {
        report.detail("credentials=present");
    }
    report
}

fn log_report(paths: &LotwPaths) -> Result<CommandReport> {
    let mut report = CommandReport::new("log");
    report.detail(format!("log_file={}", paths.log_file.display()));
    if !paths.log_file.exists() {
        report.detail("log=absent");
        return Ok(report);
    }

    let text = fs::read_to_string(&paths.log_file)
        .with_context(|| format!("failed to read {}", paths.log_file.display()))?;
    let sections = adif::split_sections(&text);
    let markers = match adif::count_markers(sections.body, END_OF_RECORD) {
        Ok(n) => n as u64,
        Err(err) => {
            report.issue(format!("log body unreadable: {err}"));
            return Ok(report);
        }
    };
    report.detail(format!("records={markers}"));
    match adif::header_record_count(sections.header) {
        Ok(Some(declared)) if declared == markers => {}
        Ok(Some(declared)) => report.issue(format!(
            "header declares {declared} records but body has {markers}; run `recount`"
        )),
        Ok(None) => report.issue("header has no record count; run `recount`"),
        Err(err) => report.issue(format!("log header unreadable: {err}")),
    }

    for backup in list_backups(&paths.log_file)? {
        report.detail(format!("backup={}", backup.display()));
    }
    Ok(report)
}

fn snapshot_report(cfg: &LotwConfig, paths: &LotwPaths) -> Result<CommandReport> {
    let mut report = CommandReport::new("snapshot");
    report.detail(format!("snapshot_file={}", paths.snapshot_file.display()));
    let snapshot = load_snapshot(&paths.snapshot_file)?;
    match snapshot.as_ref() {
        Some(snapshot) => {
            report.detail(format!("last_updated={}", snapshot.last_updated));
            snapshot_details(&mut report, snapshot);
        }
        None => report.detail("snapshot=absent"),
    }

    let policy = UpdatePolicy {
        force_full: false,
        min_interval_mins: cfg.update.min_interval_mins,
    };
    let next = decide(snapshot.as_ref(), policy, Utc::now());
    report.detail(format!("next_update={} ({})", next.strategy, next.reason));
    Ok(report)
}

pub fn run() -> Result<CommandReport> {
    let cfg = load_config()?;
    let paths = resolve_paths(&cfg)?;
    let mut report = CommandReport::new("status");
    report.detail(format!("data_dir={}", paths.data_dir.display()));
    report.detail(format!("lotw_url={}", cfg.lotw.url));
    report.detail(format!(
        "backup_enabled={} keep_backup={}",
        cfg.storage.backup_enabled, cfg.storage.keep_backup
    ));

    report.merge(env_report());
    report.merge(log_report(&paths)?);
    report.merge(snapshot_report(&cfg, &paths)?);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_keys_are_accepted_and_typos_flagged() {
        // Built at runtime so the allowlist scan does not pick the typo up.
        let typo = format!("LOTW_{}", "DATADIR");
        let keys = vec![
            "LOTW_USERNAME".to_string(),
            "LOTW_DATA_DIR".to_string(),
            typo.clone(),
            "PATH".to_string(),
        ];
        assert_eq!(unknown_env_keys(keys), vec![typo]);
    }
}
