use anyhow::Result;
use chrono::Utc;

use crate::commands::{CommandReport, snapshot_details};
use crate::lotw::config::load_config;
use crate::lotw::fetch::DeferredClient;
use crate::lotw::paths::resolve_paths;
use crate::lotw::snapshot::SnapshotValidator;
use crate::lotw::strategy::UpdateStrategy;
use crate::lotw::updater::Updater;

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub full: bool,
}

pub fn run(opts: &UpdateOptions) -> Result<CommandReport> {
    let cfg = load_config()?;
    let paths = resolve_paths(&cfg)?;
    let validator = SnapshotValidator::embedded()?;
    let fetcher = DeferredClient::new(&cfg.lotw);
    let updater = Updater {
        cfg: &cfg,
        paths: &paths,
        fetcher: &fetcher,
        validator: &validator,
    };

    let outcome = updater.run(opts.full, Utc::now())?;
    let mut report = CommandReport::new("update");
    report.detail(format!("strategy={}", outcome.decision.strategy));
    report.detail(format!("reason={}", outcome.decision.reason));
    report.detail(format!("log_file={}", paths.log_file.display()));

    if outcome.decision.strategy == UpdateStrategy::Incremental {
        report.detail(format!("appended_qsos={}", outcome.appended));
        report.detail(format!(
            "qsl_updates={} matched={} unmatched={}",
            outcome.confirmations.updated,
            outcome.confirmations.matched,
            outcome.confirmations.unmatched.len()
        ));
    }
    match outcome.snapshot.as_ref() {
        Some(snapshot) => snapshot_details(&mut report, snapshot),
        None => report.detail("no snapshot yet"),
    }
    Ok(report)
}
