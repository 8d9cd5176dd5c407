//! The update pipeline: select a strategy, fetch, merge under a backup,
//! recount, re-derive and persist the snapshot.

use crate::error::LotwError;
use crate::lotw::adif;
use crate::lotw::audit;
use crate::lotw::backup::{self, BackupPolicy};
use crate::lotw::config::LotwConfig;
use crate::lotw::fetch::{FetchMode, LogFetcher};
use crate::lotw::merge::{self, ReconcileReport};
use crate::lotw::paths::LotwPaths;
use crate::lotw::snapshot::{
    self, DxccSnapshot, IncrementalStats, SnapshotValidator, derive_from_log, save_snapshot,
};
use crate::lotw::strategy::{self, UpdateDecision, UpdatePolicy, UpdateStrategy};
use crate::lotw::timestamps::{instant_to_query, query_since};
use crate::lotw::util::write_atomic;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub decision: UpdateDecision,
    /// The snapshot on disk after the run (the previous one for a skip).
    pub snapshot: Option<DxccSnapshot>,
    /// QSO records added by an incremental run.
    pub appended: usize,
    pub confirmations: ReconcileReport,
}

pub struct Updater<'a> {
    pub cfg: &'a LotwConfig,
    pub paths: &'a LotwPaths,
    pub fetcher: &'a dyn LogFetcher,
    pub validator: &'a SnapshotValidator,
}

/// Query values for the QSO and QSL sides of an incremental fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FetchWindows {
    qso_since: String,
    qsl_since: String,
}

/// Query value for one side: the side's own stamp, else one second past the
/// time the snapshot was persisted. `None` when neither is known.
fn since_for(stamp: Option<&str>, snapshot: &DxccSnapshot) -> Option<String> {
    match stamp.map(str::trim).filter(|s| !s.is_empty()) {
        Some(stamp) => Some(query_since(stamp)),
        None => snapshot.persisted_at().map(instant_to_query),
    }
}

fn fetch_windows(snapshot: &DxccSnapshot) -> Option<FetchWindows> {
    Some(FetchWindows {
        qso_since: since_for(snapshot.last_qso_rx.as_deref(), snapshot)?,
        qsl_since: since_for(snapshot.last_qsl.as_deref(), snapshot)?,
    })
}

impl Updater<'_> {
    fn backup_policy(&self) -> BackupPolicy {
        BackupPolicy {
            enabled: self.cfg.storage.backup_enabled,
            keep: self.cfg.storage.keep_backup,
        }
    }

    pub fn run(&self, force_full: bool, now: DateTime<Utc>) -> Result<UpdateOutcome> {
        let result = self.run_inner(force_full, now);
        let (status, message) = match &result {
            Ok(outcome) => (
                "ok",
                format!("{}: {}", outcome.decision.strategy, outcome.decision.reason),
            ),
            Err(err) => ("failed", format!("{err:#}")),
        };
        if let Err(err) = audit::append_event(self.paths, "update", status, &message) {
            warn!("failed to write audit event: {err:#}");
        }
        result
    }

    fn run_inner(&self, force_full: bool, now: DateTime<Utc>) -> Result<UpdateOutcome> {
        let previous = snapshot::load_snapshot(&self.paths.snapshot_file)?;
        let policy = UpdatePolicy {
            force_full,
            min_interval_mins: self.cfg.update.min_interval_mins,
        };
        let decision = strategy::decide(previous.as_ref(), policy, now);
        info!(strategy = %decision.strategy, reason = %decision.reason, "update strategy selected");

        match (decision.strategy, previous) {
            (UpdateStrategy::Skip, previous) => Ok(UpdateOutcome {
                decision,
                snapshot: previous,
                appended: 0,
                confirmations: ReconcileReport::default(),
            }),
            (UpdateStrategy::Incremental, Some(previous)) => match fetch_windows(&previous) {
                Some(windows) => self.incremental_update(decision, &previous, &windows, now),
                None => {
                    warn!("no usable fetch window in snapshot; downloading everything");
                    let decision = UpdateDecision {
                        strategy: UpdateStrategy::Full,
                        reason: "no fetch window known".to_string(),
                    };
                    self.full_update(decision, Some(&previous), now)
                }
            },
            (_, previous) => self.full_update(decision, previous.as_ref(), now),
        }
    }

    fn full_update(
        &self,
        decision: UpdateDecision,
        previous: Option<&DxccSnapshot>,
        now: DateTime<Utc>,
    ) -> Result<UpdateOutcome> {
        let text = self.fetcher.fetch(None, FetchMode::Full)?;
        adif::ensure_log_text(&text)?;
        if text.trim().is_empty() {
            return Err(LotwError::Parse("full report is empty".to_string()).into());
        }

        let log_file = &self.paths.log_file;
        let snapshot = backup::guarded(log_file, self.backup_policy(), |_| {
            write_atomic(log_file, text.as_bytes())
                .with_context(|| format!("failed to write {}", log_file.display()))?;
            merge::update_record_count(log_file)?;
            self.persist(previous, now)
        })?;

        info!(total_qso = snapshot.total_qso, "full update complete");
        Ok(UpdateOutcome {
            decision,
            snapshot: Some(snapshot),
            appended: 0,
            confirmations: ReconcileReport::default(),
        })
    }

    fn incremental_update(
        &self,
        decision: UpdateDecision,
        previous: &DxccSnapshot,
        windows: &FetchWindows,
        now: DateTime<Utc>,
    ) -> Result<UpdateOutcome> {
        let log_file = &self.paths.log_file;
        if !log_file.exists() {
            return Err(LotwError::NotFound(log_file.clone()).into());
        }

        let (appended, confirmations, snapshot) =
            backup::guarded(log_file, self.backup_policy(), |_| {
                let qsos = self
                    .fetcher
                    .fetch(Some(&windows.qso_since), FetchMode::IncrementalQso)?;
                let appended = merge::merge_qso_file(log_file, &qsos, now)?;

                let qsls = self
                    .fetcher
                    .fetch(Some(&windows.qsl_since), FetchMode::IncrementalQsl)?;
                let confirmations = merge::merge_qsl_file(log_file, &qsls, now)?;

                merge::update_record_count(log_file)?;
                let snapshot = self.persist(Some(previous), now)?;
                Ok((appended, confirmations, snapshot))
            })?;

        info!(
            appended,
            confirmed = confirmations.updated,
            "incremental update complete"
        );
        Ok(UpdateOutcome {
            decision,
            snapshot: Some(snapshot),
            appended,
            confirmations,
        })
    }

    fn persist(&self, previous: Option<&DxccSnapshot>, now: DateTime<Utc>) -> Result<DxccSnapshot> {
        let mut snapshot = derive_from_log(&self.paths.log_file, now)?;
        snapshot.incremental_stats = Some(IncrementalStats::between(previous, &snapshot));
        save_snapshot(&self.paths.snapshot_file, &snapshot, self.validator)?;
        Ok(snapshot)
    }
}
