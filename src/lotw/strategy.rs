use crate::lotw::snapshot::DxccSnapshot;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStrategy {
    Skip,
    Full,
    Incremental,
}

impl UpdateStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }
}

impl fmt::Display for UpdateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateDecision {
    pub strategy: UpdateStrategy,
    pub reason: String,
}

impl UpdateDecision {
    fn new(strategy: UpdateStrategy, reason: impl Into<String>) -> Self {
        Self {
            strategy,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdatePolicy {
    pub force_full: bool,
    /// Minutes that must pass between updates; 0 or less disables the check.
    pub min_interval_mins: i64,
}

pub fn decide(
    snapshot: Option<&DxccSnapshot>,
    policy: UpdatePolicy,
    now: DateTime<Utc>,
) -> UpdateDecision {
    if policy.force_full {
        return UpdateDecision::new(UpdateStrategy::Full, "forced");
    }

    let Some(snapshot) = snapshot else {
        return UpdateDecision::new(UpdateStrategy::Full, "no local data");
    };

    if policy.min_interval_mins > 0
        && let Some(persisted) = snapshot.persisted_at()
    {
        let elapsed = now.signed_duration_since(persisted);
        if elapsed < Duration::minutes(policy.min_interval_mins) {
            return UpdateDecision::new(
                UpdateStrategy::Skip,
                format!(
                    "last update {} min ago, less than the {} min interval",
                    elapsed.num_minutes(),
                    policy.min_interval_mins
                ),
            );
        }
    }

    if snapshot.dxcc_stats.is_empty() {
        return UpdateDecision::new(UpdateStrategy::Full, "incomplete local data");
    }

    if !snapshot.has_qso_stamp() && !snapshot.has_qsl_stamp() {
        return UpdateDecision::new(UpdateStrategy::Full, "missing timestamps");
    }

    UpdateDecision::new(
        UpdateStrategy::Incremental,
        "local data complete with QSO/QSL timestamps",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lotw::stats::EntityStats;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn complete_snapshot() -> DxccSnapshot {
        let mut snap = DxccSnapshot {
            last_qso_rx: Some("2024-01-01 00:00:00".into()),
            last_updated_timestamp: (now() - Duration::days(1)).timestamp_millis(),
            ..DxccSnapshot::default()
        };
        snap.dxcc_stats
            .insert("291".into(), EntityStats { qso: 1, qsl: 1 });
        snap
    }

    fn policy(min_interval_mins: i64) -> UpdatePolicy {
        UpdatePolicy {
            force_full: false,
            min_interval_mins,
        }
    }

    #[test]
    fn no_snapshot_means_full() {
        let d = decide(None, policy(60), now());
        assert_eq!(d.strategy, UpdateStrategy::Full);
        assert_eq!(d.reason, "no local data");
    }

    #[test]
    fn force_full_wins_over_everything() {
        let snap = complete_snapshot();
        let forced = UpdatePolicy {
            force_full: true,
            min_interval_mins: 10_000,
        };
        let d = decide(Some(&snap), forced, now());
        assert_eq!(d.strategy, UpdateStrategy::Full);
        assert_eq!(d.reason, "forced");
    }

    #[test]
    fn recent_snapshot_within_interval_is_skipped() {
        let mut snap = complete_snapshot();
        snap.last_updated_timestamp = (now() - Duration::minutes(1)).timestamp_millis();
        assert_eq!(decide(Some(&snap), policy(60), now()).strategy, UpdateStrategy::Skip);
    }

    #[test]
    fn skip_check_runs_before_completeness_checks() {
        let mut snap = DxccSnapshot::default();
        snap.last_updated_timestamp = (now() - Duration::minutes(1)).timestamp_millis();
        assert_eq!(decide(Some(&snap), policy(60), now()).strategy, UpdateStrategy::Skip);
    }

    #[test]
    fn zero_or_negative_interval_disables_skip() {
        let mut snap = complete_snapshot();
        snap.last_updated_timestamp = now().timestamp_millis();
        assert_eq!(
            decide(Some(&snap), policy(0), now()).strategy,
            UpdateStrategy::Incremental
        );
        assert_eq!(
            decide(Some(&snap), policy(-5), now()).strategy,
            UpdateStrategy::Incremental
        );
    }

    #[test]
    fn elapsed_interval_allows_update() {
        let mut snap = complete_snapshot();
        snap.last_updated_timestamp = (now() - Duration::minutes(61)).timestamp_millis();
        assert_eq!(
            decide(Some(&snap), policy(60), now()).strategy,
            UpdateStrategy::Incremental
        );
    }

    #[test]
    fn empty_stats_means_full() {
        let mut snap = complete_snapshot();
        snap.dxcc_stats.clear();
        let d = decide(Some(&snap), policy(0), now());
        assert_eq!(d.strategy, UpdateStrategy::Full);
        assert_eq!(d.reason, "incomplete local data");
    }

    #[test]
    fn blank_timestamps_mean_full() {
        let mut snap = complete_snapshot();
        snap.last_qso_rx = Some("   ".into());
        snap.last_qsl = Some(String::new());
        let d = decide(Some(&snap), policy(0), now());
        assert_eq!(d.strategy, UpdateStrategy::Full);
        assert_eq!(d.reason, "missing timestamps");
    }

    #[test]
    fn either_timestamp_is_enough_for_incremental() {
        let mut snap = complete_snapshot();
        assert_eq!(
            decide(Some(&snap), policy(0), now()).strategy,
            UpdateStrategy::Incremental
        );
        snap.last_qso_rx = None;
        snap.last_qsl = Some("2024-02-01 00:00:00".into());
        assert_eq!(
            decide(Some(&snap), policy(0), now()).strategy,
            UpdateStrategy::Incremental
        );
    }
}
