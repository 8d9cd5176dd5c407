use crate::error::LotwError;
use crate::lotw::adif;
use crate::lotw::stats::{self, EntityStats};
use crate::lotw::timestamps::extract_timestamps;
use crate::lotw::util::{iso_stamp, write_atomic};
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

const SNAPSHOT_SCHEMA: &str = include_str!("../../schemas/lotw-dxcc-data.schema.json");

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementalStats {
    #[serde(rename = "newQSOs")]
    pub new_qsos: i64,
    #[serde(rename = "newQSLs")]
    pub new_qsls: i64,
    #[serde(rename = "newDXCCs")]
    pub new_dxccs: i64,
}

impl IncrementalStats {
    pub fn between(before: Option<&DxccSnapshot>, after: &DxccSnapshot) -> Self {
        let (qso, qsl, dxcc) = before
            .map(|b| (b.total_qso, b.total_qsl, b.dxcc_confirmed))
            .unwrap_or_default();
        Self {
            new_qsos: after.total_qso as i64 - qso as i64,
            new_qsls: after.total_qsl as i64 - qsl as i64,
            new_dxccs: after.dxcc_confirmed as i64 - dxcc as i64,
        }
    }
}

/// Derived statistics persisted as JSON; always recomputed from the full log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DxccSnapshot {
    #[serde(rename = "app_lotw_lastQsoRx", skip_serializing_if = "Option::is_none")]
    pub last_qso_rx: Option<String>,
    #[serde(rename = "app_lotw_lastQsl", skip_serializing_if = "Option::is_none")]
    pub last_qsl: Option<String>,
    pub last_updated: String,
    pub last_updated_timestamp: i64,
    pub total_qso: u64,
    pub total_qsl: u64,
    pub dxcc_confirmed: u64,
    pub dxcc_stats: BTreeMap<String, EntityStats>,
    #[serde(rename = "incrementalStats", skip_serializing_if = "Option::is_none")]
    pub incremental_stats: Option<IncrementalStats>,
}

fn non_blank(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

impl DxccSnapshot {
    pub fn has_qso_stamp(&self) -> bool {
        non_blank(&self.last_qso_rx)
    }

    pub fn has_qsl_stamp(&self) -> bool {
        non_blank(&self.last_qsl)
    }

    /// When this snapshot was written: the epoch-ms field, else the ISO text.
    pub fn persisted_at(&self) -> Option<DateTime<Utc>> {
        if self.last_updated_timestamp > 0 {
            return DateTime::<Utc>::from_timestamp_millis(self.last_updated_timestamp);
        }
        DateTime::parse_from_rfc3339(self.last_updated.trim())
            .ok()
            .map(|at| at.with_timezone(&Utc))
    }
}

pub fn build_snapshot(log_text: &str, now: DateTime<Utc>) -> Result<DxccSnapshot, LotwError> {
    let records = adif::parse_records(log_text)?;
    let stamps = extract_timestamps(log_text)?;
    let stats = stats::aggregate(&records);

    Ok(DxccSnapshot {
        last_qso_rx: stamps.last_qso_rx,
        last_qsl: stamps.last_qsl,
        last_updated: iso_stamp(now),
        last_updated_timestamp: now.timestamp_millis(),
        total_qso: stats.total_qso,
        total_qsl: stats.total_qsl,
        dxcc_confirmed: stats.dxcc_confirmed,
        dxcc_stats: stats.dxcc_stats,
        incremental_stats: None,
    })
}

pub fn derive_from_log(log_path: &Path, now: DateTime<Utc>) -> Result<DxccSnapshot> {
    if !log_path.exists() {
        return Err(LotwError::NotFound(log_path.to_path_buf()).into());
    }
    let text = fs::read_to_string(log_path)
        .with_context(|| format!("failed to read {}", log_path.display()))?;
    let snapshot = build_snapshot(&text, now)
        .with_context(|| format!("failed to parse {}", log_path.display()))?;
    info!(
        total_qso = snapshot.total_qso,
        total_qsl = snapshot.total_qsl,
        dxcc_confirmed = snapshot.dxcc_confirmed,
        "statistics derived from {}",
        log_path.display()
    );
    Ok(snapshot)
}

/// A missing snapshot is normal (first run). An unreadable one is logged
/// and treated the same way so the next update rebuilds it.
pub fn load_snapshot(path: &Path) -> Result<Option<DxccSnapshot>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    match serde_json::from_str::<DxccSnapshot>(&raw) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(err) => {
            warn!(file = %path.display(), "ignoring unreadable snapshot: {err}");
            Ok(None)
        }
    }
}

/// Compiled snapshot schema. Built once by the caller and handed to
/// [`save_snapshot`].
pub struct SnapshotValidator {
    validator: jsonschema::Validator,
}

impl SnapshotValidator {
    pub fn embedded() -> Result<Self> {
        let schema: Value =
            serde_json::from_str(SNAPSHOT_SCHEMA).context("embedded snapshot schema is not JSON")?;
        let validator = jsonschema::validator_for(&schema)
            .map_err(|err| anyhow!("embedded snapshot schema is invalid: {err}"))?;
        Ok(Self { validator })
    }

    pub fn problems(&self, snapshot: &DxccSnapshot) -> Result<Vec<String>> {
        let instance = serde_json::to_value(snapshot)?;
        Ok(self
            .validator
            .iter_errors(&instance)
            .map(|err| err.to_string())
            .collect())
    }
}

/// Validation problems are warnings; the snapshot is written regardless.
pub fn save_snapshot(
    path: &Path,
    snapshot: &DxccSnapshot,
    validator: &SnapshotValidator,
) -> Result<()> {
    for problem in validator.problems(snapshot)? {
        warn!(file = %path.display(), "snapshot failed schema validation: {problem}");
    }
    let data = serde_json::to_string_pretty(snapshot)?;
    write_atomic(path, format!("{data}\n").as_bytes())?;
    info!(file = %path.display(), "snapshot saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const LOG: &str = "ARRL Logbook of the World Status Report\n\
        <APP_LoTW_LASTQSORX:19>2024-05-01 12:00:00\n<APP_LoTW_NUMREC:1>3\n<eoh>\n\
        <CALL:5>K1ABC <DXCC:3>291 <QSL_RCVD:1>Y <APP_LoTW_RXQSL:19>2024-04-30 10:00:00 <eor>\n\
        <CALL:4>JA1X <DXCC:3>339 <QSL_RCVD:1>N <eor>\n\
        <CALL:4>4U1U <DXCC:1>0 <APP_LoTW_QSL_RCVD:1>Y <APP_LoTW_RXQSL:19>2024-04-01 10:00:00 <eor>\n\
        <APP_LoTW_EOF>\n";

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap()
    }

    #[test]
    fn snapshot_is_derived_from_full_log() {
        let snap = build_snapshot(LOG, at()).unwrap();
        assert_eq!(snap.total_qso, 3);
        assert_eq!(snap.total_qsl, 2);
        assert_eq!(snap.dxcc_confirmed, 1);
        assert!(!snap.dxcc_stats.contains_key("0"));
        assert_eq!(snap.last_qso_rx.as_deref(), Some("2024-05-01 12:00:00"));
        assert_eq!(snap.last_qsl.as_deref(), Some("2024-04-30 10:00:00"));
        assert_eq!(snap.last_updated, "2024-05-02T00:00:00.000Z");
        assert_eq!(snap.last_updated_timestamp, 1_714_608_000_000);
        assert_eq!(snap.persisted_at(), Some(at()));
    }

    #[test]
    fn json_uses_published_field_names() {
        let mut snap = build_snapshot(LOG, at()).unwrap();
        snap.incremental_stats = Some(IncrementalStats {
            new_qsos: 2,
            new_qsls: 1,
            new_dxccs: 0,
        });
        let value = serde_json::to_value(&snap).unwrap();
        assert_eq!(value["app_lotw_lastQsoRx"], "2024-05-01 12:00:00");
        assert_eq!(value["dxcc_stats"]["291"]["qsl"], 1);
        assert_eq!(value["incrementalStats"]["newQSOs"], 2);

        let bare = build_snapshot("<eoh>", at()).unwrap();
        let value = serde_json::to_value(&bare).unwrap();
        assert!(value.get("app_lotw_lastQsl").is_none());
        assert!(value.get("incrementalStats").is_none());
    }

    #[test]
    fn derived_snapshot_passes_the_schema() {
        let validator = SnapshotValidator::embedded().unwrap();
        let snap = build_snapshot(LOG, at()).unwrap();
        assert!(validator.problems(&snap).unwrap().is_empty());

        let mut broken = snap.clone();
        broken.last_updated = String::new();
        assert!(!validator.problems(&broken).unwrap().is_empty());
    }

    #[test]
    fn schema_failure_still_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("stats.json");
        let validator = SnapshotValidator::embedded().unwrap();
        let mut snap = build_snapshot(LOG, at()).unwrap();
        snap.last_qsl = Some("not a stamp".into());
        save_snapshot(&path, &snap, &validator).unwrap();
        let loaded = load_snapshot(&path).unwrap().unwrap();
        assert_eq!(loaded, snap);
    }

    #[test]
    fn missing_or_corrupt_snapshot_loads_as_none() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("stats.json");
        assert!(load_snapshot(&path).unwrap().is_none());
        fs::write(&path, "{ not json").unwrap();
        assert!(load_snapshot(&path).unwrap().is_none());
    }

    #[test]
    fn partial_snapshot_fills_defaults() {
        let snap: DxccSnapshot =
            serde_json::from_str(r#"{"last_updated":"2024-01-01T00:00:00Z","total_qso":5}"#)
                .unwrap();
        assert_eq!(snap.total_qso, 5);
        assert!(snap.dxcc_stats.is_empty());
        assert_eq!(
            snap.persisted_at(),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn deltas_against_previous_snapshot() {
        let after = build_snapshot(LOG, at()).unwrap();
        let mut before = after.clone();
        before.total_qso = 1;
        before.total_qsl = 2;
        before.dxcc_confirmed = 0;
        let delta = IncrementalStats::between(Some(&before), &after);
        assert_eq!((delta.new_qsos, delta.new_qsls, delta.new_dxccs), (2, 0, 1));
        let fresh = IncrementalStats::between(None, &after);
        assert_eq!(fresh.new_qsos, 3);
    }

    #[test]
    fn missing_log_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = derive_from_log(&tmp.path().join("none.adif"), at()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LotwError>(),
            Some(LotwError::NotFound(_))
        ));
    }
}
