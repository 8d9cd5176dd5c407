use crate::lotw::adif::LogRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityStats {
    pub qso: u64,
    /// 0 or 1: an entity is either confirmed or not.
    pub qsl: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DxccStats {
    pub total_qso: u64,
    /// Confirmed records, not confirmed entities.
    pub total_qsl: u64,
    pub dxcc_confirmed: u64,
    pub dxcc_stats: BTreeMap<String, EntityStats>,
}

pub fn aggregate<'a>(records: impl IntoIterator<Item = &'a LogRecord>) -> DxccStats {
    let mut out = DxccStats::default();

    for record in records {
        out.total_qso += 1;
        if !record.has_entity_field() {
            continue;
        }
        let confirmed = record.is_confirmed();
        if confirmed {
            out.total_qsl += 1;
        }

        let Some(code) = record.entity_code() else {
            continue;
        };
        let entry = out.dxcc_stats.entry(code.to_string()).or_default();
        entry.qso += 1;
        if confirmed {
            entry.qsl = 1;
        }
    }

    out.dxcc_confirmed = out.dxcc_stats.values().filter(|s| s.qsl > 0).count() as u64;
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lotw::adif::parse_record;

    fn rec(text: &str) -> LogRecord {
        parse_record(text).expect("record")
    }

    #[test]
    fn total_qsl_counts_confirmed_records_not_entities() {
        let records = vec![
            rec("<DXCC:3>291<QSL_RCVD:1>Y"),
            rec("<DXCC:3>291<APP_LoTW_QSL_RCVD:1>Y"),
            rec("<DXCC:3>291<QSL_RCVD:1>N"),
            rec("<DXCC:3>339<QSL_RCVD:1>N"),
        ];
        let stats = aggregate(&records);
        assert_eq!(stats.total_qso, 4);
        assert_eq!(stats.total_qsl, 2);
        assert_eq!(stats.dxcc_confirmed, 1);
        assert_eq!(stats.dxcc_stats["291"], EntityStats { qso: 3, qsl: 1 });
        assert_eq!(stats.dxcc_stats["339"], EntityStats { qso: 1, qsl: 0 });
    }

    #[test]
    fn entity_zero_and_empty_are_excluded_but_still_confirm() {
        let records = vec![
            rec("<DXCC:1>0<QSL_RCVD:1>Y"),
            rec("<DXCC:0><QSL_RCVD:1>Y"),
        ];
        let stats = aggregate(&records);
        assert_eq!(stats.total_qso, 2);
        assert_eq!(stats.total_qsl, 2);
        assert!(stats.dxcc_stats.is_empty());
        assert_eq!(stats.dxcc_confirmed, 0);
    }

    #[test]
    fn record_without_entity_field_counts_as_qso_only() {
        let stats = aggregate(&[rec("<CALL:3>K1A<QSL_RCVD:1>Y")]);
        assert_eq!(stats.total_qso, 1);
        assert_eq!(stats.total_qsl, 0);
        assert!(stats.dxcc_stats.is_empty());
    }

    #[test]
    fn lowercase_y_is_not_a_confirmation() {
        let stats = aggregate(&[rec("<DXCC:2>50<QSL_RCVD:1>y")]);
        assert_eq!(stats.total_qsl, 0);
        assert_eq!(stats.dxcc_stats["50"].qsl, 0);
    }

    #[test]
    fn confirmed_entity_count_never_exceeds_distinct_entities() {
        let records: Vec<_> = (0..40)
            .map(|i| rec(&format!("<DXCC:2>{:02}<QSL_RCVD:1>{}", i % 7, if i % 3 == 0 { "Y" } else { "N" })))
            .collect();
        let stats = aggregate(&records);
        let confirmed = stats.dxcc_stats.values().filter(|s| s.qsl > 0).count() as u64;
        assert_eq!(stats.dxcc_confirmed, confirmed);
        assert!(stats.dxcc_confirmed <= stats.dxcc_stats.len() as u64);
        assert_eq!(stats.dxcc_stats.len(), 7);
    }
}
