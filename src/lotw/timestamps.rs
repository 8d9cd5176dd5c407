use crate::error::LotwError;
use crate::lotw::adif::{self, FIELD_LAST_QSO_RX, FIELD_RX_QSL};
use crate::lotw::util::LOTW_STAMP_FORMAT;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};

/// QSO-side and QSL-side stamps in LoTW's own string form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogTimestamps {
    pub last_qso_rx: Option<String>,
    pub last_qsl: Option<String>,
}

pub fn parse_lotw_stamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    NaiveDateTime::parse_from_str(trimmed, LOTW_STAMP_FORMAT)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Candidate for "latest" tracking: parsed instant for comparison, original
/// text for storage. Unparseable text never beats a parseable stamp.
struct Latest {
    parsed: Option<NaiveDateTime>,
    raw: String,
}

impl Latest {
    fn offer(slot: &mut Option<Latest>, raw: &str) {
        let parsed = parse_lotw_stamp(raw);
        let replace = match slot {
            None => true,
            Some(current) => match (parsed, current.parsed) {
                (Some(new), Some(old)) => new > old,
                (Some(_), None) => true,
                (None, _) => false,
            },
        };
        if replace {
            *slot = Some(Latest {
                parsed,
                raw: raw.to_string(),
            });
        }
    }
}

/// Stamps for a full log text. The QSL side is the latest record-level
/// `APP_LoTW_RXQSL`, falling back to the header value.
pub fn extract_timestamps(text: &str) -> Result<LogTimestamps, LotwError> {
    let sections = adif::split_sections(text);
    extract_from_parts(sections.header, sections.body)
}

pub fn extract_from_parts(header: &str, body: &str) -> Result<LogTimestamps, LotwError> {
    let last_qso_rx = adif::field_value(header, FIELD_LAST_QSO_RX)?
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let mut latest: Option<Latest> = None;
    if let Some(header_qsl) = adif::field_value(header, FIELD_RX_QSL)?.filter(|v| !v.is_empty()) {
        Latest::offer(&mut latest, header_qsl);
    }
    for field in adif::scan_fields(body)? {
        if !field.name.eq_ignore_ascii_case(FIELD_RX_QSL) {
            continue;
        }
        let value = field.value.trim();
        if !value.is_empty() {
            Latest::offer(&mut latest, value);
        }
    }

    Ok(LogTimestamps {
        last_qso_rx,
        last_qsl: latest.map(|l| l.raw),
    })
}

/// Query value for "changes since `stamp`": one second past the stored
/// stamp so the boundary record is not fetched again. Unparseable input is
/// passed through untouched.
pub fn query_since(stamp: &str) -> String {
    match parse_lotw_stamp(stamp) {
        Some(parsed) => (parsed + Duration::seconds(1))
            .format(LOTW_STAMP_FORMAT)
            .to_string(),
        None => stamp.trim().to_string(),
    }
}

/// Query value for "changes since `at`", one second past the instant.
pub fn instant_to_query(at: DateTime<Utc>) -> String {
    (at + Duration::seconds(1))
        .format(LOTW_STAMP_FORMAT)
        .to_string()
}
