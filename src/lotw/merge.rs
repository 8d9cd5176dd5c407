//! Merging fetched partial logs into the authoritative log.
//!
//! The text transforms are pure; the `*_file` wrappers read the log fresh,
//! apply one transform and replace the file atomically. Every body mutation
//! must be followed by [`update_record_count`].

use crate::error::LotwError;
use crate::lotw::adif::{
    self, END_OF_FILE, END_OF_RECORD, FIELD_LAST_QSO_RX, FIELD_NUMREC, FIELD_RX_QSL, LogRecord,
};
use crate::lotw::util::{lotw_stamp, write_atomic};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merged<R> {
    pub text: String,
    /// False when the input text is returned untouched.
    pub changed: bool,
    pub report: R,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub incoming: usize,
    pub matched: usize,
    pub updated: usize,
    /// Merge keys of incoming records with no counterpart; `(none)` when
    /// the record carried no key at all.
    pub unmatched: Vec<String>,
}

fn require_header<'a>(text: &'a str, what: &str) -> Result<adif::Sections<'a>, LotwError> {
    let sections = adif::split_sections(text);
    if sections.header.is_empty() {
        return Err(LotwError::Parse(format!(
            "{what} has no {} marker",
            adif::END_OF_HEADER
        )));
    }
    Ok(sections)
}

/// Body guaranteed to end with exactly one end-of-file marker.
fn body_with_eof(body: &str) -> Result<String, LotwError> {
    if adif::count_markers(body, END_OF_FILE)? > 0 {
        return Ok(body.to_string());
    }
    Ok(format!("\n{}\n{END_OF_FILE}\n", body.trim()))
}

/// Prepend new QSO records to `existing`. Purely additive: nothing is
/// matched against existing records.
pub fn append_merge(
    existing: &str,
    incoming: &str,
    generated_at: &str,
) -> Result<Merged<usize>, LotwError> {
    let current = require_header(existing, "authoritative log")?;
    adif::ensure_log_text(incoming)?;
    let fresh = adif::split_sections(incoming);

    let incoming_body = adif::remove_markers(fresh.body, END_OF_FILE)?;
    let incoming_body = incoming_body.trim();
    let appended = adif::count_markers(incoming_body, END_OF_RECORD)?;
    if appended == 0 {
        return Ok(Merged {
            text: existing.to_string(),
            changed: false,
            report: 0,
        });
    }

    let existing_count = match adif::header_record_count(current.header)? {
        Some(n) => n,
        None => adif::count_markers(current.body, END_OF_RECORD)? as u64,
    };
    let incoming_count = adif::header_record_count(fresh.header)?.unwrap_or(appended as u64);

    let mut header = adif::refresh_generated_at(current.header, generated_at)?;
    header = adif::upsert_header_field(
        &header,
        FIELD_NUMREC,
        &(existing_count + incoming_count).to_string(),
    )?;
    if let Some(qso_rx) = adif::field_value(fresh.header, FIELD_LAST_QSO_RX)?
        .filter(|v| !v.is_empty())
    {
        header = adif::upsert_header_field(&header, FIELD_LAST_QSO_RX, qso_rx)?;
    }

    let existing_body = body_with_eof(current.body)?;
    let text = format!("{header}\n{incoming_body}\n{}", existing_body.trim_start());
    Ok(Merged {
        text,
        changed: true,
        report: appended,
    })
}

struct Entry {
    block: String,
    record: LogRecord,
}

fn parse_entries(body: &str) -> Result<Vec<Entry>, LotwError> {
    adif::record_blocks(body)?
        .into_iter()
        .map(|block| {
            let record = adif::parse_record(&block)?;
            Ok(Entry { block, record })
        })
        .collect()
}

fn rebuild_body(entries: &[Entry]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push('\n');
        out.push_str(&entry.block);
        out.push('\n');
        out.push_str(END_OF_RECORD);
        out.push('\n');
    }
    out.push_str(END_OF_FILE);
    out.push('\n');
    out
}

/// Apply confirmation updates. Incoming records replace the existing
/// record with the same merge key, and only when the confirmation status
/// differs. The number of records never changes.
pub fn reconcile_merge(
    existing: &str,
    incoming: &str,
    generated_at: &str,
) -> Result<Merged<ReconcileReport>, LotwError> {
    let current = require_header(existing, "authoritative log")?;
    adif::ensure_log_text(incoming)?;
    let fresh = adif::split_sections(incoming);

    let mut entries = parse_entries(current.body)?;
    let mut index: HashMap<String, usize> = HashMap::with_capacity(entries.len());
    for (pos, entry) in entries.iter().enumerate() {
        if let Some(key) = entry.record.merge_key() {
            index.insert(key.to_string(), pos);
        }
    }
    debug!(
        records = entries.len(),
        keys = index.len(),
        "built merge-key index"
    );

    let mut report = ReconcileReport::default();
    for candidate in parse_entries(fresh.body)? {
        report.incoming += 1;
        let key = candidate.record.merge_key().map(str::to_string);
        let Some(pos) = key.as_deref().and_then(|k| index.get(k).copied()) else {
            let shown = key.unwrap_or_else(|| "(none)".to_string());
            warn!("no matching QSO for timestamp {shown}");
            report.unmatched.push(shown);
            continue;
        };

        report.matched += 1;
        if entries[pos].record.is_confirmed() != candidate.record.is_confirmed() {
            debug!(key = key.as_deref().unwrap_or_default(), "confirmation status changed");
            entries[pos] = candidate;
            report.updated += 1;
        }
    }

    let current_qsl_stamp = adif::field_value(current.header, FIELD_RX_QSL)?;
    let new_qsl_stamp = adif::field_value(fresh.header, FIELD_RX_QSL)?
        .filter(|v| !v.is_empty())
        .filter(|v| current_qsl_stamp != Some(*v));

    if report.updated == 0 && new_qsl_stamp.is_none() {
        return Ok(Merged {
            text: existing.to_string(),
            changed: false,
            report,
        });
    }

    let mut header = adif::refresh_generated_at(current.header, generated_at)?;
    if let Some(stamp) = new_qsl_stamp {
        header = adif::upsert_header_field(&header, FIELD_RX_QSL, stamp)?;
    }
    let text = format!("{header}{}", rebuild_body(&entries));
    Ok(Merged {
        text,
        changed: true,
        report,
    })
}

/// Rewrite `APP_LoTW_NUMREC` to the number of `<eor>` markers in the body,
/// not counting marker text inside field values.
pub fn reconcile_record_count(text: &str) -> Result<Merged<u64>, LotwError> {
    let sections = require_header(text, "authoritative log")?;
    let count = adif::count_markers(sections.body, END_OF_RECORD)? as u64;
    if adif::header_record_count(sections.header)? == Some(count) {
        return Ok(Merged {
            text: text.to_string(),
            changed: false,
            report: count,
        });
    }
    let header = adif::upsert_header_field(sections.header, FIELD_NUMREC, &count.to_string())?;
    Ok(Merged {
        text: format!("{header}{}", sections.body),
        changed: true,
        report: count,
    })
}

fn read_log(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(LotwError::NotFound(path.to_path_buf()).into());
    }
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn write_if_changed<R>(path: &Path, merged: &Merged<R>) -> Result<()> {
    if merged.changed {
        write_atomic(path, merged.text.as_bytes())?;
    }
    Ok(())
}

/// Append-merge `incoming` into the log at `path`. Returns the number of
/// records added.
pub fn merge_qso_file(path: &Path, incoming: &str, now: DateTime<Utc>) -> Result<usize> {
    let existing = read_log(path)?;
    let merged = append_merge(&existing, incoming, &lotw_stamp(now))
        .with_context(|| format!("failed to merge new QSOs into {}", path.display()))?;
    write_if_changed(path, &merged)?;
    info!(appended = merged.report, "QSO records merged");
    Ok(merged.report)
}

pub fn merge_qsl_file(path: &Path, incoming: &str, now: DateTime<Utc>) -> Result<ReconcileReport> {
    let existing = read_log(path)?;
    let merged = reconcile_merge(&existing, incoming, &lotw_stamp(now))
        .with_context(|| format!("failed to merge QSL updates into {}", path.display()))?;
    write_if_changed(path, &merged)?;
    info!(
        incoming = merged.report.incoming,
        matched = merged.report.matched,
        updated = merged.report.updated,
        unmatched = merged.report.unmatched.len(),
        "QSL updates reconciled"
    );
    Ok(merged.report)
}

pub fn update_record_count(path: &Path) -> Result<u64> {
    let existing = read_log(path)?;
    let merged = reconcile_record_count(&existing)
        .with_context(|| format!("failed to recount {}", path.display()))?;
    write_if_changed(path, &merged)?;
    info!(count = merged.report, "record count reconciled");
    Ok(merged.report)
}
