//! Tokenizer for the tagged `<NAME:LEN>VALUE` text LoTW serves.
//!
//! Every field read in the crate goes through [`scan_fields`], which always
//! slices exactly the declared number of characters. Nothing here looks for
//! "the next `<`" to find the end of a value.

use crate::error::LotwError;

pub const END_OF_HEADER: &str = "<eoh>";
pub const END_OF_RECORD: &str = "<eor>";
pub const END_OF_FILE: &str = "<APP_LoTW_EOF>";

pub const FIELD_NUMREC: &str = "APP_LoTW_NUMREC";
pub const FIELD_LAST_QSO_RX: &str = "APP_LoTW_LASTQSORX";
pub const FIELD_RX_QSL: &str = "APP_LoTW_RXQSL";
pub const FIELD_QSO_TIMESTAMP: &str = "app_lotw_qso_timestamp";
pub const FIELD_DXCC: &str = "dxcc";
pub const FIELD_QSL_RCVD: &str = "qsl_rcvd";
pub const FIELD_LOTW_QSL_RCVD: &str = "app_lotw_qsl_rcvd";

const GENERATED_AT: &str = "Generated at ";

/// Raw text split at the end-of-header marker. `header` keeps the marker so
/// that `header + body` reproduces the input exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sections<'a> {
    pub header: &'a str,
    pub body: &'a str,
}

/// One `<name:len[:type]>value` occurrence. Offsets are byte offsets into
/// the scanned text; `value` is the exact declared-length slice, untrimmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field<'a> {
    pub name: &'a str,
    pub kind: Option<&'a str>,
    pub value: &'a str,
    pub start: usize,
    pub end: usize,
}

/// Fields of one record block, lower-cased names, insertion ordered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogRecord {
    fields: Vec<(String, String)>,
}

impl LogRecord {
    /// Later duplicates overwrite the value but keep the first position.
    pub fn insert(&mut self, name: &str, value: &str) {
        let key = name.to_ascii_lowercase();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value.to_string(),
            None => self.fields.push((key, value.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let key = name.to_ascii_lowercase();
        self.fields
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Either confirmation flag equal to `Y` counts.
    pub fn is_confirmed(&self) -> bool {
        self.get(FIELD_QSL_RCVD) == Some("Y") || self.get(FIELD_LOTW_QSL_RCVD) == Some("Y")
    }

    /// True when the record carries a `dxcc` field at all, even an empty one.
    pub fn has_entity_field(&self) -> bool {
        self.get(FIELD_DXCC).is_some()
    }

    /// Entity code, or `None` for a missing, empty or `0` code.
    pub fn entity_code(&self) -> Option<&str> {
        let code = self.get(FIELD_DXCC)?.trim();
        if code.is_empty() || code == "0" {
            return None;
        }
        Some(code)
    }

    pub fn merge_key(&self) -> Option<&str> {
        self.get(FIELD_QSO_TIMESTAMP).filter(|v| !v.is_empty())
    }
}

pub(crate) fn find_ci(haystack: &str, needle: &str) -> Option<usize> {
    find_ci_from(haystack, needle, 0)
}

fn find_ci_from(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() || h.len() < n.len() || from > h.len() - n.len() {
        return None;
    }
    (from..=h.len() - n.len()).find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}

pub fn split_sections(text: &str) -> Sections<'_> {
    match find_ci(text, END_OF_HEADER) {
        Some(at) => {
            let end = at + END_OF_HEADER.len();
            Sections {
                header: &text[..end],
                body: &text[end..],
            }
        }
        None => Sections {
            header: "",
            body: "",
        },
    }
}

/// Fetched text must either be blank (no data) or carry a header. Anything
/// else is usually an HTML error page from the service.
pub fn ensure_log_text(text: &str) -> Result<(), LotwError> {
    if text.trim().is_empty() || find_ci(text, END_OF_HEADER).is_some() {
        return Ok(());
    }
    let preview: String = text
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(80)
        .collect();
    Err(LotwError::Parse(format!(
        "no {END_OF_HEADER} marker in log text (starts with `{preview}`)"
    )))
}

/// A tag outside any field value: either a field or a bare marker such as
/// `<eor>`.
enum Tag<'a> {
    Field(Field<'a>),
    Marker { name: &'a str, start: usize, end: usize },
}

/// Walk `text` tag by tag, skipping each field's declared-length value, so a
/// `<` inside a value is never mistaken for a tag.
fn scan_tags(text: &str) -> Result<Vec<Tag<'_>>, LotwError> {
    let mut out = Vec::new();
    let mut pos = 0usize;

    while let Some(rel) = text[pos..].find('<') {
        let open = pos + rel;
        let Some(close_rel) = text[open..].find('>') else {
            break;
        };
        let close = open + close_rel;
        let inner = &text[open + 1..close];

        if let Some(nested) = inner.rfind('<') {
            pos = open + 1 + nested;
            continue;
        }

        let mut parts = inner.splitn(3, ':');
        let name = parts.next().unwrap_or_default().trim();
        let length = parts.next().and_then(|raw| raw.trim().parse::<usize>().ok());
        let kind = parts.next().map(str::trim).filter(|k| !k.is_empty());
        let (Some(length), false) = (length, name.is_empty()) else {
            out.push(Tag::Marker {
                name: inner,
                start: open,
                end: close + 1,
            });
            pos = close + 1;
            continue;
        };

        let value_start = close + 1;
        let rest = &text[value_start..];
        let value_len = if length == 0 {
            0
        } else {
            match rest.char_indices().nth(length - 1) {
                Some((idx, ch)) => idx + ch.len_utf8(),
                None => {
                    return Err(LotwError::Parse(format!(
                        "field `{name}` declares {length} characters but only {} remain",
                        rest.chars().count()
                    )));
                }
            }
        };

        let end = value_start + value_len;
        out.push(Tag::Field(Field {
            name,
            kind,
            value: &text[value_start..end],
            start: open,
            end,
        }));
        pos = end;
    }

    Ok(out)
}

pub fn scan_fields(text: &str) -> Result<Vec<Field<'_>>, LotwError> {
    Ok(scan_tags(text)?
        .into_iter()
        .filter_map(|tag| match tag {
            Tag::Field(field) => Some(field),
            Tag::Marker { .. } => None,
        })
        .collect())
}

/// Byte ranges of every `marker` tag (e.g. `<eor>`) outside field values.
fn marker_spans(text: &str, marker: &str) -> Result<Vec<(usize, usize)>, LotwError> {
    let wanted = marker.trim_start_matches('<').trim_end_matches('>');
    Ok(scan_tags(text)?
        .into_iter()
        .filter_map(|tag| match tag {
            Tag::Marker { name, start, end } if name.trim().eq_ignore_ascii_case(wanted) => {
                Some((start, end))
            }
            _ => None,
        })
        .collect())
}

/// Pieces of `text` between `marker` tags, ignoring case and any marker
/// text inside a field value.
fn split_on_marker<'a>(text: &'a str, marker: &str) -> Result<Vec<&'a str>, LotwError> {
    let mut out = Vec::new();
    let mut cursor = 0usize;
    for (start, end) in marker_spans(text, marker)? {
        out.push(&text[cursor..start]);
        cursor = end;
    }
    out.push(&text[cursor..]);
    Ok(out)
}

pub fn count_markers(text: &str, marker: &str) -> Result<usize, LotwError> {
    Ok(marker_spans(text, marker)?.len())
}

pub fn remove_markers(text: &str, marker: &str) -> Result<String, LotwError> {
    Ok(split_on_marker(text, marker)?.concat())
}

/// Trimmed, non-blank record blocks of `body`, without their `<eor>`
/// terminators and with any end-of-file marker removed.
pub fn record_blocks(body: &str) -> Result<Vec<String>, LotwError> {
    let mut out = Vec::new();
    for block in split_on_marker(body, END_OF_RECORD)? {
        let block = remove_markers(block, END_OF_FILE)?;
        let block = block.trim();
        if !block.is_empty() {
            out.push(block.to_string());
        }
    }
    Ok(out)
}

/// First field named `name` (case-insensitive), trimmed.
pub fn field_value<'a>(text: &'a str, name: &str) -> Result<Option<&'a str>, LotwError> {
    Ok(scan_fields(text)?
        .into_iter()
        .find(|f| f.name.eq_ignore_ascii_case(name))
        .map(|f| f.value.trim()))
}

pub fn parse_record(block: &str) -> Result<LogRecord, LotwError> {
    let mut record = LogRecord::default();
    for field in scan_fields(block)? {
        record.insert(field.name, field.value.trim());
    }
    Ok(record)
}

/// All records in a full log text. Blocks without any field are dropped.
pub fn parse_records(text: &str) -> Result<Vec<LogRecord>, LotwError> {
    let sections = split_sections(text);
    let mut out = Vec::new();
    for block in record_blocks(sections.body)? {
        let record = parse_record(&block)?;
        if !record.is_empty() {
            out.push(record);
        }
    }
    Ok(out)
}

pub fn encode_field(name: &str, value: &str) -> String {
    format!("<{name}:{}>{value}", value.chars().count())
}

/// Rewrite the first `name` field with `value`, re-encoding its length.
/// Returns `None` when the field does not occur.
pub fn set_field(text: &str, name: &str, value: &str) -> Result<Option<String>, LotwError> {
    let Some(field) = scan_fields(text)?
        .into_iter()
        .find(|f| f.name.eq_ignore_ascii_case(name))
    else {
        return Ok(None);
    };

    let len = value.chars().count();
    let tag = match field.kind {
        Some(kind) => format!("<{}:{len}:{kind}>", field.name),
        None => format!("<{}:{len}>", field.name),
    };
    let mut out = String::with_capacity(text.len() + tag.len());
    out.push_str(&text[..field.start]);
    out.push_str(&tag);
    out.push_str(value);
    out.push_str(&text[field.end..]);
    Ok(Some(out))
}

/// Like [`set_field`], but adds the field on its own line just before
/// `<eoh>` when the header lacks it.
pub fn upsert_header_field(header: &str, name: &str, value: &str) -> Result<String, LotwError> {
    if let Some(updated) = set_field(header, name, value)? {
        return Ok(updated);
    }

    let encoded = encode_field(name, value);
    let Some(at) = find_ci(header, END_OF_HEADER) else {
        let sep = if header.is_empty() || header.ends_with('\n') {
            ""
        } else {
            "\n"
        };
        return Ok(format!("{header}{sep}{encoded}\n"));
    };

    let prefix = &header[..at];
    let sep = if prefix.is_empty() || prefix.ends_with('\n') {
        ""
    } else {
        "\n"
    };
    Ok(format!("{prefix}{sep}{encoded}\n{}", &header[at..]))
}

/// Parsed `APP_LoTW_NUMREC` of a header, if present and numeric.
pub fn header_record_count(header: &str) -> Result<Option<u64>, LotwError> {
    Ok(field_value(header, FIELD_NUMREC)?.and_then(|v| v.parse::<u64>().ok()))
}

/// Point the header's "Generated at" stamp at `stamp`. Handles both the
/// tagged form (`<TAG:n>Generated at ...`) and the plain text line LoTW
/// writes; a header with neither is returned unchanged.
pub fn refresh_generated_at(header: &str, stamp: &str) -> Result<String, LotwError> {
    let text = format!("{GENERATED_AT}{stamp}");

    if let Some(field) = scan_fields(header)?
        .into_iter()
        .find(|f| f.value.trim_start().starts_with(GENERATED_AT))
    {
        let tag = match field.kind {
            Some(kind) => format!("<{}:{}:{kind}>", field.name, text.chars().count()),
            None => format!("<{}:{}>", field.name, text.chars().count()),
        };
        return Ok(format!(
            "{}{tag}{text}{}",
            &header[..field.start],
            &header[field.end..]
        ));
    }

    let Some(at) = header.find(GENERATED_AT) else {
        return Ok(header.to_string());
    };
    let line_end = header[at..]
        .find(['\r', '\n', '<'])
        .map(|rel| at + rel)
        .unwrap_or(header.len());
    Ok(format!("{}{text}{}", &header[..at], &header[line_end..]))
}
