// ABOUTME: Transformer - per-field case normalization of diffed records
// ABOUTME: Pure copy-on-write: input records are borrowed, a new record is built per input

use crate::record::{Field, SessionRecord, TransformedRecord};

/// Fields upper-cased in full.
const UPPER_FIELDS: [Field; 2] = [Field::SessionId, Field::LoginTime];

/// Fields title-cased.
const TITLE_FIELDS: [Field; 4] = [
    Field::LogoutTime,
    Field::IpAddress,
    Field::UserName,
    Field::DeviceType,
];

/// Normalize each record and attach its provenance note.
///
/// One output per input, same order. Empty strings are treated like missing
/// values and become `None`. The key and recency pass through untouched.
pub fn transform_data(rows: &[SessionRecord]) -> Vec<TransformedRecord> {
    rows.iter().map(transform_record).collect()
}

pub fn transform_record(row: &SessionRecord) -> TransformedRecord {
    let mut record = row.clone();

    for field in UPPER_FIELDS {
        record.set_field(field, present(row.field(field)).map(str::to_uppercase));
    }
    for field in TITLE_FIELDS {
        record.set_field(field, present(row.field(field)).map(title_case));
    }

    TransformedRecord {
        transform_notes: transform_note(row.id),
        record,
    }
}

pub fn transform_note(id: i64) -> String {
    format!("Transformed row with ID={}", id)
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Title-case a string: a cased character following a cased character is
/// lower-cased, every other cased character is upper-cased. Digits and
/// punctuation start a new word, so `"o'neil"` becomes `"O'Neil"` and
/// `"10.0.0.1"` is unchanged.
pub fn title_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut previous_cased = false;

    for c in value.chars() {
        if previous_cased {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        previous_cased = is_cased(c);
    }

    out
}

fn is_cased(c: char) -> bool {
    c.is_lowercase() || c.is_uppercase()
}
