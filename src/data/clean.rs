use super::record::{RawRecord, Record};
use crate::error::{PipelineError, Result};
use std::collections::HashSet;

pub const BODY_COLUMN: &str = "body";
pub const LABEL_COLUMN: &str = "label";

/// Bodies with this many characters or fewer are dropped.
pub const MIN_BODY_CHARS: usize = 5;
/// Bodies are truncated to this many characters.
pub const MAX_BODY_CHARS: usize = 256;

/// Fails with every required column that is absent, sorted by name.
pub fn check_schema<S: AsRef<str>>(columns: &[S]) -> Result<()> {
    let mut missing: Vec<String> = [BODY_COLUMN, LABEL_COLUMN]
        .iter()
        .filter(|required| !columns.iter().any(|c| c.as_ref() == **required))
        .map(|required| required.to_string())
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    missing.sort();
    Err(PipelineError::MissingColumns(missing))
}

/// Collapses whitespace runs to one space and strips both ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First `max_chars` characters of `text`, respecting char boundaries.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn clean_body(body: &str) -> Option<String> {
    if body.chars().count() <= MIN_BODY_CHARS {
        return None;
    }

    let squashed = normalize_whitespace(body);
    // Truncation can cut right after a space.
    let body = truncate_chars(&squashed, MAX_BODY_CHARS).trim_end();

    if body.chars().count() <= MIN_BODY_CHARS {
        return None;
    }

    Some(body.to_string())
}

/// Cleans raw rows into the training dataset.
///
/// Null and short bodies are dropped, whitespace is normalized, bodies are truncated
/// to [`MAX_BODY_CHARS`] and duplicate bodies are removed keeping the first occurrence.
/// Running it again on its own output is a no-op.
pub fn clean_records<I>(rows: I) -> Vec<Record>
where
    I: IntoIterator<Item = RawRecord>,
{
    let mut seen = HashSet::new();

    rows.into_iter()
        .filter_map(|row| {
            let body = clean_body(row.body.as_deref()?)?;
            Some(Record {
                body,
                label: row.label,
            })
        })
        .filter(|record| seen.insert(record.body.clone()))
        .collect()
}
