//! JSON extraction from free-form model output.
//!
//! Model responses are untrusted text that is *supposed* to contain a JSON
//! object. Extraction walks a short ladder:
//!
//! 1. parse the whole (trimmed) text;
//! 2. locate the smallest brace-matched object that encloses the quoted
//!    field name and parse that, with string- and escape-aware matching so
//!    braces inside string values (CSS, templates) don't confuse it;
//! 3. repair the text (strip code fences, normalize typographic quotes,
//!    drop trailing commas) and retry 1 and 2.
//!
//! The returned object always holds the required field at top level.

use serde_json::{Map, Value};
use thiserror::Error;

const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("could not extract `{field}` from model output: {reason}")]
pub struct ExtractionFailure {
    pub field: String,
    pub reason: String,
    /// Leading slice of the raw output, for logs.
    pub preview: String,
}

pub fn extract(raw: &str, required_field: &str) -> Result<Map<String, Value>, ExtractionFailure> {
    if raw.trim().is_empty() {
        return Err(failure(raw, required_field, "output is empty"));
    }
    if let Some(obj) = locate(raw, required_field) {
        return Ok(obj);
    }
    let repaired = repair(raw);
    if repaired != raw {
        if let Some(obj) = locate(&repaired, required_field) {
            return Ok(obj);
        }
    }
    let reason = if raw.contains(&format!("\"{}\"", required_field)) {
        "field present but no parseable enclosing object"
    } else {
        "field not found"
    };
    Err(failure(raw, required_field, reason))
}

fn failure(raw: &str, field: &str, reason: &str) -> ExtractionFailure {
    ExtractionFailure {
        field: field.to_string(),
        reason: reason.to_string(),
        preview: raw.chars().take(PREVIEW_CHARS).collect(),
    }
}

fn locate(text: &str, field: &str) -> Option<Map<String, Value>> {
    parse_with_field(text.trim(), field).or_else(|| enclosing_object(text, field))
}

fn parse_with_field(candidate: &str, field: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(candidate).ok()? {
        Value::Object(map) if map.contains_key(field) => Some(map),
        _ => None,
    }
}

/// Smallest balanced `{...}` around an occurrence of `"field"` that parses
/// and carries the field at top level.
fn enclosing_object(text: &str, field: &str) -> Option<Map<String, Value>> {
    let needle = format!("\"{}\"", field);
    let bytes = text.as_bytes();
    for (key_pos, _) in text.match_indices(&needle) {
        for start in (0..key_pos).rev().filter(|i| bytes[*i] == b'{') {
            let Some(end) = matching_brace(bytes, start) else {
                continue;
            };
            if end < key_pos {
                continue;
            }
            if let Some(map) = parse_with_field(&text[start..=end], field) {
                return Some(map);
            }
        }
    }
    None
}

/// Index of the `}` closing the `{` at `start`, skipping string contents.
fn matching_brace(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Apply the cheap textual fixes models most often need.
pub fn repair(raw: &str) -> String {
    let unfenced: String = raw
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n");
    let quoted: String = unfenced
        .chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        })
        .collect();
    strip_trailing_commas(&quoted)
}

fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            out.push(c);
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Fetch a required string field.
pub fn string_field(obj: &Map<String, Value>, field: &str) -> Option<String> {
    obj.get(field).and_then(|v| v.as_str()).map(str::to_string)
}
