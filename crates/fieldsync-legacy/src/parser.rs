//! Line parser for legacy configuration files.
//!
//! Each non-blank line is `KEY value` or `KEY=value`. Lines starting with
//! `#` are comments. Values that read as numbers become JSON numbers;
//! everything else, including zero-padded serial numbers, stays text.

use serde_json::{Number, Value};
use tracing::debug;

use fieldsync_core::FieldMap;

use crate::error::LegacyError;

/// Parse one value.
pub fn parse_value(raw: &str) -> Value {
    let raw = raw.trim();
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        return Value::String(raw[1..raw.len() - 1].to_string());
    }
    if is_zero_padded(raw) {
        return Value::String(raw.to_string());
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    if let Some(n) = raw.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(n);
    }
    Value::String(raw.to_string())
}

fn is_zero_padded(raw: &str) -> bool {
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    let mut chars = digits.chars();
    chars.next() == Some('0') && chars.next().is_some_and(|c| c.is_ascii_digit())
}

/// Split a line into key and value. `None` for blank and comment lines.
fn split_line(line: &str) -> Option<Result<(&str, &str), String>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let end = line
        .find(|c: char| c == '=' || c.is_whitespace())
        .unwrap_or(line.len());
    let (key, rest) = line.split_at(end);
    if key.is_empty() {
        return Some(Err("missing field name".to_string()));
    }
    let rest = rest.trim_start();
    let value = rest.strip_prefix('=').unwrap_or(rest).trim();
    Some(Ok((key, value)))
}

/// Parse the text of one legacy file into its fields.
///
/// A key given more than once keeps its last value.
pub fn parse_record(text: &str) -> Result<FieldMap, LegacyError> {
    let mut fields = FieldMap::new();
    for (index, line) in text.lines().enumerate() {
        let Some(parsed) = split_line(line) else {
            continue;
        };
        let (key, value) = parsed.map_err(|reason| LegacyError::Syntax {
            line: index + 1,
            reason,
        })?;
        if fields.insert(key.to_string(), parse_value(value)).is_some() {
            debug!("Field {} repeated on line {}", key, index + 1);
        }
    }
    Ok(fields)
}
