//! Wire format of inbound samples and outbound history payloads
//!
//! Inbound: `"21.5~C 40%"` → `[21.5, 40.0]`
//! Outbound: `"[[21.5, 40], [], [22.0, 41]]"`, oldest reduction first, or a
//! JSON object keyed by reduction timestamp when timestamps are requested.

use crate::aggregator_core::WindowHistory;
use chrono::SecondsFormat;
use serde_json::{Map, Value};

const UNIT_MARKER: &str = "~C ";
const FIELD_SEPARATOR: &str = "/";
const SAMPLE_ARITY: usize = 2;

/// Decimal places per field; fields past the end reuse the last entry.
pub const FIELD_PRECISION: [usize; 2] = [1, 0];

#[derive(Debug, Clone, PartialEq)]
pub enum PayloadError {
    FieldCount { payload: String, got: usize },
    NonNumeric { payload: String, field: String },
}

impl std::fmt::Display for PayloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadError::FieldCount { payload, got } => write!(
                f,
                "Payload '{}' has {} field(s), expected {}",
                payload, got, SAMPLE_ARITY
            ),
            PayloadError::NonNumeric { payload, field } => {
                write!(f, "Payload '{}' has non-numeric field '{}'", payload, field)
            }
        }
    }
}

impl std::error::Error for PayloadError {}

pub fn parse_sample(raw: &str) -> Result<Vec<f64>, PayloadError> {
    let normalized = raw
        .trim()
        .replace(UNIT_MARKER, FIELD_SEPARATOR)
        .replace('%', "");

    let fields: Vec<&str> = normalized.split(FIELD_SEPARATOR).collect();
    if fields.len() != SAMPLE_ARITY {
        return Err(PayloadError::FieldCount {
            payload: raw.to_string(),
            got: fields.len(),
        });
    }

    fields
        .iter()
        .map(|field| {
            field
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .ok_or_else(|| PayloadError::NonNumeric {
                    payload: raw.to_string(),
                    field: field.to_string(),
                })
        })
        .collect()
}

fn precision(idx: usize) -> usize {
    FIELD_PRECISION
        .get(idx)
        .or(FIELD_PRECISION.last())
        .copied()
        .unwrap_or(0)
}

fn round_to(value: f64, places: usize) -> f64 {
    let scale = 10f64.powi(places as i32);
    (value * scale).round() / scale
}

/// `[a, b]` with per-field precision, `[]` for the empty marker
pub fn format_values(values: Option<&[f64]>) -> String {
    match values {
        None => "[]".to_string(),
        Some(values) => {
            let fields: Vec<String> = values
                .iter()
                .enumerate()
                .map(|(idx, v)| format!("{:.*}", precision(idx), v))
                .collect();
            format!("[{}]", fields.join(", "))
        }
    }
}

pub fn format_history(history: &WindowHistory) -> String {
    let rows: Vec<String> = history
        .values()
        .map(|values| format_values(values.as_deref()))
        .collect();
    format!("[{}]", rows.join(", "))
}

/// Timestamped representation: `{"<rfc3339>": [a, b] | null, ...}`
pub fn format_history_with_timestamps(history: &WindowHistory) -> String {
    let mut entries = Map::new();
    for (timestamp, values) in history {
        let value = match values {
            None => Value::Null,
            Some(values) => Value::Array(
                values
                    .iter()
                    .enumerate()
                    .map(|(idx, v)| Value::from(round_to(*v, precision(idx))))
                    .collect(),
            ),
        };
        entries.insert(timestamp.to_rfc3339_opts(SecondsFormat::Millis, true), value);
    }
    Value::Object(entries).to_string()
}
