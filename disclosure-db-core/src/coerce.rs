//! Centralized type coercion for submission cells.
//!
//! This module is the authoritative mapping between incoming JSON values and
//! typed [`Cell`]s, driven by the declared [`AttributeType`]. It is used by
//! the flattening engine (write path); the read path never coerces — cells
//! come back from the store already typed.
//!
//! ## Rules
//!
//! - A null-sentinel string (`-`, `—`, `N/A`) becomes a NULL cell carrying
//!   the matching state.
//! - An explicit JSON `null` becomes a NULL cell with the `LongDash` state:
//!   "intentionally left blank" is distinguishable from "never collected"
//!   (a column simply absent from the row).
//! - Numeric strings are accepted for int/float fields; everything else is
//!   strict and fails with a [`CoercionError`] naming the offending value.

use crate::schema::AttributeType;
use crate::value::{Cell, CellValue, NullState};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;

/// Error returned when coercion fails
#[derive(Debug, Clone)]
pub struct CoercionError {
    /// Human-readable error message
    pub message: String,
}

impl CoercionError {
    /// Create a new coercion error
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }

    /// Create an incompatible type error
    pub fn incompatible(value: &JsonValue, target: AttributeType) -> Self {
        Self::new(format!("cannot coerce {value} to {target}"))
    }
}

impl std::fmt::Display for CoercionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CoercionError {}

/// Result type for coercion operations
pub type CoercionResult<T> = Result<T, CoercionError>;

/// Coerce an incoming JSON value into a typed cell for the given attribute
/// type.
///
/// For Form/FormOrNull/Multiple fields this expects the allocated sub-form
/// id (the flattener stores the link, recursion happens elsewhere).
pub fn cell_from_json(ty: AttributeType, value: &JsonValue) -> CoercionResult<Cell> {
    if let Some(state) = NullState::from_json(value) {
        return Ok(Cell::sentinel(state));
    }
    if value.is_null() {
        return Ok(Cell::sentinel(NullState::LongDash));
    }
    let cell_value = match ty {
        AttributeType::Bool => CellValue::Bool(
            value
                .as_bool()
                .ok_or_else(|| CoercionError::incompatible(value, ty))?,
        ),
        AttributeType::Int | AttributeType::Single | AttributeType::File => {
            CellValue::Int(json_to_i64(value).ok_or_else(|| CoercionError::incompatible(value, ty))?)
        }
        AttributeType::Float => CellValue::Float(
            json_to_f64(value).ok_or_else(|| CoercionError::incompatible(value, ty))?,
        ),
        AttributeType::Text | AttributeType::Label => CellValue::Text(json_to_text(value)),
        AttributeType::Datetime => CellValue::Timestamp(
            value
                .as_str()
                .and_then(parse_datetime)
                .ok_or_else(|| CoercionError::incompatible(value, ty))?,
        ),
        AttributeType::Form | AttributeType::FormOrNull | AttributeType::Multiple => {
            CellValue::Int(json_to_i64(value).ok_or_else(|| CoercionError::incompatible(value, ty))?)
        }
    };
    Ok(Cell::new(cell_value))
}

/// Parse a datetime string: RFC 3339 first, falling back to a naive
/// `YYYY-MM-DDTHH:MM:SS[.f]` (trailing `Z` tolerated) interpreted as UTC.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let trimmed = s.strip_suffix('Z').unwrap_or(s);
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(naive.and_utc());
        }
        if format == "%Y-%m-%d" {
            if let Ok(date) = chrono::NaiveDate::parse_from_str(trimmed, format) {
                return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
            }
        }
    }
    None
}

fn json_to_i64(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_to_f64(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_to_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}
