//! Named value transforms for column specifications
//!
//! Pure functions from raw values to typed column values, referenced by the
//! table definitions in [`crate::tables`].

use crate::error::FieldError;
use crate::value::{RawValue, SqlValue};
use chrono::DateTime;

/// Epoch seconds to timestamp. Non-positive timestamps collapse to the
/// epoch sentinel rather than NULL, matching how the legacy accounting
/// table stored "no time" in non-nullable date columns.
pub fn epoch_to_timestamp(v: &RawValue) -> Result<SqlValue, FieldError> {
    let secs = as_epoch_secs(v)?;
    let secs = secs.max(0);
    DateTime::from_timestamp(secs, 0)
        .map(SqlValue::Timestamp)
        .ok_or_else(|| FieldError::invalid("timestamp", format!("out of range: {}", secs)))
}

/// Epoch seconds to timestamp, NULL for non-positive values. For nullable
/// date columns where "no time" really means no value.
pub fn epoch_to_timestamp_nullable(v: &RawValue) -> Result<SqlValue, FieldError> {
    let secs = as_epoch_secs(v)?;
    if secs <= 0 {
        return Ok(SqlValue::Null);
    }
    DateTime::from_timestamp(secs, 0)
        .map(SqlValue::Timestamp)
        .ok_or_else(|| FieldError::invalid("timestamp", format!("out of range: {}", secs)))
}

/// Join a multi-valued field into a single space-separated string (e.g. a
/// sequence of executing hosts).
pub fn join_list(v: &RawValue) -> Result<SqlValue, FieldError> {
    match v {
        RawValue::List(items) => Ok(SqlValue::Text(items.join(" "))),
        RawValue::Text(s) => Ok(SqlValue::Text(s.clone())),
        RawValue::Int(i) => Ok(SqlValue::Text(i.to_string())),
    }
}

/// Round a numeric value to two decimals (host factors).
pub fn round2(v: &RawValue) -> Result<SqlValue, FieldError> {
    let f = match v {
        RawValue::Int(i) => *i as f64,
        RawValue::Text(s) => s
            .parse::<f64>()
            .map_err(|e| FieldError::invalid("hostFactor", e.to_string()))?,
        RawValue::List(_) => {
            return Err(FieldError::invalid("hostFactor", "expected a number, got a list"))
        },
    };
    Ok(SqlValue::Double((f * 100.0).round() / 100.0))
}

fn as_epoch_secs(v: &RawValue) -> Result<i64, FieldError> {
    match v {
        RawValue::Int(i) => Ok(*i),
        RawValue::Text(s) => s
            .parse::<i64>()
            .map_err(|e| FieldError::invalid("timestamp", e.to_string())),
        RawValue::List(_) => Err(FieldError::invalid("timestamp", "expected seconds, got a list")),
    }
}
