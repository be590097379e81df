//! Record normalizer
//!
//! Evaluates raw records against table column specifications, producing
//! typed rows with per-column NULL handling.
//!
//! The empty-string-becomes-NULL policy is deliberate: the legacy backing
//! store conflated empty strings and NULL, and downstream queries rely on
//! that behavior.

use crate::error::FieldError;
use crate::schema::{BaseType, ColumnSpec, TableSchema};
use crate::value::{RawRecord, RawValue, SqlValue};

/// Evaluate one column specification against a raw record.
///
/// Resolution order: constant default (never reads the record), else the
/// source field (missing field fails the whole record), then the transform
/// or a direct coercion, then bounded-text truncation, then the
/// empty-string-to-NULL policy.
///
/// Evaluation is idempotent: the same `(spec, record)` pair always yields
/// the same value.
pub fn evaluate(spec: &ColumnSpec, record: &RawRecord) -> Result<SqlValue, FieldError> {
    let raw = match &spec.default {
        Some(v) => v,
        None => record
            .get(spec.source())
            .ok_or_else(|| FieldError::missing(spec.source()))?,
    };

    let mut value = match spec.transform {
        Some(f) => f(raw)?,
        None => coerce(spec, raw)?,
    };

    if let SqlValue::Text(ref mut s) = value {
        if spec.ty.base == BaseType::Text {
            if let Some(max) = spec.ty.max_len {
                if s.chars().count() > max {
                    *s = s.chars().take(max).collect();
                }
            }
        }
        if s.is_empty() {
            value = SqlValue::Null;
        }
    }

    Ok(value)
}

/// Evaluate every column of a schema in declaration order. Propagates the
/// first error encountered, so a record missing a trailing field is
/// skipped as a whole.
pub fn evaluate_row(schema: &TableSchema, record: &RawRecord) -> Result<Vec<SqlValue>, FieldError> {
    schema.columns.iter().map(|c| evaluate(c, record)).collect()
}

/// Direct raw-to-typed coercion for columns without a transform.
fn coerce(spec: &ColumnSpec, raw: &RawValue) -> Result<SqlValue, FieldError> {
    let field = spec.source();
    match (spec.ty.base, raw) {
        (BaseType::Text, RawValue::Text(s)) => Ok(SqlValue::Text(s.clone())),
        (BaseType::Text, RawValue::Int(i)) => Ok(SqlValue::Text(i.to_string())),
        (BaseType::BigInt, RawValue::Int(i)) => Ok(SqlValue::Int(*i)),
        (BaseType::BigInt, RawValue::Text(s)) => s
            .parse::<i64>()
            .map(SqlValue::Int)
            .map_err(|e| FieldError::invalid(field, e.to_string())),
        (BaseType::Double, RawValue::Int(i)) => Ok(SqlValue::Double(*i as f64)),
        (BaseType::Double, RawValue::Text(s)) => s
            .parse::<f64>()
            .map(SqlValue::Double)
            .map_err(|e| FieldError::invalid(field, e.to_string())),
        (BaseType::Timestamp, _) => {
            Err(FieldError::invalid(field, "timestamp columns require a transform"))
        },
        (_, RawValue::List(_)) => {
            Err(FieldError::invalid(field, "multi-valued field needs a joining transform"))
        },
    }
}
