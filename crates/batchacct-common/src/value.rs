//! Raw and typed value models
//!
//! A [`RawRecord`] is one parsed accounting line: field name to raw value.
//! The normalizer turns raw values into [`SqlValue`]s according to the
//! column specifications of a table schema.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;

/// Raw accounting field names that receive special parsing treatment.
pub const FIELD_TIMESTAMP: &str = "timestamp";
pub const FIELD_CE_ID: &str = "ceID";
pub const FIELD_LRMS_ID: &str = "lrmsID";
pub const FIELD_USER_FQAN: &str = "userFQAN";

/// Textual datetime format used in accounting files.
pub const ACCT_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// One raw accounting record: field name to raw value. Keys are unique;
/// produced fresh per parsed line and immutable once handed to the
/// normalizer.
pub type RawRecord = HashMap<String, RawValue>;

/// A raw field value prior to type coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Text(String),
    Int(i64),
    /// Multi-valued fields (e.g. FQAN lists, executing host lists).
    List(Vec<String>),
}

impl RawValue {
    pub fn text(s: impl Into<String>) -> Self {
        RawValue::Text(s.into())
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Text(s) => write!(f, "{}", s),
            RawValue::Int(i) => write!(f, "{}", i),
            RawValue::List(items) => write!(f, "{}", items.join(" ")),
        }
    }
}

/// A typed column value ready for parameter binding. `Null` values are
/// emitted as SQL literal `NULL`, never bound.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Int(i64),
    Double(f64),
    Timestamp(DateTime<Utc>),
    Null,
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Text(s) => write!(f, "{}", s),
            SqlValue::Int(i) => write!(f, "{}", i),
            SqlValue::Double(d) => write!(f, "{}", d),
            SqlValue::Timestamp(t) => write!(f, "{}", t.format(ACCT_DATETIME_FMT)),
            SqlValue::Null => write!(f, "NULL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_value_display() {
        assert_eq!(RawValue::text("abc").to_string(), "abc");
        assert_eq!(RawValue::Int(42).to_string(), "42");
        let l = RawValue::List(vec!["h1".into(), "h2".into()]);
        assert_eq!(l.to_string(), "h1 h2");
    }

    #[test]
    fn test_sql_value_null() {
        assert!(SqlValue::Null.is_null());
        assert!(!SqlValue::Int(0).is_null());
    }
}
