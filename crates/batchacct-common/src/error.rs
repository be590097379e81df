//! Error types for the batch accounting pipeline
//!
//! The taxonomy mirrors the recovery action a caller should take:
//!
//! - [`SchemaError`] is fatal at startup; a registry that fails to build
//!   means the configuration is wrong and the process must not run.
//! - [`FieldError`] is record-local; the offending record is skipped and
//!   logged, the batch continues.
//! - [`InsertFailure`] classifies database errors during inserts so the
//!   batch inserter can tell a duplicate key (expected under at-least-once
//!   replay, log-suppressed) from a genuine failure (logged individually).

use thiserror::Error;

/// Schema construction errors. Always fatal at startup.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("duplicate column '{column}' in table '{table}'")]
    DuplicateColumn { table: String, column: String },

    #[error("primary key column '{column}' not in column list of table '{table}'")]
    UnknownPrimaryKey { table: String, column: String },

    #[error("index column '{column}' not in column list of table '{table}'")]
    UnknownIndexColumn { table: String, column: String },

    #[error("column '{column}': unparseable type descriptor '{descriptor}'")]
    BadTypeDescriptor { column: String, descriptor: String },

    #[error("no such table template: {0}")]
    UnknownTable(String),
}

/// Per-column evaluation errors. Record-local: the caller skips the whole
/// record, never the batch.
#[derive(Error, Debug)]
pub enum FieldError {
    /// The raw record has no value for the column's source field. Expected
    /// occasionally when the writer has not yet flushed a complete record.
    #[error("missing field '{field}' (probably an unflushed record)")]
    Missing { field: String },

    /// The raw value could not be coerced or transformed to the column type.
    #[error("invalid value for field '{field}': {reason}")]
    Invalid { field: String, reason: String },
}

impl FieldError {
    pub fn missing(field: impl Into<String>) -> Self {
        Self::Missing { field: field.into() }
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid { field: field.into(), reason: reason.into() }
    }
}

/// Classified outcome of a failed INSERT, so the batch inserter can
/// pattern-match the recovery action instead of string-matching error text.
#[derive(Error, Debug)]
pub enum InsertFailure {
    /// Primary-key/unique violation: the record was already inserted on a
    /// previous replay. Counted and log-suppressed in bunches.
    #[error("duplicate record: {0}")]
    Duplicate(sqlx::Error),

    /// Any other database error: logged individually, the batch continues.
    #[error("couldn't insert record: {0}")]
    Database(sqlx::Error),
}

/// Classify a database error from an INSERT attempt.
pub fn classify_db_error(err: sqlx::Error) -> InsertFailure {
    let is_unique = err
        .as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false);
    if is_unique {
        InsertFailure::Duplicate(err)
    } else {
        InsertFailure::Database(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_error_display() {
        let e = FieldError::missing("lrmsID");
        assert!(e.to_string().contains("lrmsID"));
        assert!(e.to_string().contains("unflushed"));

        let e = FieldError::invalid("timestamp", "not a datetime");
        assert!(e.to_string().contains("timestamp"));
    }

    #[test]
    fn test_classify_non_database_error() {
        // A pool timeout has no database error payload and must never be
        // mistaken for a duplicate.
        let f = classify_db_error(sqlx::Error::PoolTimedOut);
        assert!(matches!(f, InsertFailure::Database(_)));
    }
}
