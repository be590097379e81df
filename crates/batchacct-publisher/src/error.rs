//! Publisher error types
//!
//! Everything here is batch-fatal: a publish run aborts without marking
//! the in-flight sub-batch, leaving its rows eligible for the next
//! scheduled run. There is no record-local recovery during publishing;
//! silently dropping billing data would be worse than retrying it.

use crate::sink::SinkError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PublishError {
    /// A derivation had no usable value for a field, or a field was
    /// configured with neither a column source nor a constant.
    #[error("no value for field '{field}': {reason}")]
    OutputField { field: String, reason: String },

    /// Database error during the join query or the publish marking.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The sink could not take the message batch.
    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("bad publisher configuration: {0}")]
    Config(String),
}

impl PublishError {
    pub fn output_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::OutputField { field: field.into(), reason: reason.into() }
    }
}
