//! Batch Accounting Common Library
//!
//! Shared types, schema registry, and error handling for the batch
//! accounting pipeline.
//!
//! # Overview
//!
//! This crate provides the functionality shared by the collector and
//! publisher daemons:
//!
//! - **Error Handling**: the error taxonomy for schema construction,
//!   per-record normalization, and insert classification
//! - **Schema Registry**: declarative column mappings from raw accounting
//!   fields to typed table columns
//! - **Record Normalizer**: evaluation of a raw record against a table
//!   schema, producing a typed, NULL-aware row
//! - **Statement Builder**: parameterized INSERT/UPDATE/SELECT assembly so
//!   no caller ever interpolates row values into SQL
//! - **DDL Generation**: CREATE TABLE/INDEX statement text for the fixed
//!   table shapes
//!
//! # Example
//!
//! ```no_run
//! use batchacct_common::schema::TableRegistry;
//! use batchacct_common::normalize::evaluate_row;
//! use batchacct_common::value::RawRecord;
//!
//! fn normalize(rec: &RawRecord) -> anyhow::Result<()> {
//!     let registry = TableRegistry::standard()?;
//!     let schema = registry.get("ce_jobs")?;
//!     let row = evaluate_row(schema, rec)?;
//!     println!("{} columns", row.len());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod db;
pub mod ddl;
pub mod error;
pub mod logging;
pub mod normalize;
pub mod schema;
pub mod stmt;
pub mod tables;
pub mod transforms;
pub mod value;

// Re-export commonly used types
pub use error::{FieldError, InsertFailure, SchemaError};
pub use schema::{ColumnSpec, SqlType, TableRegistry, TableSchema};
pub use value::{RawRecord, RawValue, SqlValue};
