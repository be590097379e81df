//! Batch Accounting Publisher
//!
//! Joins job information from the local batch table and the CE table and
//! publishes accounting messages for the events not yet marked as
//! published. One invocation is one publish run; scheduling is left to
//! the site (cron or a systemd timer).

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod error;
pub mod fields;
pub mod join;
pub mod sink;

pub use config::{load_vo_groups, PublisherConfig, DEFAULT_BUNCH};
pub use error::PublishError;
pub use fields::{apel_fields, ColumnRef, Derive, DeriveContext, FieldSet, PublishField, NONLCG};
pub use join::{PublishEngine, PublishSummary, MESSAGE_HEADER};
pub use sink::{FileDropSink, MessageSink, SinkError};
