//! Batch Accounting Collector
//!
//! Notices accounting event records as they are appended to growing log
//! files, parses them, normalizes them against the table registry and
//! sends them to the accounting database.
//!
//! The processing model is single-threaded and event-driven: a watcher
//! feeds create/modify/rename notifications into a channel, and one task
//! drives a full parse-normalize-insert pass per notification before
//! waiting for the next. Replays after a restart surface as duplicate-key
//! inserts, which are classified and log-suppressed rather than treated as
//! failures.

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod insert;
pub mod parser;
pub mod watcher;

pub use insert::{insert_batch, InsertOptions, InsertStats};
pub use parser::{parse_line, parse_records, ParseError, WatchState};
pub use watcher::{latest_file, watch_dir, Collector, FsEvent};
