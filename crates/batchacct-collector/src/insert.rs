//! Batch inserter
//!
//! Normalizes a batch of raw records against a table schema, executes
//! parameterized inserts, classifies failures, commits once per batch and
//! keeps the liveness heartbeat. A single bad record never aborts the
//! batch.
//!
//! Inserts run inside one transaction with a per-record savepoint, so a
//! failed insert (typically a duplicate replayed after a restart) rolls
//! back just that record while the rest of the batch proceeds to the
//! commit.

use batchacct_common::db::execute_bound;
use batchacct_common::error::{classify_db_error, FieldError, InsertFailure};
use batchacct_common::normalize::evaluate_row;
use batchacct_common::schema::TableSchema;
use batchacct_common::stmt::build_insert;
use batchacct_common::value::RawRecord;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tracing::{error, info, warn};

/// Default minutes between liveness heartbeats.
pub const DEFAULT_HEARTBEAT_MINS: i64 = 180;

/// Default duplicate-suppression window: one warning per this many
/// consecutive duplicates.
pub const DEFAULT_LOG_BUNCH: u64 = 10_000;

/// Per watched table+file insert counters. Threaded by value through each
/// batch; no hidden shared state.
#[derive(Debug, Clone, Copy)]
pub struct InsertStats {
    /// Successful inserts since the last heartbeat.
    pub inserted: u64,
    /// Errors in the current duplicate-suppression window.
    pub errors: u64,
    /// When the last heartbeat was emitted.
    pub heartbeat: DateTime<Utc>,
}

impl InsertStats {
    pub fn new() -> Self {
        Self { inserted: 0, errors: 0, heartbeat: Utc::now() }
    }
}

impl Default for InsertStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Batch insert tuning.
#[derive(Debug, Clone, Copy)]
pub struct InsertOptions {
    pub heartbeat_period: Duration,
    pub log_bunch: u64,
    /// Log what would happen without touching the database.
    pub dry_run: bool,
}

impl Default for InsertOptions {
    fn default() -> Self {
        Self {
            heartbeat_period: Duration::minutes(DEFAULT_HEARTBEAT_MINS),
            log_bunch: DEFAULT_LOG_BUNCH,
            dry_run: false,
        }
    }
}

/// Insert a batch of raw records into `schema`'s table.
///
/// Failure handling per record:
/// - duplicate key: counted, warned once per `log_bunch` occurrences
/// - missing source field: logged and skipped, not counted into the
///   duplicate window (it is an unflushed record, not a failure)
/// - any other database error: logged individually, batch continues
///
/// The post-batch commit failure is logged but not retried; the records
/// will be replayed on the next pass and land as duplicates.
pub async fn insert_batch(
    pool: &PgPool,
    schema: &TableSchema,
    records: &[RawRecord],
    mut stats: InsertStats,
    opts: &InsertOptions,
) -> InsertStats {
    if records.is_empty() {
        return stats;
    }
    if opts.dry_run {
        info!(count = records.len(), table = %schema.name, "Would normally insert records");
        return stats;
    }

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            error!(error = %e, "Couldn't begin insert transaction");
            return stats;
        },
    };

    for record in records {
        let row = match evaluate_row(schema, record) {
            Ok(row) => row,
            Err(FieldError::Missing { field }) => {
                warn!(field = %field, "Probably unflushed record, skipping");
                continue;
            },
            Err(e) => {
                error!(error = %e, "Couldn't normalize record");
                stats.errors += 1;
                continue;
            },
        };

        if let Err(e) = sqlx::query("SAVEPOINT rec").execute(&mut *tx).await {
            error!(error = %e, "Couldn't set savepoint, aborting batch");
            break;
        }

        let stmt = build_insert(schema, &row);
        match execute_bound(&mut *tx, &stmt).await {
            Ok(_) => {
                stats.inserted += 1;
            },
            Err(e) => {
                if let Err(rb) = sqlx::query("ROLLBACK TO SAVEPOINT rec").execute(&mut *tx).await {
                    error!(error = %rb, "Couldn't roll back to savepoint, aborting batch");
                    break;
                }
                match classify_db_error(e) {
                    InsertFailure::Duplicate(e) => {
                        if note_duplicate(&mut stats, opts.log_bunch) {
                            warn!(error = %e, "Couldn't insert record");
                            warn!("Next {} duplicates won't be reported", opts.log_bunch);
                        }
                    },
                    InsertFailure::Database(e) => {
                        error!(error = %e, "Couldn't insert record");
                        stats.errors += 1;
                    },
                }
            },
        }
    }

    if let Err(e) = tx.commit().await {
        error!(error = %e, "Couldn't commit");
    }

    if let Some(count) = maybe_heartbeat(&mut stats, opts.heartbeat_period, Utc::now()) {
        info!(
            inserted = count,
            period_mins = opts.heartbeat_period.num_minutes(),
            table = %schema.name,
            "Inserted records since last heartbeat"
        );
    }

    stats
}

/// Record a duplicate into the suppression window. Returns whether this
/// occurrence should be logged (first of each window).
fn note_duplicate(stats: &mut InsertStats, bunch: u64) -> bool {
    let should_log = stats.errors % bunch == 0;
    if should_log {
        stats.errors = 0;
    }
    stats.errors += 1;
    should_log
}

/// Reset the success counter and timestamp when the heartbeat period has
/// elapsed, returning the count to report. The error counter is
/// independent of the heartbeat.
fn maybe_heartbeat(
    stats: &mut InsertStats,
    period: Duration,
    now: DateTime<Utc>,
) -> Option<u64> {
    if now - stats.heartbeat > period {
        let count = stats.inserted;
        stats.inserted = 0;
        stats.heartbeat = now;
        Some(count)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_logged_once_per_bunch() {
        let mut stats = InsertStats::new();
        let bunch = 5;

        let logged: Vec<bool> = (0..12).map(|_| note_duplicate(&mut stats, bunch)).collect();
        let count = logged.iter().filter(|l| **l).count();
        // 12 consecutive duplicates with a window of 5: occurrences 1, 6
        // and 11 are reported.
        assert_eq!(count, 3);
        assert!(logged[0] && logged[5] && logged[10]);
    }

    #[test]
    fn test_heartbeat_resets_success_counter_only() {
        let mut stats = InsertStats { inserted: 7, errors: 3, heartbeat: Utc::now() };
        let period = Duration::minutes(30);

        // Not yet due.
        let at_heartbeat = stats.heartbeat;
        assert_eq!(maybe_heartbeat(&mut stats, period, at_heartbeat), None);
        assert_eq!(stats.inserted, 7);

        // Due: reports and resets inserted, leaves errors alone.
        let later = stats.heartbeat + Duration::minutes(31);
        assert_eq!(maybe_heartbeat(&mut stats, period, later), Some(7));
        assert_eq!(stats.inserted, 0);
        assert_eq!(stats.errors, 3);
        assert_eq!(stats.heartbeat, later);
    }
}
