//! Join & publish engine
//!
//! Outer-joins the local batch table against the CE table, renders the
//! joined rows into accounting messages, hands each full bunch to the
//! sink and marks the bunch's local rows as published. A run moves
//! through querying, emitting, marking and a final commit; any database,
//! derivation or sink failure aborts the run without marking the
//! in-flight bunch, so those rows are retried on the next run.
//!
//! Rows are marked only after their message reached the sink. A crash
//! between the send and the commit re-sends them next run; consumers must
//! tolerate duplicate messages.

use crate::error::PublishError;
use crate::fields::{DeriveContext, FieldSet, SelectColumn};
use crate::sink::MessageSink;
use async_trait::async_trait;
use batchacct_common::schema::BaseType;
use batchacct_common::stmt::{build_join_select, build_mark_published};
use batchacct_common::tables::{CE_TABLE, LOCAL_TABLE};
use batchacct_common::value::SqlValue;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::info;

/// First line of every outbound message.
pub const MESSAGE_HEADER: &str = "APEL-individual-job-message: v1.1\n";

/// Line terminating each job record within a message.
const RECORD_TERMINATOR: &str = "%\n";

/// What a publish run did: how many job events went out and the event-time
/// range they covered.
#[derive(Debug, Default, Clone, Copy)]
pub struct PublishSummary {
    pub events: u64,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
}

/// Flags a bunch of local job rows as published. The engine backs this
/// with an UPDATE on the run's transaction; the seam exists so the
/// emit loop's marking discipline is checkable without a database.
#[async_trait]
trait PublishMarker: Send {
    async fn mark(&mut self, job_ids: &[i64]) -> Result<(), PublishError>;
}

/// Marks rows with one shared publication instant captured at run start.
/// The marks only become visible at the run's commit.
struct TxMarker<'a, 'c> {
    tx: &'a mut Transaction<'c, Postgres>,
    published: DateTime<Utc>,
}

#[async_trait]
impl PublishMarker for TxMarker<'_, '_> {
    async fn mark(&mut self, job_ids: &[i64]) -> Result<(), PublishError> {
        let sql = build_mark_published(LOCAL_TABLE);
        sqlx::query(&sql)
            .bind(self.published)
            .bind(job_ids.to_vec())
            .execute(&mut **self.tx)
            .await?;
        Ok(())
    }
}

/// Accumulates rendered records and their local job identifiers until a
/// bunch is full.
struct MessageBuffer {
    msg: String,
    pubs: Vec<i64>,
    bunch: usize,
}

impl MessageBuffer {
    fn new(bunch: usize) -> Self {
        Self { msg: MESSAGE_HEADER.to_string(), pubs: Vec::with_capacity(bunch), bunch }
    }

    /// The message under construction; `render` appends to it.
    fn body(&mut self) -> &mut String {
        &mut self.msg
    }

    /// Terminate the current record and note its job identifier. Returns
    /// the finished batch when the bunch is full.
    fn seal_record(&mut self, job_id: i64) -> Option<(String, Vec<i64>)> {
        self.msg.push_str(RECORD_TERMINATOR);
        self.pubs.push(job_id);
        if self.pubs.len() == self.bunch {
            Some(self.take())
        } else {
            None
        }
    }

    /// Whatever is left after the last full bunch.
    fn remainder(&mut self) -> Option<(String, Vec<i64>)> {
        if self.pubs.is_empty() {
            None
        } else {
            Some(self.take())
        }
    }

    fn take(&mut self) -> (String, Vec<i64>) {
        let msg = std::mem::replace(&mut self.msg, MESSAGE_HEADER.to_string());
        let pubs = std::mem::take(&mut self.pubs);
        (msg, pubs)
    }
}

/// Eligibility conditions of the join query, with `$1` and `$2` bound to
/// the epoch sentinel.
fn join_conditions() -> Vec<String> {
    vec![
        // Rows already marked published never re-enter a run.
        format!("{}.published = $1", LOCAL_TABLE),
        // Grid queue entries without a resolved gateway identity are not
        // publishable yet; plain local jobs always are.
        format!("({}.lrms_id IS NOT NULL OR {}.queue NOT LIKE 'grid_%')", CE_TABLE, LOCAL_TABLE),
        // Placeholder start times and unset CPU times mean the event is
        // not billable.
        format!("{}.start_time <> $2", LOCAL_TABLE),
        format!("{}.ru_stime <> -1 AND {}.ru_utime <> -1", LOCAL_TABLE, LOCAL_TABLE),
    ]
}

/// One-shot publish run over the accounting database.
pub struct PublishEngine {
    pool: PgPool,
    fields: FieldSet,
    ctx: DeriveContext,
    bunch: usize,
}

impl PublishEngine {
    pub fn new(pool: PgPool, fields: FieldSet, ctx: DeriveContext, bunch: usize) -> Self {
        Self { pool, fields, ctx, bunch }
    }

    /// Execute one publish run against `sink`.
    pub async fn run(&mut self, sink: &mut dyn MessageSink) -> Result<PublishSummary, PublishError> {
        // One shared publication instant for every row this run marks.
        let now = Utc::now();
        let epoch: DateTime<Utc> = DateTime::UNIX_EPOCH;

        let select_cols: Vec<String> =
            self.fields.select_columns().iter().map(|c| c.qualified.clone()).collect();
        let sql = build_join_select(
            &select_cols,
            LOCAL_TABLE,
            CE_TABLE,
            "job_id",
            "lrms_id",
            &join_conditions(),
        );

        info!(local = LOCAL_TABLE, ce = CE_TABLE, "Joining local and CE job event records");
        let pg_rows = sqlx::query(&sql).bind(epoch).bind(epoch).fetch_all(&self.pool).await?;

        if pg_rows.is_empty() {
            info!("Nothing to publish");
            return Ok(PublishSummary::default());
        }

        let mut rows = Vec::with_capacity(pg_rows.len());
        for row in &pg_rows {
            rows.push(decode_row(row, self.fields.select_columns())?);
        }

        let mut tx = self.pool.begin().await?;
        let mut marker = TxMarker { tx: &mut tx, published: now };
        let summary = emit(&self.fields, &mut self.ctx, &rows, self.bunch, sink, &mut marker).await?;
        tx.commit().await?;

        match (summary.first, summary.last) {
            (Some(first), Some(last)) => {
                info!(
                    events = summary.events,
                    first = %first,
                    last = %last,
                    "Sent accounting messages"
                );
            },
            _ => info!(events = summary.events, "Sent accounting messages"),
        }
        Ok(summary)
    }
}

/// The emit loop: render each joined row, flush a full bunch to the sink,
/// then mark just that bunch. Any failure aborts before the in-flight
/// bunch is marked.
async fn emit(
    fields: &FieldSet,
    ctx: &mut DeriveContext,
    rows: &[Vec<SqlValue>],
    bunch: usize,
    sink: &mut dyn MessageSink,
    marker: &mut dyn PublishMarker,
) -> Result<PublishSummary, PublishError> {
    let mut buffer = MessageBuffer::new(bunch);
    let mut summary = PublishSummary::default();

    for values in rows {
        fields.render(ctx, values, buffer.body())?;

        let job_id = match values.get(fields.job_id_idx()) {
            Some(SqlValue::Int(id)) => *id,
            _ => {
                return Err(PublishError::output_field(
                    "LocalJobId",
                    "joined row carries no local job identifier",
                ))
            },
        };
        if let Some(SqlValue::Timestamp(t)) = values.get(fields.event_time_idx()) {
            summary.first.get_or_insert(*t);
            summary.last = Some(*t);
        }
        summary.events += 1;

        if let Some((msg, pubs)) = buffer.seal_record(job_id) {
            flush(sink, marker, &msg, &pubs).await?;
        }
    }

    if let Some((msg, pubs)) = buffer.remainder() {
        flush(sink, marker, &msg, &pubs).await?;
    }

    Ok(summary)
}

/// Send one finished batch, then mark its rows. The order is the
/// at-least-once guarantee: a row is marked only after its message
/// reached the sink.
async fn flush(
    sink: &mut dyn MessageSink,
    marker: &mut dyn PublishMarker,
    msg: &str,
    pubs: &[i64],
) -> Result<(), PublishError> {
    info!(events = pubs.len(), "Sending accounting message");
    sink.send(msg).await?;
    marker.mark(pubs).await
}

/// Decode one joined row into the value model, by the select columns'
/// declared types. Every column can come back NULL from the outer join.
fn decode_row(row: &PgRow, cols: &[SelectColumn]) -> Result<Vec<SqlValue>, PublishError> {
    let mut values = Vec::with_capacity(cols.len());
    for (i, col) in cols.iter().enumerate() {
        let value = match col.base {
            BaseType::Text => row.try_get::<Option<String>, _>(i)?.map(SqlValue::Text),
            BaseType::BigInt => row.try_get::<Option<i64>, _>(i)?.map(SqlValue::Int),
            BaseType::Double => row.try_get::<Option<f64>, _>(i)?.map(SqlValue::Double),
            BaseType::Timestamp => {
                row.try_get::<Option<DateTime<Utc>>, _>(i)?.map(SqlValue::Timestamp)
            },
        };
        values.push(value.unwrap_or(SqlValue::Null));
    }
    Ok(values)
}
