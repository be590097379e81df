//! Fixed table definitions
//!
//! The organization's standard table shapes: the local batch event table
//! fed from the scheduler's accounting log, and the CE table fed from the
//! gateway's accounting files. These are the only tables the pipeline
//! supports; this is deliberately not a general-purpose ORM.

use crate::error::SchemaError;
use crate::schema::{ColumnSpec, TableSchema};
use crate::transforms::{epoch_to_timestamp, epoch_to_timestamp_nullable, join_list, round2};
use crate::value::RawValue;

/// Name of the local batch event table.
pub const LOCAL_TABLE: &str = "local_jobs";

/// Name of the CE (compute element) table.
pub const CE_TABLE: &str = "ce_jobs";

/// Local batch event table: one row per job-finish event from the
/// scheduler's accounting log. Column order defines insert parameter
/// positions.
pub fn local_jobs() -> Result<TableSchema, SchemaError> {
    let columns = vec![
        ColumnSpec::new("event_type", "text(255) not null")?.with_source("eventType"),
        ColumnSpec::new("version", "text(255) not null")?,
        ColumnSpec::new("event_time", "timestamp not null")?
            .with_source("eventTime")
            .with_transform(epoch_to_timestamp),
        ColumnSpec::new("job_id", "bigint not null")?.with_source("jobId"),
        ColumnSpec::new("user_id", "bigint not null")?.with_source("userId"),
        ColumnSpec::new("user_name", "text(255) not null")?.with_source("userName"),
        ColumnSpec::new("options", "bigint")?,
        ColumnSpec::new("num_processors", "bigint")?.with_source("numProcessors"),
        ColumnSpec::new("j_status", "bigint not null")?.with_source("jStatus"),
        ColumnSpec::new("submit_time", "timestamp not null")?
            .with_source("submitTime")
            .with_transform(epoch_to_timestamp),
        ColumnSpec::new("begin_time", "timestamp")?
            .with_source("beginTime")
            .with_transform(epoch_to_timestamp_nullable),
        ColumnSpec::new("term_time", "timestamp")?
            .with_source("termTime")
            .with_transform(epoch_to_timestamp_nullable),
        ColumnSpec::new("start_time", "timestamp not null")?
            .with_source("startTime")
            .with_transform(epoch_to_timestamp),
        ColumnSpec::new("queue", "text(255) not null")?,
        ColumnSpec::new("res_req", "text(255)")?.with_source("resReq"),
        ColumnSpec::new("from_host", "text(255)")?.with_source("fromHost"),
        ColumnSpec::new("num_asked_hosts", "bigint")?.with_source("numAskedHosts"),
        ColumnSpec::new("asked_hosts", "text(255)")?
            .with_source("askedHosts")
            .with_transform(join_list),
        ColumnSpec::new("host_factor", "double not null")?
            .with_source("hostFactor")
            .with_transform(round2),
        ColumnSpec::new("num_ex_hosts", "bigint")?.with_source("numExHosts"),
        ColumnSpec::new("exec_hosts", "text(255)")?
            .with_source("execHosts")
            .with_transform(join_list),
        ColumnSpec::new("job_name", "text(255)")?.with_source("jobName"),
        ColumnSpec::new("command", "text(255)")?,
        ColumnSpec::new("ru_utime", "double not null")?,
        ColumnSpec::new("ru_stime", "double not null")?,
        ColumnSpec::new("ru_minflt", "bigint")?,
        ColumnSpec::new("ru_majflt", "bigint")?,
        ColumnSpec::new("ru_nswap", "bigint")?,
        ColumnSpec::new("depend_cond", "text(255)")?.with_source("dependCond"),
        ColumnSpec::new("mail_user", "text(255)")?.with_source("mailUser"),
        ColumnSpec::new("project_name", "text(255)")?.with_source("projectName"),
        ColumnSpec::new("exit_status", "bigint")?.with_source("exitStatus"),
        ColumnSpec::new("max_num_processors", "bigint")?.with_source("maxNumProcessors"),
        ColumnSpec::new("login_shell", "text(255)")?.with_source("loginShell"),
        // Array indices can't exceed the scheduler's 10-digit job array
        // size limit, so bigint is comfortable.
        ColumnSpec::new("idx", "bigint not null")?,
        ColumnSpec::new("max_r_mem", "bigint not null")?.with_source("maxRMem"),
        ColumnSpec::new("max_r_swap", "bigint not null")?.with_source("maxRSwap"),
        ColumnSpec::new("exit_info", "bigint")?.with_source("exitInfo"),
        ColumnSpec::new("charged_saap", "text(255)")?.with_source("chargedSAAP"),
        ColumnSpec::new("app", "text(255)")?,
        ColumnSpec::new("runtime_estimation", "bigint")?.with_source("runtimeEstimation"),
        // Epoch means "not yet published"; the publisher flips this to the
        // publication instant. Never read from the accounting file.
        ColumnSpec::new("published", "timestamp not null")?
            .with_transform(epoch_to_timestamp)
            .with_default(RawValue::Int(0)),
    ];

    TableSchema::new(
        LOCAL_TABLE,
        columns,
        vec!["job_id", "idx", "event_time"],
        vec![
            vec!["published", "event_time"],
            vec!["user_name"],
            vec!["event_time", "start_time", "queue"],
            vec!["queue", "event_time", "start_time"],
            vec!["start_time", "event_time", "queue"],
            vec!["submit_time", "start_time", "queue"],
        ],
    )
}

/// CE table: the subset of gateway accounting fields needed for the join
/// and the outbound message format. Named after the legacy CE columns.
pub fn ce_jobs() -> Result<TableSchema, SchemaError> {
    let columns = vec![
        // Guards against lrms id cycles across days.
        ColumnSpec::new("log_time", "timestamp not null")?
            .with_source("timestamp")
            .with_transform(epoch_to_timestamp),
        ColumnSpec::new("ce_id", "text(256)")?.with_source("ceID"),
        // Join key against local_jobs.job_id.
        ColumnSpec::new("lrms_id", "bigint")?.with_source("lrmsID"),
        // FQANs run long; 410 characters was seen in the wild early on.
        ColumnSpec::new("user_fqan", "text(1023)")?.with_source("userFQAN"),
    ];

    TableSchema::new(
        CE_TABLE,
        columns,
        vec!["log_time", "lrms_id"],
        vec![vec!["lrms_id"]],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_jobs_builds() {
        let t = local_jobs().unwrap();
        assert_eq!(t.name, LOCAL_TABLE);
        assert_eq!(t.primary_key, vec!["job_id", "idx", "event_time"]);
        // `published` is default-valued, never read from the record.
        let published = t.column("published").unwrap();
        assert!(published.default.is_some());
        assert_eq!(t.columns.last().unwrap().name, "published");
    }

    #[test]
    fn test_ce_jobs_builds() {
        let t = ce_jobs().unwrap();
        assert_eq!(t.len(), 4);
        assert_eq!(t.column("lrms_id").unwrap().source(), "lrmsID");
    }
}
