//! Outbound message fields
//!
//! Maps accounting-message fields to table columns, with derivation
//! functions where a field is computed from several columns. This is a
//! mapping, not a table template: field and column names differ, and types
//! only matter for decoding the joined row.
//!
//! Each field's positions in the joined row are assigned by one explicit
//! enumeration when the [`FieldSet`] is built, so construction is
//! deterministic and the set can be rebuilt freely.

use crate::config::PublisherConfig;
use crate::error::PublishError;
use batchacct_common::schema::{BaseType, TableRegistry};
use batchacct_common::tables::{CE_TABLE, LOCAL_TABLE};
use batchacct_common::value::SqlValue;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// FQAN sentinel for local jobs whose group maps to no grid VO.
pub const NONLCG: &str = "/local-nonlcg";

/// One column of the joined row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnRef {
    pub table: &'static str,
    pub column: &'static str,
}

impl ColumnRef {
    pub const fn new(table: &'static str, column: &'static str) -> Self {
        Self { table, column }
    }

    pub fn qualified(&self) -> String {
        format!("{}.{}", self.table, self.column)
    }
}

/// Shared state for field derivations: the scaling constant, the VO-group
/// map, and the warn-once cache for groups the map doesn't know.
#[derive(Debug)]
pub struct DeriveContext {
    pub factor_constant: f64,
    pub vo_groups: HashMap<String, String>,
    unknown_groups: HashSet<String>,
}

impl DeriveContext {
    pub fn new(factor_constant: f64, vo_groups: HashMap<String, String>) -> Self {
        Self { factor_constant, vo_groups, unknown_groups: HashSet::new() }
    }
}

/// Derivation functions computing a field value from referenced columns.
/// `Ok(None)` means the field is omitted from the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Derive {
    /// FQAN from (local charged share, gateway FQAN). A NULL gateway FQAN
    /// means the outer join found no gateway record, which is how a
    /// legitimately local job looks too; both get local-VO sentinels.
    Fqan,
    /// Whole seconds between two timestamps (end, start).
    WallSeconds,
    /// Integral sum of two CPU-time columns.
    CpuSeconds,
    /// Timestamp as epoch seconds.
    EpochSeconds,
    /// `<jobId>-<arrayIndex>`.
    JobIdWithIndex,
    /// Host factor times the configured constant, truncated to an integer.
    ScaledFactor,
    /// `grid` when the gateway FQAN resolved, `local` otherwise.
    Infrastructure,
}

impl Derive {
    /// Apply the derivation to the referenced column values, in reference
    /// order. Fails when a value the computation needs is NULL.
    pub fn apply(
        &self,
        ctx: &mut DeriveContext,
        field: &str,
        args: &[SqlValue],
    ) -> Result<Option<String>, PublishError> {
        match self {
            Derive::Fqan => Ok(Some(derive_fqan(ctx, arg(args, 0), arg(args, 1)))),

            Derive::WallSeconds => match (arg(args, 0), arg(args, 1)) {
                (SqlValue::Timestamp(end), SqlValue::Timestamp(start)) => {
                    Ok(Some((*end - *start).num_seconds().to_string()))
                },
                _ => Err(PublishError::output_field(field, "end or start time is NULL")),
            },

            Derive::CpuSeconds => match (arg(args, 0), arg(args, 1)) {
                (SqlValue::Double(u), SqlValue::Double(s)) => {
                    Ok(Some(((u + s) as i64).to_string()))
                },
                _ => Err(PublishError::output_field(field, "a CPU time column is NULL")),
            },

            Derive::EpochSeconds => match arg(args, 0) {
                SqlValue::Timestamp(t) => Ok(Some(t.timestamp().to_string())),
                _ => Err(PublishError::output_field(field, "timestamp is NULL")),
            },

            Derive::JobIdWithIndex => match (arg(args, 0), arg(args, 1)) {
                (SqlValue::Int(job_id), SqlValue::Int(idx)) => {
                    Ok(Some(format!("{}-{}", job_id, idx)))
                },
                _ => Err(PublishError::output_field(field, "job id or array index is NULL")),
            },

            Derive::ScaledFactor => match arg(args, 0) {
                SqlValue::Double(f) => Ok(Some(((f * ctx.factor_constant) as i64).to_string())),
                _ => Err(PublishError::output_field(field, "host factor is NULL")),
            },

            Derive::Infrastructure => match arg(args, 0) {
                SqlValue::Null => Ok(Some("local".to_string())),
                _ => Ok(Some("grid".to_string())),
            },
        }
    }
}

fn arg<'a>(args: &'a [SqlValue], i: usize) -> &'a SqlValue {
    args.get(i).unwrap_or(&SqlValue::Null)
}

fn derive_fqan(ctx: &mut DeriveContext, charged_saap: &SqlValue, user_fqan: &SqlValue) -> String {
    if let SqlValue::Text(fqan) = user_fqan {
        // Grid job. The consumer wants FQANs semicolon-separated, not
        // space-separated.
        return fqan.replace(' ', ";");
    }

    // Local job (or an outer-join row with no gateway match, which is
    // indistinguishable and billed the same).
    let group = match charged_saap {
        SqlValue::Text(saap) => saap.split('/').nth(1).unwrap_or(saap).to_string(),
        _ => return NONLCG.to_string(),
    };

    match ctx.vo_groups.get(&group) {
        Some(vo) => format!("/local-{}", vo),
        None => {
            if ctx.unknown_groups.insert(group.clone()) {
                warn!(group = %group, "Don't know group -- Should I?");
            }
            NONLCG.to_string()
        },
    }
}

/// One field of the outbound message: a constant, or one or more column
/// references with an optional derivation and an optional default for
/// fields the consumer requires even when the row has no data.
#[derive(Debug, Clone)]
pub struct PublishField {
    pub name: &'static str,
    pub refs: Vec<ColumnRef>,
    pub derive: Option<Derive>,
    pub constant: Option<String>,
    pub mandatory_default: Option<String>,
    /// Positions of `refs` in the joined row, assigned by `FieldSet::new`.
    col_idxs: Vec<usize>,
}

impl PublishField {
    pub fn constant(name: &'static str, value: impl Into<String>) -> Self {
        Self {
            name,
            refs: vec![],
            derive: None,
            constant: Some(value.into()),
            mandatory_default: None,
            col_idxs: vec![],
        }
    }

    pub fn column(name: &'static str, r: ColumnRef) -> Self {
        Self {
            name,
            refs: vec![r],
            derive: None,
            constant: None,
            mandatory_default: None,
            col_idxs: vec![],
        }
    }

    pub fn derived(name: &'static str, refs: Vec<ColumnRef>, derive: Derive) -> Self {
        Self { name, refs, derive: Some(derive), constant: None, mandatory_default: None, col_idxs: vec![] }
    }

    pub fn with_mandatory_default(mut self, value: impl Into<String>) -> Self {
        self.mandatory_default = Some(value.into());
        self
    }
}

/// One column of the join SELECT, with the type to decode it as.
#[derive(Debug, Clone)]
pub struct SelectColumn {
    pub qualified: String,
    pub base: BaseType,
}

/// The validated field set: every column reference resolved against the
/// table registry, select positions assigned, plus the two columns the
/// publish engine itself needs (the local job identifier for marking and
/// the event time for the covered-range summary).
#[derive(Debug)]
pub struct FieldSet {
    fields: Vec<PublishField>,
    select: Vec<SelectColumn>,
    job_id_idx: usize,
    event_time_idx: usize,
}

impl FieldSet {
    pub fn new(mut fields: Vec<PublishField>, registry: &TableRegistry) -> Result<Self, PublishError> {
        let mut select = Vec::new();

        for field in &mut fields {
            if field.refs.is_empty() && field.constant.is_none() {
                return Err(PublishError::Config(format!(
                    "field '{}' has neither a column source nor a constant",
                    field.name
                )));
            }
            for r in &field.refs {
                let base = resolve(registry, r)?;
                field.col_idxs.push(select.len());
                select.push(SelectColumn { qualified: r.qualified(), base });
            }
        }

        // Engine-required columns, selected regardless of the whitelist.
        let job_id = ColumnRef::new(LOCAL_TABLE, "job_id");
        let job_id_idx = select.len();
        select.push(SelectColumn { qualified: job_id.qualified(), base: resolve(registry, &job_id)? });

        let event_time = ColumnRef::new(LOCAL_TABLE, "event_time");
        let event_time_idx = select.len();
        select
            .push(SelectColumn { qualified: event_time.qualified(), base: resolve(registry, &event_time)? });

        Ok(Self { fields, select, job_id_idx, event_time_idx })
    }

    pub fn select_columns(&self) -> &[SelectColumn] {
        &self.select
    }

    pub fn job_id_idx(&self) -> usize {
        self.job_id_idx
    }

    pub fn event_time_idx(&self) -> usize {
        self.event_time_idx
    }

    /// Append one joined row's `Field: value` lines to `msg`. NULL values
    /// without a mandatory default are left out of the message entirely.
    pub fn render(
        &self,
        ctx: &mut DeriveContext,
        row: &[SqlValue],
        msg: &mut String,
    ) -> Result<(), PublishError> {
        for field in &self.fields {
            let value = if !field.col_idxs.is_empty() {
                let args: Vec<SqlValue> =
                    field.col_idxs.iter().map(|i| arg(row, *i).clone()).collect();
                match field.derive {
                    Some(derive) => derive.apply(ctx, field.name, &args)?,
                    // No derivation: a single reference, taken directly.
                    None => match arg(&args, 0) {
                        SqlValue::Null => None,
                        v => Some(v.to_string()),
                    },
                }
            } else {
                field.constant.clone()
            };

            // A field that stays `None` here is optional with no data and
            // is shaved off the message entirely.
            if let Some(v) = value.or_else(|| field.mandatory_default.clone()) {
                msg.push_str(field.name);
                msg.push_str(": ");
                msg.push_str(&v);
                msg.push('\n');
            }
        }
        Ok(())
    }
}

fn resolve(registry: &TableRegistry, r: &ColumnRef) -> Result<BaseType, PublishError> {
    let table = registry
        .get(r.table)
        .map_err(|e| PublishError::Config(e.to_string()))?;
    let column = table
        .column(r.column)
        .ok_or_else(|| PublishError::Config(format!("no column {}", r.qualified())))?;
    Ok(column.ty.base)
}

/// The standard accounting-message field list, filtered down to the
/// configured whitelist (an empty whitelist keeps everything).
pub fn apel_fields(cfg: &PublisherConfig) -> Vec<PublishField> {
    let local = |c| ColumnRef::new(LOCAL_TABLE, c);
    let ce = |c| ColumnRef::new(CE_TABLE, c);

    let fields = vec![
        PublishField::constant("Site", &cfg.site),
        PublishField::column("SubmitHost", ce("ce_id")).with_mandatory_default(&cfg.cluster),
        PublishField::derived(
            "LocalJobId",
            vec![local("job_id"), local("idx")],
            Derive::JobIdWithIndex,
        ),
        PublishField::derived(
            "FQAN",
            vec![local("charged_saap"), ce("user_fqan")],
            Derive::Fqan,
        ),
        PublishField::derived(
            "WallDuration",
            vec![local("event_time"), local("start_time")],
            Derive::WallSeconds,
        ),
        PublishField::derived(
            "CpuDuration",
            vec![local("ru_utime"), local("ru_stime")],
            Derive::CpuSeconds,
        ),
        PublishField::column("Processors", local("num_processors")),
        PublishField::column("NodeCount", local("num_ex_hosts")),
        PublishField::derived("StartTime", vec![local("start_time")], Derive::EpochSeconds),
        PublishField::derived("EndTime", vec![local("event_time")], Derive::EpochSeconds),
        PublishField::column("MemoryReal", local("max_r_mem")),
        PublishField::column("MemoryVirtual", local("max_r_swap")),
        PublishField::constant("ServiceLevelType", &cfg.unit),
        PublishField::derived("ServiceLevel", vec![local("host_factor")], Derive::ScaledFactor),
        PublishField::derived("Infrastructure", vec![ce("user_fqan")], Derive::Infrastructure),
    ];

    if cfg.fields.is_empty() {
        fields
    } else {
        fields.into_iter().filter(|f| cfg.fields.iter().any(|w| w == f.name)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ctx() -> DeriveContext {
        let mut groups = HashMap::new();
        groups.insert("theorie".to_string(), "atlas".to_string());
        DeriveContext::new(250.0, groups)
    }

    #[test]
    fn test_fqan_grid_job_semicolons() {
        let mut ctx = ctx();
        let fqan = SqlValue::Text("/atlas/Role=production /atlas".into());
        let v = derive_fqan(&mut ctx, &SqlValue::Null, &fqan);
        assert_eq!(v, "/atlas/Role=production;/atlas");
    }

    #[test]
    fn test_fqan_local_job_mapped_group() {
        let mut ctx = ctx();
        let saap = SqlValue::Text("/theorie/subshare".into());
        let v = derive_fqan(&mut ctx, &saap, &SqlValue::Null);
        assert_eq!(v, "/local-atlas");
    }

    #[test]
    fn test_fqan_local_job_no_share() {
        let mut ctx = ctx();
        assert_eq!(derive_fqan(&mut ctx, &SqlValue::Null, &SqlValue::Null), NONLCG);
    }

    #[test]
    fn test_fqan_unknown_group_warns_once() {
        let mut ctx = ctx();
        let saap = SqlValue::Text("/mystery/x".into());
        assert_eq!(derive_fqan(&mut ctx, &saap, &SqlValue::Null), NONLCG);
        assert_eq!(derive_fqan(&mut ctx, &saap, &SqlValue::Null), NONLCG);
        // The warn-once cache holds the group after the first sighting.
        assert!(ctx.unknown_groups.contains("mystery"));
        assert_eq!(ctx.unknown_groups.len(), 1);
    }

    #[test]
    fn test_wall_and_cpu_derivations() {
        let mut ctx = ctx();
        let start = SqlValue::Timestamp(Utc.timestamp_opt(1_000, 0).unwrap());
        let end = SqlValue::Timestamp(Utc.timestamp_opt(4_600, 0).unwrap());

        let v = Derive::WallSeconds.apply(&mut ctx, "WallDuration", &[end, start]).unwrap();
        assert_eq!(v.as_deref(), Some("3600"));

        let v = Derive::CpuSeconds
            .apply(&mut ctx, "CpuDuration", &[SqlValue::Double(10.6), SqlValue::Double(2.2)])
            .unwrap();
        assert_eq!(v.as_deref(), Some("12"));
    }

    #[test]
    fn test_null_duration_input_is_an_error() {
        let mut ctx = ctx();
        let end = SqlValue::Timestamp(Utc.timestamp_opt(4_600, 0).unwrap());
        let err = Derive::WallSeconds
            .apply(&mut ctx, "WallDuration", &[end, SqlValue::Null])
            .unwrap_err();
        assert!(matches!(err, PublishError::OutputField { .. }));
    }

    #[test]
    fn test_jobid_and_factor() {
        let mut ctx = ctx();
        let v = Derive::JobIdWithIndex
            .apply(&mut ctx, "LocalJobId", &[SqlValue::Int(4242), SqlValue::Int(7)])
            .unwrap();
        assert_eq!(v.as_deref(), Some("4242-7"));

        let v = Derive::ScaledFactor
            .apply(&mut ctx, "ServiceLevel", &[SqlValue::Double(2.5)])
            .unwrap();
        assert_eq!(v.as_deref(), Some("625"));
    }

    #[test]
    fn test_infrastructure() {
        let mut ctx = ctx();
        let v = Derive::Infrastructure.apply(&mut ctx, "Infrastructure", &[SqlValue::Null]).unwrap();
        assert_eq!(v.as_deref(), Some("local"));
        let v = Derive::Infrastructure
            .apply(&mut ctx, "Infrastructure", &[SqlValue::Text("/atlas".into())])
            .unwrap();
        assert_eq!(v.as_deref(), Some("grid"));
    }

    fn test_cfg(whitelist: &[&str]) -> PublisherConfig {
        PublisherConfig {
            site: "EXAMPLE-SITE".into(),
            cluster: "ce.example.org".into(),
            unit: "HEPSPEC".into(),
            factor_constant: 250.0,
            fields: whitelist.iter().map(|s| s.to_string()).collect(),
            bunch: 1000,
        }
    }

    #[test]
    fn test_field_set_assigns_positions() {
        let registry = TableRegistry::standard().unwrap();
        let set = FieldSet::new(apel_fields(&test_cfg(&[])), &registry).unwrap();

        // Engine columns sit at the end of the select, after every ref.
        assert_eq!(set.select_columns().len(), set.event_time_idx() + 1);
        assert_eq!(set.select_columns()[set.job_id_idx()].qualified, "local_jobs.job_id");
        assert_eq!(
            set.select_columns()[set.event_time_idx()].qualified,
            "local_jobs.event_time"
        );
    }

    #[test]
    fn test_whitelist_filters_fields() {
        let fields = apel_fields(&test_cfg(&["Site", "LocalJobId"]));
        let names: Vec<&str> = fields.iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["Site", "LocalJobId"]);
    }

    #[test]
    fn test_sourceless_field_rejected() {
        let registry = TableRegistry::standard().unwrap();
        let broken = PublishField {
            name: "Broken",
            refs: vec![],
            derive: None,
            constant: None,
            mandatory_default: None,
            col_idxs: vec![],
        };
        let err = FieldSet::new(vec![broken], &registry).unwrap_err();
        assert!(matches!(err, PublishError::Config(_)));
    }

    #[test]
    fn test_render_local_job_row() {
        let registry = TableRegistry::standard().unwrap();
        let cfg = test_cfg(&[]);
        let set = FieldSet::new(apel_fields(&cfg), &registry).unwrap();
        let mut ctx = ctx();

        let start = Utc.timestamp_opt(1_000, 0).unwrap();
        let end = Utc.timestamp_opt(4_600, 0).unwrap();
        // Row aligned to the select: every field ref in order, then the
        // engine's job_id and event_time.
        let row = vec![
            SqlValue::Null,                       // SubmitHost: ce_id
            SqlValue::Int(4242),                  // LocalJobId: job_id
            SqlValue::Int(0),                     // LocalJobId: idx
            SqlValue::Text("/theorie/x".into()),  // FQAN: charged_saap
            SqlValue::Null,                       // FQAN: user_fqan
            SqlValue::Timestamp(end),             // WallDuration: event_time
            SqlValue::Timestamp(start),           // WallDuration: start_time
            SqlValue::Double(10.0),               // CpuDuration: ru_utime
            SqlValue::Double(2.0),                // CpuDuration: ru_stime
            SqlValue::Null,                       // Processors
            SqlValue::Null,                       // NodeCount
            SqlValue::Timestamp(start),           // StartTime
            SqlValue::Timestamp(end),             // EndTime
            SqlValue::Int(2048),                  // MemoryReal
            SqlValue::Int(4096),                  // MemoryVirtual
            SqlValue::Double(2.0),                // ServiceLevel: host_factor
            SqlValue::Null,                       // Infrastructure: user_fqan
            SqlValue::Int(4242),                  // engine: job_id
            SqlValue::Timestamp(end),             // engine: event_time
        ];

        let mut msg = String::new();
        set.render(&mut ctx, &row, &mut msg).unwrap();

        assert!(msg.contains("Site: EXAMPLE-SITE\n"));
        // NULL ce_id falls back to the mandatory cluster default.
        assert!(msg.contains("SubmitHost: ce.example.org\n"));
        assert!(msg.contains("LocalJobId: 4242-0\n"));
        assert!(msg.contains("FQAN: /local-atlas\n"));
        assert!(msg.contains("WallDuration: 3600\n"));
        assert!(msg.contains("CpuDuration: 12\n"));
        assert!(msg.contains("ServiceLevel: 500\n"));
        assert!(msg.contains("Infrastructure: local\n"));
        // Optional NULL fields are shaved off entirely.
        assert!(!msg.contains("Processors"));
        assert!(!msg.contains("NodeCount"));
    }
}
