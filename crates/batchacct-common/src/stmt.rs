//! SQL statement builder
//!
//! All statement text is assembled here so the normalizer and the join
//! engine never concatenate values into SQL. Row values are always bound
//! as parameters; identifiers come exclusively from the closed, static
//! table registry, which is why identifier interpolation is acceptable.
//!
//! NULL columns are emitted as the SQL literal `NULL` rather than bound,
//! which is how the backing store wants unique-constraint evaluation to
//! behave, and parameter numbers are re-assigned per row over the non-NULL
//! values only.

use crate::schema::TableSchema;
use crate::value::SqlValue;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::Postgres;

/// A statement plus the values to bind, in `$1..$n` order.
#[derive(Debug, Clone)]
pub struct BoundStatement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Build a parameterized INSERT for one normalized row. The row must be
/// aligned to the schema's column order.
pub fn build_insert(schema: &TableSchema, row: &[SqlValue]) -> BoundStatement {
    let columns: Vec<&str> = schema.columns.iter().map(|c| c.name.as_str()).collect();

    let mut placeholders = Vec::with_capacity(row.len());
    let mut params = Vec::new();
    let mut n = 0;
    for value in row {
        if value.is_null() {
            placeholders.push("NULL".to_string());
        } else {
            n += 1;
            placeholders.push(format!("${}", n));
            params.push(value.clone());
        }
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        schema.name,
        columns.join(", "),
        placeholders.join(", ")
    );
    BoundStatement { sql, params }
}

/// Build the publish-marking UPDATE: sets the published timestamp (`$1`)
/// on every row whose job identifier is in the bound array (`$2`).
pub fn build_mark_published(local_table: &str) -> String {
    format!("UPDATE {} SET published = $1 WHERE job_id = ANY($2)", local_table)
}

/// Assemble the outer-join SELECT for the publish run. `conditions` carry
/// their own `$n` placeholders; the caller binds the matching values.
pub fn build_join_select(
    select_cols: &[String],
    local_table: &str,
    remote_table: &str,
    local_key: &str,
    remote_key: &str,
    conditions: &[String],
) -> String {
    format!(
        "SELECT {} FROM {} LEFT JOIN {} ON {}.{} = {}.{} WHERE {}",
        select_cols.join(", "),
        local_table,
        remote_table,
        local_table,
        local_key,
        remote_table,
        remote_key,
        conditions.join(" AND ")
    )
}

/// Bind a slice of non-NULL values onto a query in order.
pub fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[SqlValue],
) -> Query<'q, Postgres, PgArguments> {
    for value in params {
        query = match value {
            SqlValue::Text(s) => query.bind(s.clone()),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::Double(d) => query.bind(*d),
            SqlValue::Timestamp(t) => query.bind(*t),
            // NULLs are emitted as literals by the builder; binding one is
            // a builder bug.
            SqlValue::Null => query.bind(Option::<i64>::None),
        };
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSpec, TableSchema};
    use chrono::{TimeZone, Utc};

    fn schema() -> TableSchema {
        TableSchema::new(
            "t",
            vec![
                ColumnSpec::new("a", "bigint not null").unwrap(),
                ColumnSpec::new("b", "text(10)").unwrap(),
                ColumnSpec::new("c", "timestamp").unwrap(),
            ],
            vec!["a"],
            vec![],
        )
        .unwrap()
    }

    #[test]
    fn test_insert_renumbers_around_nulls() {
        let row = vec![
            SqlValue::Int(7),
            SqlValue::Null,
            SqlValue::Timestamp(Utc.timestamp_opt(0, 0).unwrap()),
        ];
        let stmt = build_insert(&schema(), &row);
        assert_eq!(stmt.sql, "INSERT INTO t (a, b, c) VALUES ($1, NULL, $2)");
        assert_eq!(stmt.params.len(), 2);
        assert_eq!(stmt.params[0], SqlValue::Int(7));
    }

    #[test]
    fn test_insert_all_values_bound() {
        let row = vec![
            SqlValue::Int(7),
            SqlValue::Text("x".into()),
            SqlValue::Timestamp(Utc.timestamp_opt(1, 0).unwrap()),
        ];
        let stmt = build_insert(&schema(), &row);
        assert_eq!(stmt.sql, "INSERT INTO t (a, b, c) VALUES ($1, $2, $3)");
        assert_eq!(stmt.params.len(), 3);
    }

    #[test]
    fn test_mark_published() {
        assert_eq!(
            build_mark_published("local_jobs"),
            "UPDATE local_jobs SET published = $1 WHERE job_id = ANY($2)"
        );
    }

    #[test]
    fn test_join_select() {
        let sql = build_join_select(
            &["local_jobs.job_id".into(), "ce_jobs.user_fqan".into()],
            "local_jobs",
            "ce_jobs",
            "job_id",
            "lrms_id",
            &["local_jobs.published = $1".into()],
        );
        assert_eq!(
            sql,
            "SELECT local_jobs.job_id, ce_jobs.user_fqan FROM local_jobs \
             LEFT JOIN ce_jobs ON local_jobs.job_id = ce_jobs.lrms_id \
             WHERE local_jobs.published = $1"
        );
    }
}
