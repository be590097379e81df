//! DDL generation for the fixed table shapes
//!
//! Produces CREATE TABLE / ADD CONSTRAINT / CREATE INDEX statement text
//! from a [`TableSchema`]. Constraint and index identifiers are shortened
//! deterministically when a multi-column name would exceed the backing
//! store's identifier-length limit.

use crate::schema::TableSchema;

/// Postgres identifier length limit in bytes.
pub const PG_IDENT_LIMIT: usize = 63;

/// Options controlling which statements are generated.
#[derive(Debug, Clone, Copy, Default)]
pub struct DdlOptions {
    /// Skip the CREATE TABLE, only emit key/index statements.
    pub only_indexes: bool,
    /// Skip key/index statements.
    pub no_indexes: bool,
}

/// Build the CREATE statements for a table, in execution order.
pub fn create_statements(schema: &TableSchema, opts: DdlOptions) -> Vec<String> {
    let mut stmts = Vec::new();

    if !opts.only_indexes {
        let cols: Vec<String> =
            schema.columns.iter().map(|c| format!("{} {}", c.name, c.ty)).collect();
        stmts.push(format!("CREATE TABLE {} ({})", schema.name, cols.join(", ")));
    }

    if !opts.no_indexes {
        if !schema.primary_key.is_empty() {
            let pk: Vec<&str> = schema.primary_key.iter().map(String::as_str).collect();
            stmts.push(format!(
                "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({})",
                schema.name,
                short_ident(&format!("pk_{}_", schema.name), &pk),
                pk.join(", ")
            ));
        }
        for idx in &schema.indexes {
            let cols: Vec<&str> = idx.iter().map(String::as_str).collect();
            stmts.push(format!(
                "CREATE INDEX {} ON {} ({})",
                short_ident(&format!("idx_{}_", schema.name), &cols),
                schema.name,
                cols.join(", ")
            ));
        }
    }

    stmts
}

/// Join a prefix and column names into an identifier, shortening each
/// column part proportionally when the result would exceed
/// [`PG_IDENT_LIMIT`]. Deterministic: the same input always yields the
/// same identifier.
pub fn short_ident(prefix: &str, cols: &[&str]) -> String {
    let joined = cols.join("_");
    if prefix.len() + joined.len() <= PG_IDENT_LIMIT {
        return format!("{}{}", prefix, joined);
    }

    let over = prefix.len() + joined.len() - PG_IDENT_LIMIT;
    let cut_per_col = over.div_ceil(cols.len());
    let shortened: Vec<String> = cols
        .iter()
        .map(|c| c.chars().take(c.len().saturating_sub(cut_per_col)).collect())
        .collect();
    format!("{}{}", prefix, shortened.join("_"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables;

    #[test]
    fn test_short_ident_untouched_when_short() {
        assert_eq!(short_ident("pk_t_", &["a", "b"]), "pk_t_a_b");
    }

    #[test]
    fn test_short_ident_fits_limit() {
        let long = "a".repeat(40);
        let cols = [long.as_str(), long.as_str()];
        let id = short_ident("idx_local_jobs_", &cols);
        assert!(id.len() <= PG_IDENT_LIMIT, "{} is {} bytes", id, id.len());
        // Deterministic.
        assert_eq!(id, short_ident("idx_local_jobs_", &cols));
    }

    #[test]
    fn test_create_statements_shape() {
        let schema = tables::ce_jobs().unwrap();
        let stmts = create_statements(&schema, DdlOptions::default());
        assert!(stmts[0].starts_with("CREATE TABLE ce_jobs ("));
        assert!(stmts[0].contains("user_fqan VARCHAR(1023)"));
        assert!(stmts[1].contains("PRIMARY KEY (log_time, lrms_id)"));
        assert!(stmts[2].starts_with("CREATE INDEX idx_ce_jobs_lrms_id ON ce_jobs"));
    }

    #[test]
    fn test_only_indexes() {
        let schema = tables::ce_jobs().unwrap();
        let stmts = create_statements(&schema, DdlOptions { only_indexes: true, no_indexes: false });
        assert!(stmts.iter().all(|s| !s.starts_with("CREATE TABLE")));
        assert!(!stmts.is_empty());
    }

    #[test]
    fn test_local_jobs_identifiers_fit() {
        let schema = tables::local_jobs().unwrap();
        for stmt in create_statements(&schema, DdlOptions::default()) {
            if let Some(rest) = stmt.strip_prefix("CREATE INDEX ") {
                let ident = rest.split(' ').next().unwrap_or_default();
                assert!(ident.len() <= PG_IDENT_LIMIT);
            }
        }
    }
}
