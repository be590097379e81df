//! Collector configuration

use batchacct_common::tables::CE_TABLE;

/// Default accounting directory.
pub const DEFAULT_ACCT_DIR: &str = "/var/log/accounting";

/// Default accounting file name pattern: one dated file per day.
pub const DEFAULT_FILE_PATTERN: &str = r"^blahp\.log-\d{8}$";

/// Default table the collector feeds.
pub const DEFAULT_TABLE: &str = CE_TABLE;

/// Collector configuration, resolved from CLI flags with environment
/// fallbacks in `main`.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub acct_dir: String,
    pub file_pattern: String,
    pub table: String,
    pub heartbeat_mins: i64,
    pub log_bunch: u64,
    pub dry_run: bool,
}

impl CollectorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.heartbeat_mins <= 0 {
            anyhow::bail!("Heartbeat period must be positive");
        }
        if self.log_bunch == 0 {
            anyhow::bail!("Duplicate log bunch must be at least 1");
        }
        regex::Regex::new(&self.file_pattern)
            .map_err(|e| anyhow::anyhow!("Bad accounting file pattern: {}", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_bad_pattern() {
        let config = CollectorConfig {
            acct_dir: DEFAULT_ACCT_DIR.into(),
            file_pattern: "([".into(),
            table: DEFAULT_TABLE.into(),
            heartbeat_mins: 180,
            log_bunch: 10_000,
            dry_run: false,
        };
        assert!(config.validate().is_err());
    }
}
