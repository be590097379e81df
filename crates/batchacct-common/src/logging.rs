//! Logging setup for the accounting daemons
//!
//! Thin wrapper over `tracing-subscriber`: level + console-or-file target
//! with daily rotation, overridable from the environment. Long-running
//! collectors normally log to a file; one-shot tools log to the console.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Output target for logs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogTarget {
    #[default]
    Console,
    File,
}

impl std::str::FromStr for LogTarget {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "console" | "stdout" => Ok(LogTarget::Console),
            "file" => Ok(LogTarget::File),
            _ => Err(anyhow::anyhow!("Invalid log target: {}", s)),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub target: LogTarget,
    /// Directory for log files (file target only).
    pub log_dir: PathBuf,
    /// Log file name prefix, e.g. "batchacct-collector".
    pub log_file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            target: LogTarget::Console,
            log_dir: PathBuf::from("/var/log/batchacct"),
            log_file_prefix: "batchacct".to_string(),
        }
    }
}

impl LogConfig {
    pub fn new(prefix: &str) -> Self {
        Self { log_file_prefix: prefix.to_string(), ..Self::default() }
    }

    /// Apply `LOG_LEVEL`, `LOG_TARGET` and `LOG_DIR` environment overrides.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.level = level.parse().context("Failed to parse LOG_LEVEL")?;
        }
        if let Ok(target) = std::env::var("LOG_TARGET") {
            self.target = target.parse()?;
        }
        if let Ok(dir) = std::env::var("LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
        Ok(self)
    }
}

/// Initialize the global tracing subscriber. Call once at startup.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(config.level.into());

    match config.target {
        LogTarget::Console => {
            let layer = fmt::layer().with_writer(std::io::stdout).with_target(true);
            tracing_subscriber::registry().with(filter).with(layer).try_init()?;
        },
        LogTarget::File => {
            std::fs::create_dir_all(&config.log_dir).context("Failed to create log directory")?;
            let appender =
                tracing_appender::rolling::daily(&config.log_dir, &config.log_file_prefix);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            // The guard must outlive the process; leak it deliberately.
            std::mem::forget(guard);
            let layer = fmt::layer().with_writer(non_blocking).with_target(true).with_ansi(false);
            tracing_subscriber::registry().with(filter).with(layer).try_init()?;
        },
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_log_target_from_str() {
        assert_eq!("console".parse::<LogTarget>().unwrap(), LogTarget::Console);
        assert_eq!("FILE".parse::<LogTarget>().unwrap(), LogTarget::File);
        assert!("syslog".parse::<LogTarget>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = LogConfig::new("batchacct-publisher");
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.log_file_prefix, "batchacct-publisher");
    }
}
