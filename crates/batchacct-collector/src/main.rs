//! batchacct-collector - accounting record collector daemon

use anyhow::Result;
use batchacct_collector::config::{
    CollectorConfig, DEFAULT_ACCT_DIR, DEFAULT_FILE_PATTERN, DEFAULT_TABLE,
};
use batchacct_collector::insert::{InsertOptions, DEFAULT_HEARTBEAT_MINS, DEFAULT_LOG_BUNCH};
use batchacct_collector::watcher::{watch_dir, Collector};
use batchacct_common::db::{create_pool, DbConfig};
use batchacct_common::ddl::{create_statements, DdlOptions};
use batchacct_common::logging::{init_logging, LogConfig};
use batchacct_common::schema::TableRegistry;
use chrono::Duration;
use clap::{Parser, Subcommand};
use regex::Regex;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "batchacct-collector")]
#[command(author, version, about = "Batch accounting record collector")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch an accounting directory and insert new records
    Watch {
        /// Accounting directory absolute path
        #[arg(short, long, env = "ACCT_DIR", default_value = DEFAULT_ACCT_DIR)]
        acct_dir: String,

        /// Accounting file name pattern (regex)
        #[arg(short = 'f', long, env = "ACCT_FILE_PATTERN", default_value = DEFAULT_FILE_PATTERN)]
        file_pattern: String,

        /// Table template to feed
        #[arg(short, long, default_value = DEFAULT_TABLE)]
        table: String,

        /// Minutes between log heartbeats
        #[arg(short = 'b', long, default_value_t = DEFAULT_HEARTBEAT_MINS)]
        heartbeat_mins: i64,

        /// How many consecutive duplicates share one log line
        #[arg(long, default_value_t = DEFAULT_LOG_BUNCH)]
        log_bunch: u64,

        /// Don't touch the database
        #[arg(short, long)]
        dry_run: bool,
    },

    /// List available table templates
    ListTables,

    /// Create a table (and its keys/indexes) from a template
    CreateTables {
        /// Table template name
        #[arg(short, long)]
        template: String,

        /// Only add primary key and indexes
        #[arg(short = 'i', long)]
        only_indexes: bool,

        /// Skip primary key and indexes
        #[arg(short = 'j', long)]
        no_indexes: bool,

        /// Only log what would be executed
        #[arg(short, long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut log_config = LogConfig::new("batchacct-collector").with_env_overrides()?;
    if cli.verbose {
        log_config.level = tracing::Level::DEBUG;
    }
    init_logging(&log_config)?;

    let registry = TableRegistry::standard()?;

    match cli.command {
        Command::Watch { acct_dir, file_pattern, table, heartbeat_mins, log_bunch, dry_run } => {
            let config = CollectorConfig {
                acct_dir,
                file_pattern,
                table,
                heartbeat_mins,
                log_bunch,
                dry_run,
            };
            config.validate()?;
            watch(&registry, config).await?;
        },
        Command::ListTables => {
            for name in registry.names() {
                info!(table = name, "Available table template");
            }
        },
        Command::CreateTables { template, only_indexes, no_indexes, dry_run } => {
            create_tables(&registry, &template, only_indexes, no_indexes, dry_run).await?;
        },
    }

    Ok(())
}

async fn watch(registry: &TableRegistry, config: CollectorConfig) -> Result<()> {
    let schema = registry.get(&config.table)?.clone();
    let pattern = Regex::new(&config.file_pattern)?;

    let pool = create_pool(&DbConfig::from_env()?).await?;

    let opts = InsertOptions {
        heartbeat_period: Duration::minutes(config.heartbeat_mins),
        log_bunch: config.log_bunch,
        dry_run: config.dry_run,
    };

    let dir = PathBuf::from(&config.acct_dir);
    let collector = Collector::new(pool, schema, dir.clone(), pattern, opts)?;

    // The watcher handle must stay alive for the life of the loop.
    let (_watcher, rx) = watch_dir(&dir)?;
    info!(dir = %dir.display(), "Watching accounting directory");

    collector.run(rx).await
}

async fn create_tables(
    registry: &TableRegistry,
    template: &str,
    only_indexes: bool,
    no_indexes: bool,
    dry_run: bool,
) -> Result<()> {
    let schema = registry.get(template)?;
    let stmts = create_statements(schema, DdlOptions { only_indexes, no_indexes });

    if dry_run {
        for stmt in &stmts {
            info!(sql = %stmt, "Would execute");
        }
        return Ok(());
    }

    let pool = create_pool(&DbConfig::from_env()?).await?;
    for stmt in &stmts {
        info!(sql = %stmt, "Executing");
        sqlx::query(stmt).execute(&pool).await?;
    }
    info!(table = %schema.name, "Done");

    Ok(())
}
