//! batchacct-publisher - accounting message publisher
//!
//! One invocation performs one publish run: join, render, send, mark.

use anyhow::Result;
use batchacct_common::db::{create_pool, DbConfig};
use batchacct_common::logging::{init_logging, LogConfig};
use batchacct_common::schema::TableRegistry;
use batchacct_publisher::config::{load_vo_groups, PublisherConfig, DEFAULT_BUNCH};
use batchacct_publisher::fields::{apel_fields, DeriveContext, FieldSet};
use batchacct_publisher::join::PublishEngine;
use batchacct_publisher::sink::FileDropSink;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "batchacct-publisher")]
#[command(author, version, about = "Batch accounting message publisher")]
struct Cli {
    /// Site name reported in every message
    #[arg(short, long, env = "ACCT_SITE")]
    site: String,

    /// Fallback submit host for jobs without a gateway record
    #[arg(short, long, env = "ACCT_CLUSTER")]
    cluster: String,

    /// Service level type label
    #[arg(short, long, env = "ACCT_UNIT", default_value = "HEPSPEC")]
    unit: String,

    /// Multiplier applied to per-host scaling factors
    #[arg(short = 'k', long, env = "ACCT_FACTOR_CONSTANT")]
    factor_constant: f64,

    /// VO file containing group-to-VO mappings
    #[arg(short = 'o', long, env = "ACCT_VO_FILE")]
    vo_file: PathBuf,

    /// Directory the message transport consumes batches from
    #[arg(short = 'd', long, env = "ACCT_SPOOL_DIR")]
    spool_dir: PathBuf,

    /// Number of job events per message
    #[arg(short, long, default_value_t = DEFAULT_BUNCH)]
    bunch: usize,

    /// Space-separated field whitelist (default: all fields)
    #[arg(short, long)]
    fields: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut log_config = LogConfig::new("batchacct-publisher").with_env_overrides()?;
    if cli.verbose {
        log_config.level = tracing::Level::DEBUG;
    }
    init_logging(&log_config)?;

    let config = PublisherConfig {
        site: cli.site,
        cluster: cli.cluster,
        unit: cli.unit,
        factor_constant: cli.factor_constant,
        fields: cli
            .fields
            .map(|f| f.split_whitespace().map(String::from).collect())
            .unwrap_or_default(),
        bunch: cli.bunch,
    };
    config.validate()?;

    let vo_groups = load_vo_groups(&cli.vo_file)?;
    info!(groups = vo_groups.len(), "Loaded VO-group mappings");

    let registry = TableRegistry::standard()?;
    let field_set = FieldSet::new(apel_fields(&config), &registry)?;
    let ctx = DeriveContext::new(config.factor_constant, vo_groups);

    let pool = create_pool(&DbConfig::from_env()?).await?;
    let mut sink = FileDropSink::new(cli.spool_dir);
    let mut engine = PublishEngine::new(pool, field_set, ctx, config.bunch);

    engine.run(&mut sink).await?;
    info!("Done");

    Ok(())
}
