//! Bronze Loader - refresh all bronze staging tables in one batch

use anyhow::{Context, Result};
use bronze_common::logging::{init_logging, LogConfig, LogLevel};
use bronze_loader::{
    config::Config, db, BatchLoader, Manifest, PgLogSink, PgStagingStore,
};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "bronze-loader")]
#[command(author, version, about = "Reload bronze staging tables from raw source files")]
struct Cli {
    /// Manifest file listing the tables to load
    #[arg(short, long, env = "BRONZE_MANIFEST")]
    manifest: Option<PathBuf>,

    /// Validate the manifest and exit without touching the database
    #[arg(long)]
    check: bool,

    /// Create the load-log table before loading
    #[arg(long)]
    migrate: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::for_binary("bronze-loader")
        .with_level(log_level)
        .merge_env()?;
    let _log_guard = init_logging(&log_config)?;

    let mut config = Config::load()?;
    if let Some(path) = cli.manifest {
        config.loader.manifest_path = path;
    }

    let manifest = Manifest::load(&config.loader.manifest_path)?;
    manifest.validate()?;
    info!(
        manifest = %config.loader.manifest_path.display(),
        entries = manifest.len(),
        "Manifest loaded"
    );

    if cli.check {
        info!("Manifest is valid");
        return Ok(());
    }

    let pool = db::create_pool(&config.database).await?;
    db::health_check(&pool).await?;
    if cli.migrate {
        db::run_migrations(&pool).await?;
    }

    let store = PgStagingStore::new(pool.clone())
        .with_mode(config.loader.source_mode)
        .with_statement_timeout(config.loader.entry_timeout());
    let sink = PgLogSink::with_table(pool, &config.loader.log_table);
    let loader = BatchLoader::new(manifest, store, sink)
        .with_entry_timeout(config.loader.entry_backstop());

    let summary = loader.run().await.context("Batch load did not complete")?;

    if summary.failed > 0 {
        info!(
            batch_id = %summary.batch_id,
            failed = summary.failed,
            "Batch completed with failed entries; see {} for details",
            config.loader.log_table
        );
    }

    Ok(())
}
