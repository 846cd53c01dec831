//! Bronze Loader Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Refreshes raw ("bronze") staging tables from delimited source files and
//! records one load-log row per table per run.
//!
//! - [`manifest`]: which tables to load, from which files, in which order
//! - [`store`]: clear-and-load against PostgreSQL (`TRUNCATE` + `COPY`)
//! - [`sink`]: append-only load log
//! - [`loader`]: the batch loop tying them together
//!
//! # Example
//!
//! ```no_run
//! use bronze_loader::{BatchLoader, Manifest, PgLogSink, PgStagingStore};
//! use sqlx::PgPool;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = PgPool::connect("postgresql://localhost/warehouse").await?;
//!     let manifest = Manifest::load("manifest.yml")?;
//!
//!     let loader = BatchLoader::new(
//!         manifest,
//!         PgStagingStore::new(pool.clone()),
//!         PgLogSink::new(pool),
//!     );
//!     let summary = loader.run().await?;
//!     tracing::info!(batch_id = %summary.batch_id, rows = summary.rows_loaded, "Batch done");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod loader;
pub mod manifest;
pub mod models;
pub mod sink;
pub mod store;

// Re-export commonly used types
pub use loader::{BatchLoader, RunError};
pub use manifest::{LoadEntry, Manifest};
pub use models::{LoadLogRecord, LoadOutcome, LoadStatus, RunContext, RunSummary};
pub use sink::{LogSink, PgLogSink, SinkError};
pub use store::{LoadError, PgStagingStore, SourceMode, StagingStore};
