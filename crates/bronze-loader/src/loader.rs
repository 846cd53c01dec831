//! Batch loader
//!
//! Refreshes every table in a [`Manifest`], one entry at a time and in
//! manifest order. Each entry is cleared and reloaded through a
//! [`StagingStore`], timed, and recorded in the [`LogSink`]. A failing entry
//! becomes an `ERROR` record and the batch moves on; only a sink failure stops
//! the batch.

use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::manifest::{LoadEntry, Manifest};
use crate::models::{LoadLogRecord, LoadOutcome, RunContext, RunSummary, Stopwatch};
use crate::sink::{LogSink, SinkError};
use crate::store::StagingStore;

/// Errors that abort a whole batch
#[derive(Error, Debug)]
pub enum RunError {
    #[error("batch {batch_id} aborted: {source}")]
    Sink {
        batch_id: Uuid,
        #[source]
        source: SinkError,
    },
}

/// Sequential clear-and-load over a manifest
pub struct BatchLoader<S, L> {
    manifest: Manifest,
    store: S,
    sink: L,
    entry_timeout: Option<Duration>,
}

impl<S, L> BatchLoader<S, L>
where
    S: StagingStore,
    L: LogSink,
{
    pub fn new(manifest: Manifest, store: S, sink: L) -> Self {
        Self {
            manifest,
            store,
            sink,
            entry_timeout: None,
        }
    }

    /// Abandon any entry that takes longer than `timeout`; it is logged as
    /// an error and its transaction rolls back. Dropping the work does not
    /// stop a statement already running on the server, so pair this with a
    /// shorter [`PgStagingStore::with_statement_timeout`].
    ///
    /// [`PgStagingStore::with_statement_timeout`]: crate::store::PgStagingStore::with_statement_timeout
    pub fn with_entry_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.entry_timeout = timeout;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn sink(&self) -> &L {
        &self.sink
    }

    /// Run one batch over the whole manifest
    pub async fn run(&self) -> Result<RunSummary, RunError> {
        let run = RunContext::start();
        let span = info_span!("batch", batch_id = %run.batch_id);

        async {
            info!(
                batch_id = %run.batch_id,
                started_at = %run.started_at,
                entries = self.manifest.len(),
                "Batch load started"
            );

            let mut summary = RunSummary::new(&run);
            for entry in &self.manifest {
                let record = match self.load_entry(&run, entry).await {
                    Ok(record) => record,
                    Err(e) => {
                        error!(batch_id = %run.batch_id, error = %e, "Batch load aborted");
                        return Err(e);
                    },
                };
                summary.record(&record);
            }

            let summary = summary.finish(&run);
            info!(
                batch_id = %summary.batch_id,
                duration_ms = summary.duration.num_milliseconds(),
                attempted = summary.attempted,
                succeeded = summary.succeeded,
                failed = summary.failed,
                rows_loaded = summary.rows_loaded,
                "Batch load completed"
            );

            Ok(summary)
        }
        .instrument(span)
        .await
    }

    /// Clear and reload one entry, then append its log record. Load failures
    /// end up in the record; only a sink failure is returned as an error.
    pub async fn load_entry(
        &self,
        run: &RunContext,
        entry: &LoadEntry,
    ) -> Result<LoadLogRecord, RunError> {
        let table = entry.qualified_name();
        let watch = Stopwatch::start();

        let outcome = self
            .attempt(entry)
            .instrument(info_span!("entry", table = %table))
            .await;
        let elapsed = watch.elapsed();

        match &outcome {
            LoadOutcome::Loaded { rows } => info!(
                table = %table,
                rows = *rows,
                elapsed_ms = elapsed.num_milliseconds(),
                "✓ {} loaded: {} rows in {} ms",
                table,
                rows,
                elapsed.num_milliseconds()
            ),
            LoadOutcome::Failed { message } => error!(
                table = %table,
                error = %message,
                elapsed_ms = elapsed.num_milliseconds(),
                "✗ {} failed after {} ms: {}",
                table,
                elapsed.num_milliseconds(),
                message
            ),
        }

        let record = LoadLogRecord::new(run, entry, outcome, watch.started_at(), elapsed);
        self.sink
            .append(&record)
            .await
            .map_err(|source| RunError::Sink {
                batch_id: run.batch_id,
                source,
            })?;

        Ok(record)
    }

    async fn attempt(&self, entry: &LoadEntry) -> LoadOutcome {
        let result = match self.entry_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.store.replace(entry)).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!("timed out after {:?}", limit)),
            },
            None => self.store.replace(entry).await.map_err(|e| e.to_string()),
        };

        match result {
            Ok(rows) => LoadOutcome::Loaded { rows },
            Err(message) => LoadOutcome::Failed { message },
        }
    }
}
