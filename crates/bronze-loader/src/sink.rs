//! Load-log sink
//!
//! The loader appends exactly one [`LoadLogRecord`] per manifest entry and
//! never reads, updates or deletes what it has written.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use thiserror::Error;
use tracing::debug;

use crate::models::LoadLogRecord;

/// Default load-log table, created by `migrations/`
pub const DEFAULT_LOG_TABLE: &str = "bronze.load_log";

/// Failure to append a load-log record. Always fatal to the run.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to append load log record for {table}: {source}")]
    Append {
        table: String,
        #[source]
        source: sqlx::Error,
    },
}

/// Append-only destination for load-log records
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn append(&self, record: &LoadLogRecord) -> Result<(), SinkError>;
}

/// Writes load-log records into a PostgreSQL table
#[derive(Debug, Clone)]
pub struct PgLogSink {
    pool: PgPool,
    insert_sql: String,
}

impl PgLogSink {
    /// Sink writing to [`DEFAULT_LOG_TABLE`]
    pub fn new(pool: PgPool) -> Self {
        Self::with_table(pool, DEFAULT_LOG_TABLE)
    }

    /// Sink writing to `table` (`name` or `schema.name`). The name is quoted;
    /// it should already have passed config validation.
    pub fn with_table(pool: PgPool, table: &str) -> Self {
        Self {
            pool,
            insert_sql: insert_statement(table),
        }
    }
}

#[async_trait]
impl LogSink for PgLogSink {
    async fn append(&self, record: &LoadLogRecord) -> Result<(), SinkError> {
        let rows_loaded = i64::try_from(record.rows_loaded).unwrap_or(i64::MAX);

        sqlx::query(&self.insert_sql)
            .bind(record.batch_id)
            .bind(&record.schema)
            .bind(&record.table)
            .bind(&record.source_path)
            .bind(record.status.as_str())
            .bind(&record.message)
            .bind(record.started_at)
            .bind(record.ended_at)
            .bind(record.duration.num_milliseconds())
            .bind(rows_loaded)
            .execute(&self.pool)
            .await
            .map_err(|source| SinkError::Append {
                table: record.qualified_name(),
                source,
            })?;

        debug!(
            batch_id = %record.batch_id,
            table = %record.qualified_name(),
            status = %record.status,
            "Appended load log record"
        );

        Ok(())
    }
}

fn insert_statement(table: &str) -> String {
    let quoted = table
        .split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".");

    format!(
        r#"INSERT INTO {} (
            batch_id, schema_name, table_name, source_path, status,
            message, started_at, ended_at, duration_ms, rows_loaded
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"#,
        quoted
    )
}
