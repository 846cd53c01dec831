//! Staging store: clears and bulk-loads bronze tables
//!
//! [`StagingStore`] is the seam between the batch loader and the storage
//! engine. [`PgStagingStore`] implements it with PostgreSQL `TRUNCATE` and
//! `COPY`, running both statements in one transaction per entry: a failed
//! entry rolls back and leaves the table as it was before the run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;
use sqlx::{Executor, Postgres, Transaction};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::manifest::LoadEntry;

/// Read size when streaming a source file over `COPY ... FROM STDIN`.
const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Failure of one clear-and-load unit of work
#[derive(Error, Debug)]
pub enum LoadError {
    /// TRUNCATE failed; nothing was loaded
    #[error("failed to clear {table}: {source}")]
    Clear {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    /// COPY was rejected by the database
    #[error("failed to load {table} from '{path}': {source}")]
    Copy {
        table: String,
        path: String,
        #[source]
        source: sqlx::Error,
    },

    /// Source file could not be read by the loader process (client mode)
    #[error("cannot read source file '{path}': {source}")]
    Source {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Transaction begin/commit failed
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Who reads the source file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// The database server opens the file (`COPY ... FROM '<path>'`)
    #[default]
    Server,
    /// The loader streams the file (`COPY ... FROM STDIN`)
    Client,
}

impl std::str::FromStr for SourceMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "server" => Ok(SourceMode::Server),
            "client" | "stdin" => Ok(SourceMode::Client),
            _ => Err(format!("Invalid source mode: {} (expected server or client)", s)),
        }
    }
}

impl std::fmt::Display for SourceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceMode::Server => write!(f, "server"),
            SourceMode::Client => write!(f, "client"),
        }
    }
}

/// Layout shared by every source file: semicolon-delimited, `NULL` token,
/// one header line. Raw files are not CSV-quoted, so the quote character is
/// set to a control byte that never occurs in them and `"` loads verbatim.
const COPY_OPTIONS: &str =
    "(FORMAT csv, DELIMITER ';', NULL 'NULL', HEADER true, QUOTE E'\\x01')";

/// Storage engine operations needed by the batch loader
#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Remove every row from the entry's table, then bulk-load its source
    /// file. Returns the number of rows written.
    async fn replace(&self, entry: &LoadEntry) -> Result<u64, LoadError>;
}

/// PostgreSQL staging store
#[derive(Debug, Clone)]
pub struct PgStagingStore {
    pool: PgPool,
    mode: SourceMode,
    statement_timeout: Option<Duration>,
}

impl PgStagingStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            mode: SourceMode::default(),
            statement_timeout: None,
        }
    }

    pub fn with_mode(mut self, mode: SourceMode) -> Self {
        self.mode = mode;
        self
    }

    /// Have the server cancel any clear or load statement running longer
    /// than `limit`. The cancelled entry fails, rolls back and releases its
    /// connection.
    pub fn with_statement_timeout(mut self, limit: Option<Duration>) -> Self {
        self.statement_timeout = limit;
        self
    }

    pub fn mode(&self) -> SourceMode {
        self.mode
    }

    async fn copy_from_server(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        entry: &LoadEntry,
    ) -> Result<u64, LoadError> {
        let sql = copy_statement(entry, self.mode);
        let result = (&mut **tx)
            .execute(sqlx::raw_sql(&sql))
            .await
            .map_err(|source| copy_error(entry, source))?;
        Ok(result.rows_affected())
    }

    async fn copy_from_client(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        entry: &LoadEntry,
    ) -> Result<u64, LoadError> {
        let source_error = |source| LoadError::Source {
            path: entry.source_path.clone(),
            source,
        };

        let mut file = tokio::fs::File::open(&entry.source_path)
            .await
            .map_err(source_error)?;

        let sql = copy_statement(entry, self.mode);
        let mut copy = tx
            .copy_in_raw(&sql)
            .await
            .map_err(|source| copy_error(entry, source))?;

        let mut buf = vec![0u8; COPY_CHUNK_SIZE];
        loop {
            let n = match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    let message = e.to_string();
                    // Rollback follows anyway; the abort result adds nothing
                    let _ = copy.abort(message).await;
                    return Err(source_error(e));
                },
            };
            copy.send(&buf[..n])
                .await
                .map_err(|source| copy_error(entry, source))?;
        }

        copy.finish().await.map_err(|source| copy_error(entry, source))
    }
}

#[async_trait]
impl StagingStore for PgStagingStore {
    async fn replace(&self, entry: &LoadEntry) -> Result<u64, LoadError> {
        let mut tx = self.pool.begin().await?;

        if let Some(limit) = self.statement_timeout {
            let sql = statement_timeout_statement(limit);
            (&mut *tx)
                .execute(sqlx::raw_sql(&sql))
                .await?;
        }

        let sql = truncate_statement(entry);
        (&mut *tx)
            .execute(sqlx::raw_sql(&sql))
            .await
            .map_err(|source| LoadError::Clear {
                table: entry.qualified_name(),
                source,
            })?;

        let rows = match self.mode {
            SourceMode::Server => self.copy_from_server(&mut tx, entry).await?,
            SourceMode::Client => self.copy_from_client(&mut tx, entry).await?,
        };

        tx.commit().await?;

        debug!(table = %entry.qualified_name(), rows, mode = %self.mode, "Committed replace");
        Ok(rows)
    }
}

fn copy_error(entry: &LoadEntry, source: sqlx::Error) -> LoadError {
    LoadError::Copy {
        table: entry.qualified_name(),
        path: entry.source_path.clone(),
        source,
    }
}

fn qualified_table(entry: &LoadEntry) -> String {
    format!("{}.{}", quote_ident(&entry.schema), quote_ident(&entry.table))
}

pub(crate) fn truncate_statement(entry: &LoadEntry) -> String {
    format!("TRUNCATE TABLE {}", qualified_table(entry))
}

/// Scoped to the entry's transaction.
pub(crate) fn statement_timeout_statement(limit: Duration) -> String {
    format!("SET LOCAL statement_timeout = {}", limit.as_millis().max(1))
}

pub(crate) fn copy_statement(entry: &LoadEntry, mode: SourceMode) -> String {
    let source = match mode {
        SourceMode::Server => quote_literal(&entry.source_path),
        SourceMode::Client => "STDIN".to_string(),
    };
    format!(
        "COPY {} FROM {} WITH {}",
        qualified_table(entry),
        source,
        COPY_OPTIONS
    )
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn location() -> LoadEntry {
        LoadEntry::new("bronze", "location", "/data/location.csv")
    }

    #[test]
    fn test_copy_options_disable_csv_quoting() {
        assert_eq!(
            COPY_OPTIONS,
            r"(FORMAT csv, DELIMITER ';', NULL 'NULL', HEADER true, QUOTE E'\x01')"
        );
    }

    #[test]
    fn test_statement_timeout_in_milliseconds() {
        assert_eq!(
            statement_timeout_statement(Duration::from_secs(90)),
            "SET LOCAL statement_timeout = 90000"
        );
        assert_eq!(
            statement_timeout_statement(Duration::from_micros(10)),
            "SET LOCAL statement_timeout = 1"
        );
    }

    #[test]
    fn test_truncate_statement_quotes_identifiers() {
        assert_eq!(
            truncate_statement(&location()),
            r#"TRUNCATE TABLE "bronze"."location""#
        );
        let odd = LoadEntry::new("bronze", r#"we"ird"#, "x.csv");
        assert_eq!(truncate_statement(&odd), r#"TRUNCATE TABLE "bronze"."we""ird""#);
    }

    #[test]
    fn test_server_copy_reads_path_literal() {
        let sql = copy_statement(&location(), SourceMode::Server);
        assert_eq!(
            sql,
            format!(
                r#"COPY "bronze"."location" FROM '/data/location.csv' WITH {}"#,
                COPY_OPTIONS
            )
        );
    }

    #[test]
    fn test_server_copy_escapes_quotes_in_path() {
        let entry = LoadEntry::new("bronze", "location", "/data/o'brien.csv");
        let sql = copy_statement(&entry, SourceMode::Server);
        assert!(sql.contains("FROM '/data/o''brien.csv'"));
    }

    #[test]
    fn test_client_copy_reads_stdin() {
        let sql = copy_statement(&location(), SourceMode::Client);
        assert!(sql.starts_with(r#"COPY "bronze"."location" FROM STDIN WITH"#));
        assert!(!sql.contains("/data/location.csv"));
    }

    #[test]
    fn test_source_mode_from_str() {
        assert_eq!("server".parse::<SourceMode>().unwrap(), SourceMode::Server);
        assert_eq!("STDIN".parse::<SourceMode>().unwrap(), SourceMode::Client);
        assert!("s3".parse::<SourceMode>().is_err());
    }
}
