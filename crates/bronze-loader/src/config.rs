//! Runtime settings: database pool and batch loader options, from `.env` and
//! the environment.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::manifest::is_identifier;
use crate::sink::DEFAULT_LOG_TABLE;
use crate::store::SourceMode;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Used when `DATABASE_URL` is unset.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/warehouse";

/// Pool bounds. Loading is sequential: one connection for the entry, one for
/// the log sink.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 2;
/// Smallest pool that can hold an entry's transaction and a log append at once.
pub const MIN_DATABASE_MAX_CONNECTIONS: u32 = 2;
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Seconds to wait for a pooled connection.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Seconds before an idle pooled connection is closed.
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Extra time the loader gives the server to cancel a statement that hit the
/// entry timeout before abandoning the entry on its own.
pub const ENTRY_TIMEOUT_GRACE_SECS: u64 = 5;

/// Default manifest location, relative to the working directory.
pub const DEFAULT_MANIFEST_PATH: &str = "manifest.yml";

/// Loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub loader: LoaderConfig,
}

/// Connection pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Batch loader settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    pub manifest_path: PathBuf,
    /// Load-log table, `name` or `schema.name`
    pub log_table: String,
    pub source_mode: SourceMode,
    /// Per-entry time limit; `None` lets an entry run indefinitely
    pub entry_timeout_secs: Option<u64>,
}

impl LoaderConfig {
    /// Server-side statement limit for each entry
    pub fn entry_timeout(&self) -> Option<Duration> {
        self.entry_timeout_secs.map(Duration::from_secs)
    }

    /// Loader-side limit, only reached if the server fails to cancel in time
    pub fn entry_backstop(&self) -> Option<Duration> {
        self.entry_timeout_secs
            .map(|secs| Duration::from_secs(secs.saturating_add(ENTRY_TIMEOUT_GRACE_SECS)))
    }
}

impl Config {
    /// Load configuration from `.env`, environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS")?
                    .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
                min_connections: env_parse("DATABASE_MIN_CONNECTIONS")?
                    .unwrap_or(DEFAULT_DATABASE_MIN_CONNECTIONS),
                connect_timeout_secs: env_parse("DATABASE_CONNECT_TIMEOUT")?
                    .unwrap_or(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS),
                idle_timeout_secs: env_parse("DATABASE_IDLE_TIMEOUT")?
                    .unwrap_or(DEFAULT_DATABASE_IDLE_TIMEOUT_SECS),
            },
            loader: LoaderConfig {
                manifest_path: std::env::var("BRONZE_MANIFEST")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_MANIFEST_PATH)),
                log_table: std::env::var("BRONZE_LOG_TABLE")
                    .unwrap_or_else(|_| DEFAULT_LOG_TABLE.to_string()),
                source_mode: match std::env::var("BRONZE_SOURCE_MODE") {
                    Ok(mode) => mode.parse().map_err(anyhow::Error::msg)?,
                    Err(_) => SourceMode::default(),
                },
                entry_timeout_secs: env_parse("BRONZE_ENTRY_TIMEOUT_SECS")?,
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Reject settings that would fail later at connect or load time
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections < MIN_DATABASE_MAX_CONNECTIONS {
            anyhow::bail!(
                "Database max_connections must be at least {} (one loading entry plus the load log)",
                MIN_DATABASE_MAX_CONNECTIONS
            );
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if !is_table_name(&self.loader.log_table) {
            anyhow::bail!(
                "Log table '{}' must be a table name or schema.table",
                self.loader.log_table
            );
        }

        if self.loader.entry_timeout_secs == Some(0) {
            anyhow::bail!("Entry timeout must be greater than 0 seconds when set");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            loader: LoaderConfig {
                manifest_path: PathBuf::from(DEFAULT_MANIFEST_PATH),
                log_table: DEFAULT_LOG_TABLE.to_string(),
                source_mode: SourceMode::default(),
                entry_timeout_secs: None,
            },
        }
    }
}

/// Parse an optional environment variable; a present but malformed value is an error.
fn env_parse<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid value '{}' for {}: {}", raw, key, e)),
        Err(_) => Ok(None),
    }
}

fn is_table_name(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2 && parts.iter().all(|part| is_identifier(part))
}
