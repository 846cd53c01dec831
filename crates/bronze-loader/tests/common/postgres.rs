//! PostgreSQL test container for loader integration tests
//!
//! These tests require Docker. Run with:
//!
//! ```bash
//! cargo test -p bronze-loader --test postgres_tests -- --ignored --nocapture
//! ```

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

/// PostgreSQL container with the load-log migration applied
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    /// Start a container, connect, and run `migrations/`
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        debug!("PostgreSQL connection: {}", connection_string);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create a loosely typed bronze destination table
    pub async fn create_bronze_table(&self, table: &str) -> Result<()> {
        sqlx::raw_sql(&format!(
            "CREATE TABLE bronze.{} (id TEXT, name TEXT, country TEXT)",
            table
        ))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to create bronze.{}", table))?;
        Ok(())
    }

    pub async fn count(&self, table: &str) -> Result<i64> {
        let count = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM bronze.{}", table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
