//! Common test utilities for bronze loader tests
//!
//! - In-memory [`StagingStore`] and [`LogSink`] implementations for exercising
//!   the batch loader without a database
//! - Source-file fixtures in a temporary directory
//! - PostgreSQL testcontainer (see [`postgres`])

#![allow(dead_code)]

pub mod postgres;

use async_trait::async_trait;
use bronze_loader::{LoadEntry, LoadError, LoadLogRecord, LogSink, SinkError, StagingStore};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Header line used by every fixture file
pub const HEADER: &str = "id;name;country";

/// Initialize tracing for tests; safe to call from every test
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,bronze_loader=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}

/// Messages of every tracing event emitted while the returned guard is held,
/// on the current thread only
pub fn capture_events() -> (CapturedEvents, tracing::subscriber::DefaultGuard) {
    use tracing_subscriber::layer::SubscriberExt;

    let events = CapturedEvents::default();
    let subscriber = tracing_subscriber::registry().with(events.clone());
    (events, tracing::subscriber::set_default(subscriber))
}

#[derive(Clone, Default)]
pub struct CapturedEvents {
    messages: Arc<Mutex<Vec<String>>>,
}

impl CapturedEvents {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().expect("messages lock").clone()
    }

    /// Index of the first message starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.messages().iter().position(|m| m.starts_with(prefix))
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for CapturedEvents {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = MessageVisitor(None);
        event.record(&mut visitor);
        if let Some(message) = visitor.0 {
            self.messages.lock().expect("messages lock").push(message);
        }
    }
}

struct MessageVisitor(Option<String>);

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = Some(format!("{:?}", value));
        }
    }
}

// ============================================================================
// Source Fixtures
// ============================================================================

/// Temporary directory of semicolon-delimited source files
pub struct SourceDir {
    dir: TempDir,
}

impl SourceDir {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    /// Write `name` with the fixture header followed by `rows`; returns its path
    pub fn write(&self, name: &str, rows: &[&str]) -> String {
        let mut content = String::from(HEADER);
        content.push('\n');
        for row in rows {
            content.push_str(row);
            content.push('\n');
        }
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).expect("Failed to write fixture");
        path.to_string_lossy().into_owned()
    }

    /// Path inside the directory that is never created
    pub fn missing(&self, name: &str) -> String {
        self.dir.path().join(name).to_string_lossy().into_owned()
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

// ============================================================================
// In-memory Staging Store
// ============================================================================

/// Staging store holding tables as lists of raw data lines.
///
/// Unknown tables fail the clear step; unreadable files fail the load step.
/// A failed replace leaves the table untouched, matching the transactional
/// PostgreSQL store.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Vec<String>>>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn with_tables(names: &[&str]) -> Self {
        let store = Self::default();
        {
            let mut tables = store.tables.lock().expect("tables lock");
            for name in names {
                tables.insert(name.to_string(), Vec::new());
            }
        }
        store
    }

    /// Make every replace of `table` take at least `delay`
    pub fn with_delay(mut self, table: &str, delay: Duration) -> Self {
        self.delays.insert(table.to_string(), delay);
        self
    }

    pub fn seed(&self, table: &str, rows: &[&str]) {
        self.tables
            .lock()
            .expect("tables lock")
            .insert(table.to_string(), rows.iter().map(|r| r.to_string()).collect());
    }

    pub fn rows(&self, table: &str) -> Option<Vec<String>> {
        self.tables.lock().expect("tables lock").get(table).cloned()
    }

    /// Tables passed to `replace`, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl StagingStore for MemoryStore {
    async fn replace(&self, entry: &LoadEntry) -> Result<u64, LoadError> {
        let table = entry.qualified_name();
        self.calls.lock().expect("calls lock").push(table.clone());

        if let Some(delay) = self.delays.get(&table) {
            tokio::time::sleep(*delay).await;
        }

        if !self.tables.lock().expect("tables lock").contains_key(&table) {
            return Err(LoadError::Clear {
                table: table.clone(),
                source: sqlx::Error::Protocol(format!("relation \"{}\" does not exist", table)),
            });
        }

        let content = tokio::fs::read_to_string(&entry.source_path)
            .await
            .map_err(|source| LoadError::Source {
                path: entry.source_path.clone(),
                source,
            })?;

        let rows: Vec<String> = content
            .lines()
            .skip(1)
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect();
        let count = rows.len() as u64;

        self.tables.lock().expect("tables lock").insert(table, rows);
        Ok(count)
    }
}

// ============================================================================
// In-memory Log Sinks
// ============================================================================

/// Sink keeping every appended record in memory
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<LoadLogRecord>>,
}

impl MemorySink {
    pub fn records(&self) -> Vec<LoadLogRecord> {
        self.records.lock().expect("records lock").clone()
    }
}

#[async_trait]
impl LogSink for MemorySink {
    async fn append(&self, record: &LoadLogRecord) -> Result<(), SinkError> {
        self.records.lock().expect("records lock").push(record.clone());
        Ok(())
    }
}

/// Sink that accepts `capacity` records and then fails like a log table whose
/// pool has no free connection
pub struct FailingSink {
    capacity: usize,
    inner: MemorySink,
}

impl FailingSink {
    pub fn after(capacity: usize) -> Self {
        Self {
            capacity,
            inner: MemorySink::default(),
        }
    }

    pub fn records(&self) -> Vec<LoadLogRecord> {
        self.inner.records()
    }
}

#[async_trait]
impl LogSink for FailingSink {
    async fn append(&self, record: &LoadLogRecord) -> Result<(), SinkError> {
        if self.inner.records().len() >= self.capacity {
            return Err(SinkError::Append {
                table: record.qualified_name(),
                source: sqlx::Error::PoolTimedOut,
            });
        }
        self.inner.append(record).await
    }
}
