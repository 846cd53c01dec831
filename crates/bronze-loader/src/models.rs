//! Run context, per-entry outcomes and load-log records

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

use crate::manifest::LoadEntry;

/// Message stored on every successful load record.
pub const SUCCESS_MESSAGE: &str = "Loaded successfully";

/// Wall-clock start paired with a monotonic clock, so that a measured
/// duration never goes negative when the system clock is adjusted.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started_at: DateTime<Utc>,
    clock: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            clock: Instant::now(),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_std(self.clock.elapsed()).unwrap_or_else(|_| Duration::zero())
    }
}

/// Identity and start time of one batch run
#[derive(Debug, Clone)]
pub struct RunContext {
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    watch: Stopwatch,
}

impl RunContext {
    /// Start a new run with a fresh batch id
    pub fn start() -> Self {
        let watch = Stopwatch::start();
        Self {
            batch_id: Uuid::new_v4(),
            started_at: watch.started_at(),
            watch,
        }
    }

    /// Time since the run started
    pub fn elapsed(&self) -> Duration {
        self.watch.elapsed()
    }
}

/// Result of one per-entry unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { rows: u64 },
    Failed { message: String },
}

impl LoadOutcome {
    pub fn status(&self) -> LoadStatus {
        match self {
            LoadOutcome::Loaded { .. } => LoadStatus::Success,
            LoadOutcome::Failed { .. } => LoadStatus::Error,
        }
    }
}

/// Status column of the load log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LoadStatus {
    Success,
    Error,
}

impl LoadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row of the load log, describing one entry of one batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadLogRecord {
    pub batch_id: Uuid,
    pub schema: String,
    pub table: String,
    pub source_path: String,
    pub status: LoadStatus,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub rows_loaded: u64,
}

impl LoadLogRecord {
    /// Build the record for `entry` from its outcome. Failed entries always
    /// carry zero rows.
    ///
    /// Both `started_at` and `duration` are cut to whole milliseconds, the
    /// grain of the log table's `duration_ms`, so `ended_at - started_at`
    /// equals the stored duration exactly.
    pub fn new(
        run: &RunContext,
        entry: &LoadEntry,
        outcome: LoadOutcome,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        let started_at = started_at.trunc_subsecs(3);
        let duration = Duration::milliseconds(duration.num_milliseconds());
        let status = outcome.status();
        let (message, rows_loaded) = match outcome {
            LoadOutcome::Loaded { rows } => (SUCCESS_MESSAGE.to_string(), rows),
            LoadOutcome::Failed { message } => (message, 0),
        };

        Self {
            batch_id: run.batch_id,
            schema: entry.schema.clone(),
            table: entry.table.clone(),
            source_path: entry.source_path.clone(),
            status,
            message,
            started_at,
            ended_at: started_at + duration,
            duration,
            rows_loaded,
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    pub fn is_success(&self) -> bool {
        self.status == LoadStatus::Success
    }
}

/// Aggregate result of one batch run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    /// Entries attempted; equals the manifest length for a completed run
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub rows_loaded: u64,
}

impl RunSummary {
    pub(crate) fn new(run: &RunContext) -> Self {
        Self {
            batch_id: run.batch_id,
            started_at: run.started_at,
            ended_at: run.started_at,
            duration: Duration::zero(),
            attempted: 0,
            succeeded: 0,
            failed: 0,
            rows_loaded: 0,
        }
    }

    pub(crate) fn record(&mut self, record: &LoadLogRecord) {
        self.attempted += 1;
        if record.is_success() {
            self.succeeded += 1;
            self.rows_loaded += record.rows_loaded;
        } else {
            self.failed += 1;
        }
    }

    pub(crate) fn finish(mut self, run: &RunContext) -> Self {
        self.duration = run.elapsed();
        self.ended_at = run.started_at + self.duration;
        self
    }
}

mod duration_millis {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(value.num_milliseconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        i64::deserialize(deserializer).map(Duration::milliseconds)
    }
}
