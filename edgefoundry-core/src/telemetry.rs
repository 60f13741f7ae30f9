//! Inference telemetry backed by SQLite.
//!
//! Every completed inference appends one immutable row to the `telemetry`
//! table. The table layout is shared with external tooling that reads the
//! same file, so column names and types are fixed.
//!
//! Each operation opens its own connection: the worker and short-lived CLI
//! processes point at the same file, and SQLite's WAL journal plus a busy
//! timeout serialize concurrent writers.

use chrono::Local;
use rusqlite::{Connection, Row, params};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

use crate::error::TelemetryError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const CREATE_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS telemetry (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        prompt_length INTEGER NOT NULL,
        latency_ms REAL NOT NULL,
        tokens_generated INTEGER NOT NULL,
        tokens_per_second REAL NOT NULL,
        memory_mb REAL NOT NULL,
        model_path TEXT,
        temperature REAL,
        max_tokens INTEGER
    )";

const SELECT_COLUMNS: &str = "id, timestamp, prompt_length, latency_ms, tokens_generated, \
     tokens_per_second, memory_mb, model_path, temperature, max_tokens";

/// Measurements of one completed inference, before the store stamps it.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub prompt_length: u64,
    pub latency_ms: f64,
    pub tokens_generated: u64,
    pub memory_mb: f64,
    pub model_path: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

/// A stored telemetry row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub id: i64,
    pub timestamp: String,
    pub prompt_length: u64,
    pub latency_ms: f64,
    pub tokens_generated: u64,
    pub tokens_per_second: f64,
    pub memory_mb: f64,
    pub model_path: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl TelemetryRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            prompt_length: row.get::<_, i64>(2)?.max(0) as u64,
            latency_ms: row.get(3)?,
            tokens_generated: row.get::<_, i64>(4)?.max(0) as u64,
            tokens_per_second: row.get(5)?,
            memory_mb: row.get(6)?,
            model_path: row.get(7)?,
            temperature: row.get(8)?,
            max_tokens: row
                .get::<_, Option<i64>>(9)?
                .map(|v| v.clamp(0, u32::MAX as i64) as u32),
        })
    }
}

/// Aggregate statistics over the full history plus a window of recent rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_count: u64,
    pub avg_latency_ms: f64,
    pub avg_tokens_per_second: f64,
    pub avg_memory_mb: f64,
    pub first_timestamp: Option<String>,
    pub last_timestamp: Option<String>,
    /// Most recent rows, newest first.
    ///
    /// "Newest" is recording order. Timestamps are local wall-clock time and
    /// can step backwards, so they never decide the order.
    pub recent: Vec<TelemetryRecord>,
}

/// Throughput in tokens per second; zero when no time elapsed.
pub fn tokens_per_second(tokens_generated: u64, latency_ms: f64) -> f64 {
    if latency_ms > 0.0 {
        tokens_generated as f64 / (latency_ms / 1000.0)
    } else {
        0.0
    }
}

/// Approximate token count: whitespace-separated words.
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Resident memory of the current process in megabytes.
pub fn memory_usage_mb() -> f64 {
    let Ok(pid) = sysinfo::get_current_pid() else {
        return 0.0;
    };
    let mut sys = System::new();
    sys.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::new().with_memory(),
    );
    sys.process(pid)
        .map(|p| p.memory() as f64 / 1024.0 / 1024.0)
        .unwrap_or(0.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Handle to the telemetry database file.
#[derive(Debug, Clone)]
pub struct TelemetryStore {
    path: PathBuf,
}

impl TelemetryStore {
    /// Open (and if needed create) the telemetry database at `path`.
    ///
    /// Initialization is idempotent and safe to run from several processes
    /// against the same file.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, TelemetryError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Self { path };
        let conn = store.connect()?;
        conn.execute_batch(CREATE_TABLE)?;
        tracing::debug!(path = %store.path.display(), "Telemetry store ready");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, TelemetryError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        Ok(conn)
    }

    /// Append one row and return its id.
    pub fn record(&self, record: &NewRecord) -> Result<i64, TelemetryError> {
        let tps = tokens_per_second(record.tokens_generated, record.latency_ms);
        let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string();

        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO telemetry
             (timestamp, prompt_length, latency_ms, tokens_generated, tokens_per_second,
              memory_mb, model_path, temperature, max_tokens)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                timestamp,
                record.prompt_length as i64,
                record.latency_ms,
                record.tokens_generated as i64,
                tps,
                record.memory_mb,
                record.model_path,
                record.temperature,
                record.max_tokens,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        tracing::debug!(id, latency_ms = record.latency_ms, tokens_per_second = tps, "Telemetry recorded");
        Ok(id)
    }

    /// [`record`](Self::record) on the blocking thread pool.
    pub async fn record_async(&self, record: NewRecord) -> Result<i64, TelemetryError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.record(&record))
            .await
            .map_err(|e| TelemetryError::Join {
                message: e.to_string(),
            })?
    }

    /// Aggregates over every row, plus the `limit` most recent rows.
    pub fn summary(&self, limit: usize) -> Result<MetricsSummary, TelemetryError> {
        let conn = self.connect()?;

        let (total, avg_latency, avg_tps, avg_memory, last, first) = conn.query_row(
            "SELECT COUNT(*), AVG(latency_ms), AVG(tokens_per_second), AVG(memory_mb),
                    (SELECT timestamp FROM telemetry ORDER BY id DESC LIMIT 1),
                    (SELECT timestamp FROM telemetry ORDER BY id ASC LIMIT 1)
             FROM telemetry",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<f64>>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            },
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM telemetry ORDER BY id DESC LIMIT ?1"
        ))?;
        let recent = stmt
            .query_map(params![limit.min(i64::MAX as usize) as i64], TelemetryRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(MetricsSummary {
            total_count: total.max(0) as u64,
            avg_latency_ms: round2(avg_latency.unwrap_or(0.0)),
            avg_tokens_per_second: round2(avg_tps.unwrap_or(0.0)),
            avg_memory_mb: round2(avg_memory.unwrap_or(0.0)),
            first_timestamp: first,
            last_timestamp: last,
            recent,
        })
    }

    /// Every stored row, newest first.
    pub fn all_records(&self) -> Result<Vec<TelemetryRecord>, TelemetryError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM telemetry ORDER BY id DESC"
        ))?;
        let rows = stmt
            .query_map([], TelemetryRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
