//! SQLite job store.
//!
//! One row per job in `optimisation_jobs`, keyed by `(run_id, position)`.
//! JSON columns hold the combination, the patched config and the metrics;
//! timestamps are RFC 3339 strings with microsecond precision so they sort
//! lexically.
//!
//! `rusqlite` is synchronous, so every call runs on the blocking pool via
//! `tokio::task::spawn_blocking`. A single connection serializes writers.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, Row, params};
use tracing::{debug, info};

use crate::application::ports::{JobRecord, JobStorePort, StoreError, StoredRunSummary};
use crate::domain::optimization::{JobStatus, OptimisationDirection, SearchPlan};
use crate::domain::shared::{NodeId, RunId};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS optimisation_jobs (
    run_id                 TEXT    NOT NULL,
    position               INTEGER NOT NULL,
    name                   TEXT    NOT NULL,
    plan                   TEXT    NOT NULL,
    optimisation_metric    TEXT,
    optimisation_direction TEXT    NOT NULL,
    total_jobs             INTEGER NOT NULL,
    run_created_at         TEXT    NOT NULL,
    status                 TEXT    NOT NULL,
    parameters             TEXT    NOT NULL,
    config                 TEXT    NOT NULL,
    metrics                TEXT    NOT NULL,
    optimisation_score     REAL,
    node_id                TEXT,
    error                  TEXT,
    started_at             TEXT,
    completed_at           TEXT,
    updated_at             TEXT    NOT NULL,
    run_error              TEXT,
    PRIMARY KEY (run_id, position)
);
CREATE INDEX IF NOT EXISTS idx_optimisation_jobs_run_created_at
    ON optimisation_jobs (run_created_at);
";

const UPSERT: &str = r"
INSERT INTO optimisation_jobs (
    run_id, position, name, plan, optimisation_metric, optimisation_direction,
    total_jobs, run_created_at, status, parameters, config, metrics,
    optimisation_score, node_id, error, started_at, completed_at, updated_at,
    run_error
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
ON CONFLICT (run_id, position) DO UPDATE SET
    name = excluded.name,
    plan = excluded.plan,
    optimisation_metric = excluded.optimisation_metric,
    optimisation_direction = excluded.optimisation_direction,
    total_jobs = excluded.total_jobs,
    run_created_at = excluded.run_created_at,
    status = excluded.status,
    parameters = excluded.parameters,
    config = excluded.config,
    metrics = excluded.metrics,
    optimisation_score = excluded.optimisation_score,
    node_id = excluded.node_id,
    error = excluded.error,
    started_at = excluded.started_at,
    completed_at = excluded.completed_at,
    updated_at = excluded.updated_at,
    run_error = excluded.run_error
";

const SELECT_RUN: &str = r"
SELECT run_id, position, name, plan, optimisation_metric, optimisation_direction,
       total_jobs, run_created_at, status, parameters, config, metrics,
       optimisation_score, node_id, error, started_at, completed_at, updated_at,
       run_error
FROM optimisation_jobs
WHERE run_id = ?1
ORDER BY position
";

const SELECT_SUMMARIES: &str = r"
SELECT run_id,
       MIN(name),
       MIN(plan),
       MIN(optimisation_metric),
       MIN(optimisation_direction),
       MAX(total_jobs),
       COUNT(*),
       SUM(CASE WHEN status = 'COMPLETED' THEN 1 ELSE 0 END),
       SUM(CASE WHEN status = 'FAILED' THEN 1 ELSE 0 END),
       SUM(CASE WHEN status = 'RUNNING' THEN 1 ELSE 0 END),
       MIN(run_created_at) AS created_at,
       MAX(updated_at),
       MAX(run_error)
FROM optimisation_jobs
GROUP BY run_id
ORDER BY created_at DESC, run_id
";

/// SQLite implementation of `JobStorePort`.
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    /// Open (or create) the database file and apply the schema.
    ///
    /// Parent directories are created when missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let conn = Connection::open(path).map_err(|e| StoreError::Connection(e.to_string()))?;
        let store = Self::initialise(conn)?;
        info!(path = %path.display(), "SQLite job store opened");
        Ok(store)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::initialise(conn)
    }

    fn initialise(conn: Connection) -> Result<Self, StoreError> {
        let mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| StoreError::Query(e.to_string()))?;
        debug!(journal_mode = %mode, "SQLite schema ready");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&conn.lock()))
            .await
            .map_err(|e| StoreError::TaskJoin(e.to_string()))?
    }

    /// Number of stored rows.
    pub async fn row_count(&self) -> Result<u64, StoreError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM optimisation_jobs", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|count| u64::try_from(count).unwrap_or_default())
            .map_err(|e| StoreError::Query(e.to_string()))
        })
        .await
    }
}

#[async_trait]
impl JobStorePort for SqliteJobStore {
    async fn upsert_job(&self, record: &JobRecord) -> Result<(), StoreError> {
        let row = EncodedRecord::encode(record)?;
        let run_id = record.run_id.clone();
        let position = record.position;

        self.with_conn(move |conn| {
            conn.execute(
                UPSERT,
                params![
                    row.run_id,
                    row.position,
                    row.name,
                    row.plan,
                    row.optimisation_metric,
                    row.optimisation_direction,
                    row.total_jobs,
                    row.run_created_at,
                    row.status,
                    row.parameters,
                    row.config,
                    row.metrics,
                    row.optimisation_score,
                    row.node_id,
                    row.error,
                    row.started_at,
                    row.completed_at,
                    row.updated_at,
                    row.run_error,
                ],
            )
            .map_err(|e| StoreError::Query(e.to_string()))?;
            Ok(())
        })
        .await?;

        debug!(%run_id, position, "Job row upserted");
        Ok(())
    }

    async fn list_run_summaries(&self) -> Result<Vec<StoredRunSummary>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(SELECT_SUMMARIES)
                .map_err(|e| StoreError::Query(e.to_string()))?;
            let rows = stmt
                .query_map([], read_summary_row)
                .map_err(|e| StoreError::Query(e.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| StoreError::Query(e.to_string()))?;
            rows.into_iter().map(RawSummary::decode).collect()
        })
        .await
    }

    async fn load_run_jobs(&self, run_id: &RunId) -> Result<Vec<JobRecord>, StoreError> {
        let run_id = run_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(SELECT_RUN)
                .map_err(|e| StoreError::Query(e.to_string()))?;
            let rows = stmt
                .query_map(params![run_id], read_job_row)
                .map_err(|e| StoreError::Query(e.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| StoreError::Query(e.to_string()))?;
            rows.into_iter().map(EncodedRecord::decode).collect()
        })
        .await
    }
}

// ============================================================================
// Row mapping
// ============================================================================

/// A job row as stored: enums as strings, JSON as text.
struct EncodedRecord {
    run_id: String,
    position: i64,
    name: String,
    plan: String,
    optimisation_metric: Option<String>,
    optimisation_direction: String,
    total_jobs: i64,
    run_created_at: String,
    status: String,
    parameters: String,
    config: String,
    metrics: String,
    optimisation_score: Option<f64>,
    node_id: Option<String>,
    error: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
    updated_at: String,
    run_error: Option<String>,
}

impl EncodedRecord {
    fn encode(record: &JobRecord) -> Result<Self, StoreError> {
        Ok(Self {
            run_id: record.run_id.to_string(),
            position: i64::from(record.position),
            name: record.name.clone(),
            plan: record.plan.as_str().to_string(),
            optimisation_metric: record.optimisation_metric.clone(),
            optimisation_direction: record.optimisation_direction.as_str().to_string(),
            total_jobs: i64::from(record.total_jobs),
            run_created_at: format_ts(record.run_created_at),
            status: record.status.as_str().to_string(),
            parameters: to_json(&record.parameters)?,
            config: to_json(&record.config)?,
            metrics: to_json(&record.metrics)?,
            optimisation_score: record.optimisation_score.filter(|s| s.is_finite()),
            node_id: record.node_id.as_ref().map(ToString::to_string),
            error: record.error.clone(),
            started_at: record.started_at.map(format_ts),
            completed_at: record.completed_at.map(format_ts),
            updated_at: format_ts(record.updated_at),
            run_error: record.run_error.clone(),
        })
    }

    fn decode(self) -> Result<JobRecord, StoreError> {
        Ok(JobRecord {
            run_id: RunId::new(self.run_id),
            position: to_u32("position", self.position)?,
            name: self.name,
            plan: parse_plan(&self.plan)?,
            optimisation_metric: self.optimisation_metric,
            optimisation_direction: parse_direction(&self.optimisation_direction)?,
            total_jobs: to_u32("total_jobs", self.total_jobs)?,
            run_created_at: parse_ts("run_created_at", &self.run_created_at)?,
            run_error: self.run_error,
            status: JobStatus::parse(&self.status)
                .ok_or_else(|| StoreError::MissingField(format!("status={}", self.status)))?,
            parameters: from_json(&self.parameters)?,
            config: from_json(&self.config)?,
            metrics: from_json(&self.metrics)?,
            optimisation_score: self.optimisation_score,
            node_id: self.node_id.map(NodeId::new),
            error: self.error,
            started_at: self
                .started_at
                .as_deref()
                .map(|ts| parse_ts("started_at", ts))
                .transpose()?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(|ts| parse_ts("completed_at", ts))
                .transpose()?,
            updated_at: parse_ts("updated_at", &self.updated_at)?,
        })
    }
}

fn read_job_row(row: &Row<'_>) -> rusqlite::Result<EncodedRecord> {
    Ok(EncodedRecord {
        run_id: row.get(0)?,
        position: row.get(1)?,
        name: row.get(2)?,
        plan: row.get(3)?,
        optimisation_metric: row.get(4)?,
        optimisation_direction: row.get(5)?,
        total_jobs: row.get(6)?,
        run_created_at: row.get(7)?,
        status: row.get(8)?,
        parameters: row.get(9)?,
        config: row.get(10)?,
        metrics: row.get(11)?,
        optimisation_score: row.get(12)?,
        node_id: row.get(13)?,
        error: row.get(14)?,
        started_at: row.get(15)?,
        completed_at: row.get(16)?,
        updated_at: row.get(17)?,
        run_error: row.get(18)?,
    })
}

/// Aggregate columns of one run.
struct RawSummary {
    run_id: String,
    name: String,
    plan: String,
    optimisation_metric: Option<String>,
    optimisation_direction: String,
    total_jobs: i64,
    rows: i64,
    completed: i64,
    failed: i64,
    running: i64,
    created_at: String,
    updated_at: String,
    run_error: Option<String>,
}

impl RawSummary {
    fn decode(self) -> Result<StoredRunSummary, StoreError> {
        Ok(StoredRunSummary {
            run_id: RunId::new(self.run_id),
            name: self.name,
            plan: parse_plan(&self.plan)?,
            optimisation_metric: self.optimisation_metric,
            optimisation_direction: parse_direction(&self.optimisation_direction)?,
            total_jobs: to_u32("total_jobs", self.total_jobs.max(self.rows))?,
            completed_jobs: to_u32("completed_jobs", self.completed)?,
            failed_jobs: to_u32("failed_jobs", self.failed)?,
            running_jobs: to_u32("running_jobs", self.running)?,
            created_at: parse_ts("run_created_at", &self.created_at)?,
            updated_at: parse_ts("updated_at", &self.updated_at)?,
            run_error: self.run_error,
        })
    }
}

fn read_summary_row(row: &Row<'_>) -> rusqlite::Result<RawSummary> {
    Ok(RawSummary {
        run_id: row.get(0)?,
        name: row.get(1)?,
        plan: row.get(2)?,
        optimisation_metric: row.get(3)?,
        optimisation_direction: row.get(4)?,
        total_jobs: row.get(5)?,
        rows: row.get(6)?,
        completed: row.get(7)?,
        failed: row.get(8)?,
        running: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
        run_error: row.get(12)?,
    })
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(field: &str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::MissingField(format!("{field}: {e}")))
}

fn parse_plan(value: &str) -> Result<SearchPlan, StoreError> {
    SearchPlan::parse(value).ok_or_else(|| StoreError::MissingField(format!("plan={value}")))
}

fn parse_direction(value: &str) -> Result<OptimisationDirection, StoreError> {
    OptimisationDirection::parse(value)
        .ok_or_else(|| StoreError::MissingField(format!("optimisation_direction={value}")))
}

fn to_u32(field: &str, value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::MissingField(format!("{field}={value}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, StoreError> {
    serde_json::from_str(text).map_err(|e| StoreError::Serialization(e.to_string()))
}
