//! Job Store Port (Driven Port)
//!
//! Durable record of every job, keyed by `(run_id, position)`. Rows carry the
//! run fields needed to rebuild a run after it leaves the live registry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::optimization::{
    Combination, Job, JobStatus, MetricsMap, OptimisationDirection, ReconstitutedJobParams, Run,
    RunStatus, SearchPlan,
};
use crate::domain::shared::{NodeId, RunId};

/// One stored job row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Owning run.
    pub run_id: RunId,
    /// 1-based position.
    pub position: u32,
    /// Run name.
    pub name: String,
    /// Run search plan.
    pub plan: SearchPlan,
    /// Run metric key.
    pub optimisation_metric: Option<String>,
    /// Run direction.
    pub optimisation_direction: OptimisationDirection,
    /// Number of jobs in the run.
    pub total_jobs: u32,
    /// Run creation time.
    pub run_created_at: DateTime<Utc>,
    /// Reason the run was aborted, once it was. Only aborted runs carry one.
    #[serde(default)]
    pub run_error: Option<String>,
    /// Job status.
    pub status: JobStatus,
    /// Combination.
    pub parameters: Combination,
    /// Patched configuration.
    pub config: Value,
    /// Engine metrics.
    pub metrics: MetricsMap,
    /// Extracted score.
    pub optimisation_score: Option<f64>,
    /// Engine node.
    pub node_id: Option<NodeId>,
    /// Failure message.
    pub error: Option<String>,
    /// Slot acquisition time.
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal time.
    pub completed_at: Option<DateTime<Utc>>,
    /// Row write time.
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Capture a job together with its run's denormalized fields.
    #[must_use]
    pub fn capture(run: &Run, job: &Job) -> Self {
        let settings = run.settings();
        Self {
            run_id: run.id().clone(),
            position: job.position(),
            name: settings.name.clone(),
            plan: settings.plan,
            optimisation_metric: settings.optimisation_metric.clone(),
            optimisation_direction: settings.direction,
            total_jobs: run.total_jobs(),
            run_created_at: run.created_at(),
            run_error: run.error().map(str::to_string),
            status: job.status(),
            parameters: job.parameters().clone(),
            config: job.config().clone(),
            metrics: job.metrics().clone(),
            optimisation_score: job.optimisation_score(),
            node_id: job.node_id().cloned(),
            error: job.error().map(str::to_string),
            started_at: job.started_at(),
            completed_at: job.completed_at(),
            updated_at: run.updated_at(),
        }
    }

    /// Rebuild the job this row describes.
    #[must_use]
    pub fn to_job(&self) -> Job {
        Job::reconstitute(ReconstitutedJobParams {
            run_id: self.run_id.clone(),
            position: self.position,
            parameters: self.parameters.clone(),
            config: self.config.clone(),
            status: self.status,
            node_id: self.node_id.clone(),
            metrics: self.metrics.clone(),
            optimisation_score: self.optimisation_score,
            error: self.error.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

/// Per-run aggregate over stored rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRunSummary {
    /// Run identifier.
    pub run_id: RunId,
    /// Run name.
    pub name: String,
    /// Search plan.
    pub plan: SearchPlan,
    /// Metric key.
    pub optimisation_metric: Option<String>,
    /// Direction.
    pub optimisation_direction: OptimisationDirection,
    /// Number of jobs in the run (at least the number of stored rows).
    pub total_jobs: u32,
    /// Completed rows.
    pub completed_jobs: u32,
    /// Failed rows.
    pub failed_jobs: u32,
    /// Running rows.
    pub running_jobs: u32,
    /// Run creation time.
    pub created_at: DateTime<Utc>,
    /// Latest row write.
    pub updated_at: DateTime<Utc>,
    /// Abort reason recorded on any row of the run.
    #[serde(default)]
    pub run_error: Option<String>,
}

impl StoredRunSummary {
    /// Aggregate the rows of one run. Returns `None` for an empty slice.
    #[must_use]
    pub fn from_records(records: &[JobRecord]) -> Option<Self> {
        let first = records.first()?;
        let count_status = |status: JobStatus| {
            u32::try_from(records.iter().filter(|r| r.status == status).count()).unwrap_or(u32::MAX)
        };
        let rows = u32::try_from(records.len()).unwrap_or(u32::MAX);

        Some(Self {
            run_id: first.run_id.clone(),
            name: first.name.clone(),
            plan: first.plan,
            optimisation_metric: first.optimisation_metric.clone(),
            optimisation_direction: first.optimisation_direction,
            total_jobs: records
                .iter()
                .map(|r| r.total_jobs)
                .max()
                .unwrap_or(0)
                .max(rows),
            completed_jobs: count_status(JobStatus::Completed),
            failed_jobs: count_status(JobStatus::Failed),
            running_jobs: count_status(JobStatus::Running),
            created_at: records
                .iter()
                .map(|r| r.run_created_at)
                .min()
                .unwrap_or(first.run_created_at),
            updated_at: records
                .iter()
                .map(|r| r.updated_at)
                .max()
                .unwrap_or(first.updated_at),
            run_error: records.iter().find_map(|r| r.run_error.clone()),
        })
    }

    /// Run status as the driver left it.
    ///
    /// An aborted run stays `FAILED` even when some of its jobs completed.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        if self.run_error.is_some() {
            return RunStatus::Failed;
        }
        RunStatus::from_counts(self.total_jobs, self.completed_jobs, self.failed_jobs)
    }
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Could not open or reach the store.
    #[error("store connection error: {0}")]
    Connection(String),

    /// Statement failed.
    #[error("store query error: {0}")]
    Query(String),

    /// JSON column could not be encoded or decoded.
    #[error("store serialization error: {0}")]
    Serialization(String),

    /// Stored row is missing or has an unreadable required field.
    #[error("stored row has invalid field: {0}")]
    MissingField(String),

    /// Blocking store task did not finish.
    #[error("store task failed: {0}")]
    TaskJoin(String),
}

/// Port for durable job state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobStorePort: Send + Sync {
    /// Insert or overwrite the row for `(record.run_id, record.position)`.
    async fn upsert_job(&self, record: &JobRecord) -> Result<(), StoreError>;

    /// One summary per stored run, newest first.
    async fn list_run_summaries(&self) -> Result<Vec<StoredRunSummary>, StoreError>;

    /// All rows of a run ordered by position. Empty when the run is unknown.
    async fn load_run_jobs(&self, run_id: &RunId) -> Result<Vec<JobRecord>, StoreError>;
}
