//! Run DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::ports::{JobRecord, StoredRunSummary};
use crate::domain::optimization::{
    Job, OptimisationDirection, ParameterSpace, Run, RunProgress, RunStatus, SearchPlan,
    select_best,
};
use crate::domain::shared::RunId;

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Request to start an optimisation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRunRequest {
    /// Run name.
    pub name: String,
    /// Configuration each combination is applied to.
    #[serde(default = "empty_object")]
    pub base_config: Value,
    /// Candidate values per parameter.
    pub parameter_space: ParameterSpace,
    /// Exhaustive or sampled search.
    #[serde(default)]
    pub plan: SearchPlan,
    /// Sample size for random plans.
    #[serde(default)]
    pub sample_count: Option<usize>,
    /// Requested concurrency; clamped to the engine limit.
    #[serde(default)]
    pub max_parallel: Option<usize>,
    /// Metric key used as the score.
    #[serde(default)]
    pub optimisation_metric: Option<String>,
    /// Whether higher or lower scores win.
    #[serde(default, alias = "optimisation_direction")]
    pub direction: OptimisationDirection,
    /// Seed for random plans.
    #[serde(default)]
    pub random_seed: Option<u64>,
}

impl StartRunRequest {
    /// Minimal grid request.
    #[must_use]
    pub fn grid(name: impl Into<String>, base_config: Value, parameter_space: ParameterSpace) -> Self {
        Self {
            name: name.into(),
            base_config,
            parameter_space,
            plan: SearchPlan::Grid,
            sample_count: None,
            max_parallel: None,
            optimisation_metric: None,
            direction: OptimisationDirection::Maximize,
            random_seed: None,
        }
    }

    /// Switch to a seeded random plan.
    #[must_use]
    pub const fn sampled(mut self, sample_count: usize, seed: Option<u64>) -> Self {
        self.plan = SearchPlan::Random;
        self.sample_count = Some(sample_count);
        self.random_seed = seed;
        self
    }

    /// Score jobs by `metric` in `direction`.
    #[must_use]
    pub fn scored_by(mut self, metric: impl Into<String>, direction: OptimisationDirection) -> Self {
        self.optimisation_metric = Some(metric.into());
        self.direction = direction;
        self
    }

    /// Request a concurrency limit.
    #[must_use]
    pub const fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = Some(max_parallel);
        self
    }
}

/// Compact view of a run for listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run identifier.
    pub run_id: RunId,
    /// Run name.
    pub name: String,
    /// Search plan.
    pub plan: SearchPlan,
    /// Direction.
    pub direction: OptimisationDirection,
    /// Metric key.
    pub optimisation_metric: Option<String>,
    /// Current status.
    pub status: RunStatus,
    /// Number of jobs.
    pub total_jobs: u32,
    /// Completed jobs.
    pub completed_jobs: u32,
    /// Failed jobs.
    pub failed_jobs: u32,
    /// Running jobs.
    pub running_jobs: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last transition.
    pub updated_at: DateTime<Utc>,
    /// Served from the live registry rather than the store.
    pub live: bool,
}

impl RunSummary {
    /// Summarize a live run.
    #[must_use]
    pub fn from_run(run: &Run) -> Self {
        let settings = run.settings();
        Self {
            run_id: run.id().clone(),
            name: settings.name.clone(),
            plan: settings.plan,
            direction: settings.direction,
            optimisation_metric: settings.optimisation_metric.clone(),
            status: run.status(),
            total_jobs: run.total_jobs(),
            completed_jobs: run.completed_jobs(),
            failed_jobs: run.failed_jobs(),
            running_jobs: run.running_jobs(),
            created_at: run.created_at(),
            updated_at: run.updated_at(),
            live: true,
        }
    }

    /// Summarize a run rebuilt from stored rows.
    #[must_use]
    pub fn from_stored(stored: StoredRunSummary) -> Self {
        Self {
            status: stored.status(),
            run_id: stored.run_id,
            name: stored.name,
            plan: stored.plan,
            direction: stored.optimisation_direction,
            optimisation_metric: stored.optimisation_metric,
            total_jobs: stored.total_jobs,
            completed_jobs: stored.completed_jobs,
            failed_jobs: stored.failed_jobs,
            running_jobs: stored.running_jobs,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
            live: false,
        }
    }

    /// Counter snapshot.
    #[must_use]
    pub const fn progress(&self) -> RunProgress {
        RunProgress {
            total: self.total_jobs,
            completed: self.completed_jobs,
            failed: self.failed_jobs,
            running: self.running_jobs,
        }
    }
}

/// Full view of a run including every job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDetail {
    /// Counters and identity.
    #[serde(flatten)]
    pub summary: RunSummary,
    /// Run-level failure reason, set when the run was aborted.
    pub error: Option<String>,
    /// Effective concurrency limit. Only known while the run is live.
    pub max_parallel: Option<usize>,
    /// Requested sample size. Only known while the run is live.
    pub sample_count: Option<usize>,
    /// Seed used for random plans. Only known while the run is live.
    pub random_seed: Option<u64>,
    /// Parameter space. Only known while the run is live.
    pub parameter_space: Option<ParameterSpace>,
    /// Base configuration. Only known while the run is live.
    pub base_config: Option<Value>,
    /// Best completed job.
    pub best_result: Option<Job>,
    /// Every job ordered by position.
    pub results: Vec<Job>,
}

impl RunDetail {
    /// Detail of a live (or just-finished) run.
    #[must_use]
    pub fn from_run(run: &Run) -> Self {
        let settings = run.settings();
        Self {
            summary: RunSummary::from_run(run),
            error: run.error().map(str::to_string),
            max_parallel: Some(settings.max_parallel),
            sample_count: settings.sample_count,
            random_seed: settings.random_seed,
            parameter_space: Some(settings.parameter_space.clone()),
            base_config: Some(settings.base_config.clone()),
            best_result: run.best_result().cloned(),
            results: run.jobs().to_vec(),
        }
    }

    /// Rebuild a run from its stored rows. Returns `None` when there are none.
    #[must_use]
    pub fn from_records(records: &[JobRecord]) -> Option<Self> {
        let stored = StoredRunSummary::from_records(records)?;
        let direction = stored.optimisation_direction;
        let error = stored.run_error.clone();

        let mut results: Vec<Job> = records.iter().map(JobRecord::to_job).collect();
        results.sort_by_key(Job::position);
        let best_result = select_best(&results, direction).cloned();

        Some(Self {
            summary: RunSummary::from_stored(stored),
            error,
            max_parallel: None,
            sample_count: None,
            random_seed: None,
            parameter_space: None,
            base_config: None,
            best_result,
            results,
        })
    }

    /// Run identifier.
    #[must_use]
    pub const fn run_id(&self) -> &RunId {
        &self.summary.run_id
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.summary.status
    }
}
