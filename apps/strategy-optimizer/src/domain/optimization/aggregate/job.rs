//! Job entity: one combination's backtest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::optimization::errors::LifecycleError;
use crate::domain::optimization::services::Scored;
use crate::domain::optimization::value_objects::{Combination, JobStatus, MetricsMap};
use crate::domain::shared::{NodeId, RunId};

/// Parameters for rebuilding a job from a stored row.
#[derive(Debug, Clone)]
pub struct ReconstitutedJobParams {
    /// Owning run.
    pub run_id: RunId,
    /// 1-based position within the run.
    pub position: u32,
    /// Combination evaluated by the job.
    pub parameters: Combination,
    /// Patched configuration sent to the engine.
    pub config: Value,
    /// Stored status.
    pub status: JobStatus,
    /// Engine node, once launched.
    pub node_id: Option<NodeId>,
    /// Engine metrics.
    pub metrics: MetricsMap,
    /// Extracted score.
    pub optimisation_score: Option<f64>,
    /// Failure message.
    pub error: Option<String>,
    /// When the job acquired a slot.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

/// A single parameter combination and the lifecycle of its backtest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    run_id: RunId,
    position: u32,
    parameters: Combination,
    config: Value,
    status: JobStatus,
    node_id: Option<NodeId>,
    metrics: MetricsMap,
    optimisation_score: Option<f64>,
    error: Option<String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a pending job.
    #[must_use]
    pub fn new(run_id: RunId, position: u32, parameters: Combination, config: Value) -> Self {
        Self {
            run_id,
            position,
            parameters,
            config,
            status: JobStatus::Pending,
            node_id: None,
            metrics: MetricsMap::new(),
            optimisation_score: None,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Rebuild a job from persisted state without validation.
    #[must_use]
    pub fn reconstitute(params: ReconstitutedJobParams) -> Self {
        Self {
            run_id: params.run_id,
            position: params.position,
            parameters: params.parameters,
            config: params.config,
            status: params.status,
            node_id: params.node_id,
            metrics: params.metrics,
            optimisation_score: params.optimisation_score,
            error: params.error,
            started_at: params.started_at,
            completed_at: params.completed_at,
        }
    }

    // ========================================================================
    // Getters
    // ========================================================================

    /// Owning run.
    #[must_use]
    pub const fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// 1-based position within the run.
    #[must_use]
    pub const fn position(&self) -> u32 {
        self.position
    }

    /// Combination evaluated by this job.
    #[must_use]
    pub const fn parameters(&self) -> &Combination {
        &self.parameters
    }

    /// Patched configuration.
    #[must_use]
    pub const fn config(&self) -> &Value {
        &self.config
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> JobStatus {
        self.status
    }

    /// Engine node, once launched.
    #[must_use]
    pub const fn node_id(&self) -> Option<&NodeId> {
        self.node_id.as_ref()
    }

    /// Metrics reported by the engine.
    #[must_use]
    pub const fn metrics(&self) -> &MetricsMap {
        &self.metrics
    }

    /// Extracted optimisation score.
    #[must_use]
    pub const fn optimisation_score(&self) -> Option<f64> {
        self.optimisation_score
    }

    /// Failure message.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// When the job acquired a slot.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// When the job reached a terminal state.
    #[must_use]
    pub const fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    pub(super) fn start(&mut self, now: DateTime<Utc>) -> Result<(), LifecycleError> {
        self.ensure(self.status == JobStatus::Pending, JobStatus::Running)?;
        self.status = JobStatus::Running;
        self.started_at = Some(now);
        Ok(())
    }

    pub(super) fn attach_node(&mut self, node_id: NodeId) -> Result<(), LifecycleError> {
        self.ensure(
            self.status == JobStatus::Running && self.node_id.is_none(),
            JobStatus::Running,
        )?;
        self.node_id = Some(node_id);
        Ok(())
    }

    pub(super) fn complete(
        &mut self,
        metrics: MetricsMap,
        score: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        self.ensure(self.status == JobStatus::Running, JobStatus::Completed)?;
        self.status = JobStatus::Completed;
        self.metrics = metrics;
        self.optimisation_score = score;
        self.completed_at = Some(now);
        Ok(())
    }

    pub(super) fn fail(
        &mut self,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        self.ensure(!self.status.is_terminal(), JobStatus::Failed)?;
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(now);
        Ok(())
    }

    const fn ensure(&self, allowed: bool, to: JobStatus) -> Result<(), LifecycleError> {
        if allowed {
            Ok(())
        } else {
            Err(LifecycleError::InvalidJobTransition {
                position: self.position,
                from: self.status,
                to,
            })
        }
    }
}

impl Scored for Job {
    fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }

    fn score(&self) -> Option<f64> {
        self.optimisation_score
    }
}
