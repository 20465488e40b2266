//! Run aggregate root.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Job, RunProgress};
use crate::domain::optimization::errors::LifecycleError;
use crate::domain::optimization::services::select_best;
use crate::domain::optimization::value_objects::{
    Combination, JobStatus, MetricsMap, OptimisationDirection, ParameterSpace, RunStatus,
    SearchPlan, extract_metric,
};
use crate::domain::shared::{NodeId, RunId};

/// Immutable settings a run was created with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    /// Human-readable run name, also used in node labels.
    pub name: String,
    /// Exhaustive or sampled search.
    pub plan: SearchPlan,
    /// Whether higher or lower scores win.
    pub direction: OptimisationDirection,
    /// Metric key used as the optimisation score.
    pub optimisation_metric: Option<String>,
    /// Candidate values per parameter.
    pub parameter_space: ParameterSpace,
    /// Configuration every combination is applied to.
    pub base_config: Value,
    /// Effective concurrency limit.
    pub max_parallel: usize,
    /// Requested sample size for random plans.
    pub sample_count: Option<usize>,
    /// Seed used for random plans.
    pub random_seed: Option<u64>,
}

/// An optimisation run and all of its jobs.
///
/// Every job transition goes through the run so the counters always agree with
/// the job statuses: `completed + failed + running <= total`, with equality of
/// `completed + failed` and `total` once the run is settled.
#[derive(Debug, Clone)]
pub struct Run {
    id: RunId,
    settings: RunSettings,
    status: RunStatus,
    jobs: Vec<Job>,
    completed_jobs: u32,
    failed_jobs: u32,
    running_jobs: u32,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Run {
    /// Create a pending run with no jobs.
    #[must_use]
    pub fn new(id: RunId, settings: RunSettings, now: DateTime<Utc>) -> Self {
        Self {
            id,
            settings,
            status: RunStatus::Pending,
            jobs: Vec::new(),
            completed_jobs: 0,
            failed_jobs: 0,
            running_jobs: 0,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    // ========================================================================
    // Getters
    // ========================================================================

    /// Run identifier.
    #[must_use]
    pub const fn id(&self) -> &RunId {
        &self.id
    }

    /// Creation settings.
    #[must_use]
    pub const fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Run name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.settings.name
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Jobs ordered by position.
    #[must_use]
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Job at a 1-based position.
    #[must_use]
    pub fn job(&self, position: u32) -> Option<&Job> {
        let index = usize::try_from(position).ok()?.checked_sub(1)?;
        self.jobs.get(index)
    }

    /// Number of jobs.
    #[must_use]
    pub fn total_jobs(&self) -> u32 {
        u32::try_from(self.jobs.len()).unwrap_or(u32::MAX)
    }

    /// Jobs that completed.
    #[must_use]
    pub const fn completed_jobs(&self) -> u32 {
        self.completed_jobs
    }

    /// Jobs that failed.
    #[must_use]
    pub const fn failed_jobs(&self) -> u32 {
        self.failed_jobs
    }

    /// Jobs currently holding a slot.
    #[must_use]
    pub const fn running_jobs(&self) -> u32 {
        self.running_jobs
    }

    /// Run-level failure reason.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Creation time.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Time of the last transition.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Counter snapshot.
    #[must_use]
    pub fn progress(&self) -> RunProgress {
        RunProgress {
            total: self.total_jobs(),
            completed: self.completed_jobs,
            failed: self.failed_jobs,
            running: self.running_jobs,
        }
    }

    /// Returns true once every job is terminal.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.jobs.iter().all(|job| job.status().is_terminal())
    }

    /// Best completed job by the run's metric and direction.
    #[must_use]
    pub fn best_result(&self) -> Option<&Job> {
        select_best(&self.jobs, self.settings.direction)
    }

    /// Label used when launching the job at `position` on the engine.
    #[must_use]
    pub fn node_label(&self, position: u32) -> String {
        format!("{} #{position}", self.settings.name)
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Attach one pending job per combination and move to `RUNNING`.
    ///
    /// Positions are assigned 1..=N in the given order.
    pub fn schedule(
        &mut self,
        combinations: Vec<(Combination, Value)>,
        now: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        if self.status != RunStatus::Pending {
            return Err(LifecycleError::InvalidRunTransition {
                from: self.status,
                to: RunStatus::Running,
            });
        }

        self.jobs = combinations
            .into_iter()
            .zip(1_u32..)
            .map(|((parameters, config), position)| {
                Job::new(self.id.clone(), position, parameters, config)
            })
            .collect();
        self.status = RunStatus::Running;
        self.updated_at = now;
        Ok(())
    }

    /// Mark a pending job as running.
    pub fn start_job(&mut self, position: u32, now: DateTime<Utc>) -> Result<(), LifecycleError> {
        let index = self.index_of(position)?;
        self.jobs[index].start(now)?;
        self.running_jobs += 1;
        self.updated_at = now;
        Ok(())
    }

    /// Record the engine node a running job was launched on.
    pub fn attach_node(
        &mut self,
        position: u32,
        node_id: NodeId,
        now: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        let index = self.index_of(position)?;
        self.jobs[index].attach_node(node_id)?;
        self.updated_at = now;
        Ok(())
    }

    /// Complete a running job and score it with the run's metric.
    pub fn complete_job(
        &mut self,
        position: u32,
        metrics: MetricsMap,
        now: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        let index = self.index_of(position)?;
        let score = extract_metric(&metrics, self.settings.optimisation_metric.as_deref());
        self.jobs[index].complete(metrics, score, now)?;
        self.running_jobs = self.running_jobs.saturating_sub(1);
        self.completed_jobs += 1;
        self.updated_at = now;
        Ok(())
    }

    /// Fail a pending or running job.
    pub fn fail_job(
        &mut self,
        position: u32,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        let index = self.index_of(position)?;
        let was_running = self.jobs[index].status() == JobStatus::Running;
        self.jobs[index].fail(error, now)?;
        if was_running {
            self.running_jobs = self.running_jobs.saturating_sub(1);
        }
        self.failed_jobs += 1;
        self.updated_at = now;
        Ok(())
    }

    /// Settle a run whose jobs are all terminal.
    pub fn finalize(&mut self, now: DateTime<Utc>) -> Result<RunStatus, LifecycleError> {
        let target = RunStatus::from_counts(self.total_jobs(), self.completed_jobs, self.failed_jobs);
        if self.status != RunStatus::Running || !target.is_terminal() {
            return Err(LifecycleError::InvalidRunTransition {
                from: self.status,
                to: target,
            });
        }

        self.status = target;
        self.updated_at = now;
        Ok(target)
    }

    /// Fail the run, failing every job that has not finished yet.
    ///
    /// Returns the positions of the jobs this call failed.
    pub fn abort(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Vec<u32> {
        let reason = reason.into();
        let open: Vec<u32> = self
            .jobs
            .iter()
            .filter(|job| !job.status().is_terminal())
            .map(Job::position)
            .collect();

        for position in &open {
            // Positions come from our own job list.
            let _ = self.fail_job(*position, reason.clone(), now);
        }

        self.status = RunStatus::Failed;
        self.error = Some(reason);
        self.updated_at = now;
        open
    }

    fn index_of(&self, position: u32) -> Result<usize, LifecycleError> {
        usize::try_from(position)
            .ok()
            .and_then(|p| p.checked_sub(1))
            .filter(|index| *index < self.jobs.len())
            .ok_or(LifecycleError::UnknownPosition { position })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn settings(metric: Option<&str>, direction: OptimisationDirection) -> RunSettings {
        RunSettings {
            name: "sweep".to_string(),
            plan: SearchPlan::Grid,
            direction,
            optimisation_metric: metric.map(str::to_string),
            parameter_space: ParameterSpace::default(),
            base_config: json!({}),
            max_parallel: 2,
            sample_count: None,
            random_seed: None,
        }
    }

    fn scheduled(jobs: usize, direction: OptimisationDirection) -> Run {
        let mut run = Run::new(
            RunId::new("run-1"),
            settings(Some("sharpe"), direction),
            Utc::now(),
        );
        let combos = (0..jobs)
            .map(|i| {
                let mut c = Combination::new();
                c.insert("fast".to_string(), json!(i));
                (c, json!({"fast": i}))
            })
            .collect();
        run.schedule(combos, Utc::now()).unwrap();
        run
    }

    fn metrics(sharpe: f64) -> MetricsMap {
        json!({"sharpe": sharpe}).as_object().cloned().unwrap()
    }

    #[test]
    fn schedule_assigns_positions_and_starts_running() {
        let run = scheduled(3, OptimisationDirection::Maximize);
        assert_eq!(run.status(), RunStatus::Running);
        assert_eq!(run.total_jobs(), 3);
        let positions: Vec<u32> = run.jobs().iter().map(Job::position).collect();
        assert_eq!(positions, vec![1, 2, 3]);
        assert!(run.jobs().iter().all(|j| j.status() == JobStatus::Pending));
        assert_eq!(run.node_label(2), "sweep #2");
    }

    #[test]
    fn counters_follow_job_transitions() {
        let mut run = scheduled(3, OptimisationDirection::Maximize);
        let now = Utc::now();

        run.start_job(1, now).unwrap();
        run.start_job(2, now).unwrap();
        assert_eq!(run.running_jobs(), 2);

        run.complete_job(1, metrics(1.0), now).unwrap();
        run.fail_job(2, "engine exploded", now).unwrap();
        run.fail_job(3, "cancelled", now).unwrap();

        let progress = run.progress();
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.failed, 2);
        assert_eq!(progress.running, 0);
        assert!(progress.is_consistent());
        assert!(run.is_settled());
    }

    #[test]
    fn partial_failure_finalizes_completed() {
        let mut run = scheduled(2, OptimisationDirection::Maximize);
        let now = Utc::now();
        run.start_job(1, now).unwrap();
        run.complete_job(1, metrics(0.5), now).unwrap();
        run.start_job(2, now).unwrap();
        run.fail_job(2, "boom", now).unwrap();

        assert_eq!(run.finalize(now).unwrap(), RunStatus::Completed);
    }

    #[test]
    fn total_failure_finalizes_failed() {
        let mut run = scheduled(2, OptimisationDirection::Maximize);
        let now = Utc::now();
        for position in 1..=2 {
            run.start_job(position, now).unwrap();
            run.fail_job(position, "boom", now).unwrap();
        }
        assert_eq!(run.finalize(now).unwrap(), RunStatus::Failed);
    }

    #[test]
    fn finalize_refuses_unsettled_run() {
        let mut run = scheduled(2, OptimisationDirection::Maximize);
        run.start_job(1, Utc::now()).unwrap();
        assert!(run.finalize(Utc::now()).is_err());
    }

    #[test]
    fn best_result_respects_direction() {
        for (direction, expected) in [
            (OptimisationDirection::Maximize, 2),
            (OptimisationDirection::Minimize, 3),
        ] {
            let mut run = scheduled(3, direction);
            let now = Utc::now();
            for (position, sharpe) in [(1, 0.4), (2, 1.9), (3, -0.3)] {
                run.start_job(position, now).unwrap();
                run.complete_job(position, metrics(sharpe), now).unwrap();
            }
            assert_eq!(run.best_result().map(Job::position), Some(expected));
        }
    }

    #[test]
    fn score_is_extracted_on_completion() {
        let mut run = scheduled(1, OptimisationDirection::Maximize);
        run.start_job(1, Utc::now()).unwrap();
        let metrics = json!({"metrics": {"sharpe": "2.5"}}).as_object().cloned().unwrap();
        run.complete_job(1, metrics, Utc::now()).unwrap();
        assert_eq!(run.job(1).and_then(Job::optimisation_score), Some(2.5));
    }

    #[test]
    fn abort_fails_open_jobs_only() {
        let mut run = scheduled(3, OptimisationDirection::Maximize);
        let now = Utc::now();
        run.start_job(1, now).unwrap();
        run.complete_job(1, metrics(1.0), now).unwrap();
        run.start_job(2, now).unwrap();

        let failed = run.abort("driver crashed", now);

        assert_eq!(failed, vec![2, 3]);
        assert_eq!(run.status(), RunStatus::Failed);
        assert_eq!(run.error(), Some("driver crashed"));
        assert_eq!(run.running_jobs(), 0);
        assert_eq!(run.completed_jobs() + run.failed_jobs(), run.total_jobs());
        assert_eq!(run.job(2).and_then(Job::error), Some("driver crashed"));
    }

    #[test]
    fn unknown_position_is_rejected() {
        let mut run = scheduled(1, OptimisationDirection::Maximize);
        assert_eq!(
            run.start_job(0, Utc::now()).unwrap_err(),
            LifecycleError::UnknownPosition { position: 0 }
        );
        assert!(run.start_job(2, Utc::now()).is_err());
    }

    #[test]
    fn schedule_only_once() {
        let mut run = scheduled(1, OptimisationDirection::Maximize);
        assert!(run.schedule(Vec::new(), Utc::now()).is_err());
    }
}
