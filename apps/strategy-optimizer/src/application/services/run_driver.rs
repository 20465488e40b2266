//! Run driver.
//!
//! Executes every job of a run as its own tokio task. Tasks are spawned in
//! position order and gated by a semaphore sized to the run's `max_parallel`,
//! so at most that many jobs hold an engine node at once. Each job:
//!
//! 1. waits for a slot (or for cancellation)
//! 2. is marked `RUNNING` and persisted
//! 3. launches a node, records the node id and persists again
//! 4. polls until the node settles, then always stops it
//! 5. is marked `COMPLETED` or `FAILED` and persisted
//!
//! A failing job never affects its siblings. A job task that dies (panic) aborts
//! the whole run: the remaining jobs are cancelled through the run's token, so
//! every node that was launched is still stopped.
//!
//! An aborted run rewrites all of its rows with the abort reason, which keeps
//! the run `FAILED` once it is rebuilt from the store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

use super::run_registry::{LiveRun, RunRegistry};
use crate::application::dto::RunDetail;
use crate::application::ports::{
    BacktestEnginePort, EngineError, JobRecord, JobStorePort, NodeStatus,
};
use crate::domain::optimization::{Job, JobStatus, MetricsMap, Run};
use crate::domain::shared::NodeId;
use crate::observability;

/// Failure message recorded on jobs and runs stopped by cancellation.
pub const CANCELLED: &str = "cancelled";

/// Polling cadence for engine nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Delay before each status poll.
    pub poll_interval: Duration,
    /// Polls before giving up waiting and stopping the node anyway.
    pub max_poll_attempts: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_poll_attempts: 150,
        }
    }
}

/// Drives runs to completion against the engine and the job store.
#[derive(Clone)]
pub struct RunDriver {
    engine: Arc<dyn BacktestEnginePort>,
    store: Arc<dyn JobStorePort>,
    registry: Arc<RunRegistry>,
    settings: SchedulerSettings,
}

impl RunDriver {
    /// Create a driver.
    #[must_use]
    pub fn new(
        engine: Arc<dyn BacktestEnginePort>,
        store: Arc<dyn JobStorePort>,
        registry: Arc<RunRegistry>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            engine,
            store,
            registry,
            settings,
        }
    }

    /// Execute every job of a scheduled run, settle it and evict it from the registry.
    ///
    /// Returns the final detail of the run.
    pub async fn drive(&self, live: LiveRun) -> RunDetail {
        let (run_id, positions, max_parallel) = {
            let run = live.run().lock();
            (
                run.id().clone(),
                run.jobs().iter().map(Job::position).collect::<Vec<_>>(),
                run.settings().max_parallel.max(1),
            )
        };

        info!(%run_id, jobs = positions.len(), max_parallel, "Run started");

        let gate = Arc::new(Semaphore::new(max_parallel));
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut tasks = JoinSet::new();

        for position in positions {
            let worker = JobWorker {
                driver: self.clone(),
                live: live.clone(),
                gate: Arc::clone(&gate),
                cancelled: Arc::clone(&cancelled),
                position,
            };
            let span = info_span!("optimisation_job", run_id = %run_id, position);
            tasks.spawn(worker.run().instrument(span));
        }

        let mut abort_reason: Option<String> = None;
        while let Some(joined) = tasks.join_next().await {
            let Err(err) = joined else { continue };
            error!(%run_id, error = %err, "Job task died, aborting run");
            if abort_reason.is_none() {
                abort_reason = Some(format!("job task failed: {err}"));
                // Siblings settle through their own stop path.
                live.cancel_token().cancel();
            }
        }

        self.finish(&live, abort_reason, cancelled.load(Ordering::SeqCst))
            .await
    }

    async fn finish(
        &self,
        live: &LiveRun,
        abort_reason: Option<String>,
        cancelled: bool,
    ) -> RunDetail {
        let now = Utc::now();
        let (records, detail) = {
            let mut run = live.run().lock();
            let running_before: Vec<u32> = run
                .jobs()
                .iter()
                .filter(|job| job.status() == JobStatus::Running)
                .map(Job::position)
                .collect();

            let aborted = match abort_reason {
                Some(reason) => run.abort(reason, now),
                None if cancelled => run.abort(CANCELLED, now),
                None => match run.finalize(now) {
                    Ok(_) => Vec::new(),
                    Err(err) => run.abort(err.to_string(), now),
                },
            };

            for position in &aborted {
                observability::record_job_finished(
                    "failed",
                    running_before.contains(position),
                    0.0,
                );
            }

            // The abort reason goes on every row, not only the jobs failed here.
            let records: Vec<JobRecord> = if run.error().is_some() {
                run.jobs()
                    .iter()
                    .map(|job| JobRecord::capture(&run, job))
                    .collect()
            } else {
                Vec::new()
            };
            (records, RunDetail::from_run(&run))
        };

        for record in &records {
            self.persist(record).await;
        }

        self.registry.remove(detail.run_id());
        observability::record_run_finished(detail.status().as_str());

        let summary = &detail.summary;
        info!(
            run_id = %summary.run_id,
            status = %summary.status,
            completed = summary.completed_jobs,
            failed = summary.failed_jobs,
            total = summary.total_jobs,
            best_position = detail.best_result.as_ref().map(Job::position),
            "Run finished"
        );

        detail
    }

    async fn persist(&self, record: &JobRecord) {
        if let Err(err) = self.store.upsert_job(record).await {
            observability::record_persistence_failure();
            warn!(
                run_id = %record.run_id,
                position = record.position,
                status = %record.status,
                error = %err,
                "Failed to persist job; in-memory state stays authoritative"
            );
        }
    }
}

fn capture(run: &Run, position: u32) -> Option<JobRecord> {
    run.job(position).map(|job| JobRecord::capture(run, job))
}

/// How a job ended.
enum JobOutcome {
    Completed(MetricsMap),
    Failed(String),
    Cancelled,
}

/// How polling ended.
enum PollOutcome {
    Settled { status: NodeStatus, metrics: MetricsMap },
    Exhausted { metrics: MetricsMap },
    Cancelled,
}

/// One job's task.
struct JobWorker {
    driver: RunDriver,
    live: LiveRun,
    gate: Arc<Semaphore>,
    cancelled: Arc<AtomicBool>,
    position: u32,
}

impl JobWorker {
    async fn run(self) {
        let cancel = self.live.cancel_token().clone();

        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            permit = Arc::clone(&self.gate).acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
            self.settle(JobOutcome::Cancelled, None).await;
            return;
        };
        if cancel.is_cancelled() {
            self.settle(JobOutcome::Cancelled, None).await;
            return;
        }

        let Some((config, label)) = self.mark_running().await else {
            return;
        };

        let started = Instant::now();
        let outcome = self.execute(&config, &label, &cancel).await;
        self.settle(outcome, Some(started)).await;
    }

    async fn mark_running(&self) -> Option<(Value, String)> {
        let prepared = {
            let mut run = self.live.run().lock();
            match run.start_job(self.position, Utc::now()) {
                Ok(()) => run.job(self.position).map(|job| {
                    (
                        job.config().clone(),
                        run.node_label(self.position),
                        JobRecord::capture(&run, job),
                    )
                }),
                Err(err) => {
                    warn!(error = %err, "Job could not start");
                    None
                }
            }
        };

        let (config, label, record) = prepared?;
        observability::record_job_started();
        debug!(%label, "Job running");
        self.driver.persist(&record).await;
        Some((config, label))
    }

    async fn execute(&self, config: &Value, label: &str, cancel: &CancellationToken) -> JobOutcome {
        let engine = &self.driver.engine;

        let node_id = match engine.launch(config, label).await {
            Ok(handle) => handle.node_id,
            Err(err) => {
                warn!(error = %err, "Node launch failed");
                return JobOutcome::Failed(err.to_string());
            }
        };
        self.attach_node(&node_id).await;

        match self.poll_until_settled(&node_id, cancel).await {
            Ok(PollOutcome::Cancelled) => {
                self.stop_quietly(&node_id).await;
                JobOutcome::Cancelled
            }
            Ok(PollOutcome::Settled { status, metrics }) => {
                if status == NodeStatus::Error {
                    warn!(%node_id, "Engine reported node error");
                }
                self.stop_and_collect(&node_id, metrics).await
            }
            Ok(PollOutcome::Exhausted { metrics }) => {
                warn!(
                    %node_id,
                    attempts = self.driver.settings.max_poll_attempts,
                    "Node did not settle before poll limit, stopping"
                );
                self.stop_and_collect(&node_id, metrics).await
            }
            Err(err) => {
                warn!(%node_id, error = %err, "Node poll failed");
                self.stop_quietly(&node_id).await;
                JobOutcome::Failed(err.to_string())
            }
        }
    }

    async fn attach_node(&self, node_id: &NodeId) {
        let record = {
            let mut run = self.live.run().lock();
            match run.attach_node(self.position, node_id.clone(), Utc::now()) {
                Ok(()) => capture(&run, self.position),
                Err(err) => {
                    warn!(error = %err, "Could not record node");
                    None
                }
            }
        };

        debug!(%node_id, "Node launched");
        if let Some(record) = record {
            self.driver.persist(&record).await;
        }
    }

    async fn poll_until_settled(
        &self,
        node_id: &NodeId,
        cancel: &CancellationToken,
    ) -> Result<PollOutcome, EngineError> {
        let settings = self.driver.settings;
        let mut last = MetricsMap::new();

        for attempt in 1..=settings.max_poll_attempts {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(PollOutcome::Cancelled),
                () = tokio::time::sleep(settings.poll_interval) => {}
            }

            let snapshot = self.driver.engine.poll(node_id).await?;
            trace!(attempt, status = %snapshot.status, "Polled node");

            if !snapshot.metrics.is_empty() {
                last = snapshot.metrics;
            }
            if snapshot.status.is_settling() {
                return Ok(PollOutcome::Settled {
                    status: snapshot.status,
                    metrics: last,
                });
            }
        }

        Ok(PollOutcome::Exhausted { metrics: last })
    }

    /// Stop the node; its final metrics win over the last polled ones.
    async fn stop_and_collect(&self, node_id: &NodeId, polled: MetricsMap) -> JobOutcome {
        match self.driver.engine.stop(node_id).await {
            Ok(snapshot) if snapshot.metrics.is_empty() => JobOutcome::Completed(polled),
            Ok(snapshot) => JobOutcome::Completed(snapshot.metrics),
            Err(err) => {
                warn!(%node_id, error = %err, "Node stop failed");
                JobOutcome::Failed(err.to_string())
            }
        }
    }

    async fn stop_quietly(&self, node_id: &NodeId) {
        if let Err(err) = self.driver.engine.stop(node_id).await {
            warn!(%node_id, error = %err, "Best-effort node stop failed");
        }
    }

    async fn settle(&self, outcome: JobOutcome, started: Option<Instant>) {
        let now = Utc::now();
        let (label, record) = {
            let mut run = self.live.run().lock();
            let (label, result) = match outcome {
                JobOutcome::Completed(metrics) => {
                    ("completed", run.complete_job(self.position, metrics, now))
                }
                JobOutcome::Failed(message) => ("failed", run.fail_job(self.position, message, now)),
                JobOutcome::Cancelled => ("cancelled", run.fail_job(self.position, CANCELLED, now)),
            };
            match result {
                Ok(()) => (label, capture(&run, self.position)),
                Err(err) => {
                    warn!(error = %err, "Could not settle job");
                    (label, None)
                }
            }
        };

        if label == "cancelled" {
            self.cancelled.store(true, Ordering::SeqCst);
        }

        let Some(record) = record else { return };
        observability::record_job_finished(
            label,
            started.is_some(),
            started.map_or(0.0, |at| at.elapsed().as_secs_f64()),
        );
        info!(
            outcome = label,
            score = record.optimisation_score,
            error = record.error.as_deref(),
            "Job finished"
        );
        self.driver.persist(&record).await;
    }
}
