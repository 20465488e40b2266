//! Orchestrator service.
//!
//! Entry point for starting, inspecting and cancelling optimisation runs.
//! Requests are validated and expanded synchronously; the jobs themselves are
//! executed by a [`RunDriver`] task per run.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::run_driver::{RunDriver, SchedulerSettings};
use super::run_registry::{LiveRun, RunRegistry};
use crate::application::dto::{RunDetail, RunSummary, StartRunRequest};
use crate::application::ports::{BacktestEnginePort, JobStorePort};
use crate::domain::optimization::{
    Combination, Run, RunSettings, SearchPlan, ValidationError, patch_config,
};
use crate::domain::shared::RunId;
use crate::error::OptimizerError;

/// Limits applied to every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Concurrency used when a request does not ask for one.
    pub default_max_parallel: usize,
    /// Hard cap imposed by the engine.
    pub engine_max_parallel: usize,
    /// Polling cadence.
    pub scheduler: SchedulerSettings,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            default_max_parallel: 2,
            engine_max_parallel: 4,
            scheduler: SchedulerSettings::default(),
        }
    }
}

impl OrchestratorSettings {
    /// Concurrency for a request: the requested (or default) value clamped to
    /// `1..=engine_max_parallel`.
    #[must_use]
    pub fn effective_max_parallel(&self, requested: Option<usize>) -> usize {
        let ceiling = self.engine_max_parallel.max(1);
        requested
            .unwrap_or(self.default_max_parallel)
            .clamp(1, ceiling)
    }
}

/// Starts runs and answers queries about live and stored runs.
pub struct Orchestrator {
    store: Arc<dyn JobStorePort>,
    registry: Arc<RunRegistry>,
    driver: RunDriver,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    /// Create an orchestrator with its own registry.
    #[must_use]
    pub fn new(
        engine: Arc<dyn BacktestEnginePort>,
        store: Arc<dyn JobStorePort>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self::with_registry(engine, store, Arc::new(RunRegistry::new()), settings)
    }

    /// Create an orchestrator sharing an existing registry.
    #[must_use]
    pub fn with_registry(
        engine: Arc<dyn BacktestEnginePort>,
        store: Arc<dyn JobStorePort>,
        registry: Arc<RunRegistry>,
        settings: OrchestratorSettings,
    ) -> Self {
        let driver = RunDriver::new(
            engine,
            Arc::clone(&store),
            Arc::clone(&registry),
            settings.scheduler,
        );
        Self {
            store,
            registry,
            driver,
            settings,
        }
    }

    /// Live runs.
    #[must_use]
    pub const fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    /// Validate and expand a request, register the run and start driving it
    /// in the background. Must be called from within a Tokio runtime.
    ///
    /// Returns the detail of the freshly scheduled run: `RUNNING`, every job
    /// `PENDING`.
    pub fn start_run(&self, request: StartRunRequest) -> Result<RunDetail, OptimizerError> {
        let (detail, _handle) = self.launch(request)?;
        Ok(detail)
    }

    /// Like [`start_run`](Self::start_run) but waits for the run to settle and
    /// returns its final detail.
    pub async fn execute_run(&self, request: StartRunRequest) -> Result<RunDetail, OptimizerError> {
        let (detail, handle) = self.launch(request)?;
        handle.await.map_err(|e| OptimizerError::RunDriver {
            run_id: detail.run_id().to_string(),
            message: e.to_string(),
        })
    }

    /// Summaries of live runs followed by stored runs that are no longer live,
    /// newest first.
    pub async fn list_runs(&self) -> Result<Vec<RunSummary>, OptimizerError> {
        let mut summaries = self.registry.summaries();
        let stored = self.store.list_run_summaries().await?;

        let live: HashSet<RunId> = summaries.iter().map(|s| s.run_id.clone()).collect();
        summaries.extend(
            stored
                .into_iter()
                .filter(|summary| !live.contains(&summary.run_id))
                .map(RunSummary::from_stored),
        );
        summaries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
        Ok(summaries)
    }

    /// Detail of one run: from the registry while live, otherwise rebuilt from
    /// the store. `None` when the run is unknown.
    pub async fn get_run(&self, run_id: &RunId) -> Result<Option<RunDetail>, OptimizerError> {
        if let Some(live) = self.registry.get(run_id) {
            return Ok(Some(live.detail()));
        }

        let records = self.store.load_run_jobs(run_id).await?;
        if records.is_empty() {
            // Evicted between the two lookups
            if let Some(live) = self.registry.get(run_id) {
                return Ok(Some(live.detail()));
            }
        }
        Ok(RunDetail::from_records(&records))
    }

    /// Cancel a live run. Pending jobs never start; in-flight jobs stop their
    /// node and fail with `cancelled`.
    pub fn cancel_run(&self, run_id: &RunId) -> Result<(), OptimizerError> {
        let Some(live) = self.registry.get(run_id) else {
            return Err(OptimizerError::NotFound {
                run_id: run_id.to_string(),
            });
        };
        info!(%run_id, "Cancelling run");
        live.cancel_token().cancel();
        Ok(())
    }

    /// Cancel every live run.
    pub fn shutdown(&self) {
        let cancelled = self.registry.cancel_all();
        if cancelled > 0 {
            warn!(runs = cancelled, "Shutdown requested, cancelling live runs");
        }
    }

    fn launch(
        &self,
        request: StartRunRequest,
    ) -> Result<(RunDetail, JoinHandle<RunDetail>), OptimizerError> {
        let run = self.prepare(request)?;
        let live = LiveRun::new(run);
        let detail = live.detail();

        info!(
            run_id = %detail.run_id(),
            name = %detail.summary.name,
            plan = %detail.summary.plan,
            jobs = detail.summary.total_jobs,
            max_parallel = detail.max_parallel.unwrap_or_default(),
            "Run scheduled"
        );

        self.registry.insert(live.clone());
        let driver = self.driver.clone();
        let handle = tokio::spawn(async move { driver.drive(live).await });
        Ok((detail, handle))
    }

    fn prepare(&self, request: StartRunRequest) -> Result<Run, OptimizerError> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(ValidationError::InvalidRequest("name must not be empty".to_string()).into());
        }

        let random_seed = match request.plan {
            SearchPlan::Random => Some(request.random_seed.unwrap_or_else(rand::random)),
            SearchPlan::Grid => request.random_seed,
        };

        let combinations = request.parameter_space.expand(
            request.plan,
            request.sample_count,
            random_seed,
        )?;
        let scheduled = combinations
            .into_iter()
            .map(|combination| {
                patch_config(&request.base_config, &combination)
                    .map(|config| (combination, config))
            })
            .collect::<Result<Vec<(Combination, Value)>, _>>()?;

        let now = Utc::now();
        let id = RunId::generate();
        let settings = RunSettings {
            name: name.to_string(),
            plan: request.plan,
            direction: request.direction,
            optimisation_metric: request.optimisation_metric,
            parameter_space: request.parameter_space,
            base_config: request.base_config,
            max_parallel: self.settings.effective_max_parallel(request.max_parallel),
            sample_count: request.sample_count,
            random_seed,
        };

        let mut run = Run::new(id.clone(), settings, now);
        run.schedule(scheduled, now)
            .map_err(|e| OptimizerError::RunDriver {
                run_id: id.to_string(),
                message: e.to_string(),
            })?;
        Ok(run)
    }
}
