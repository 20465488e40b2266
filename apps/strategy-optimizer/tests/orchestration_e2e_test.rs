//! E2E Tests for Optimisation Runs
//!
//! Drives full runs through the orchestrator against the scripted engine and
//! the in-memory job store: scheduling, concurrency limits, partial failures,
//! cancellation and reconstruction from stored rows.

// Allow unwrap in tests - tests should panic on unexpected errors
#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use strategy_optimizer::{
    Combination, InMemoryJobStore, Job, JobStatus, JobStorePort, MetricsMap, NodeScript, NodeStatus,
    OptimisationDirection, Orchestrator, OrchestratorSettings, ParameterSpace, RunStatus,
    SchedulerSettings, ScriptedEngine, StartRunRequest,
};

// =============================================================================
// Helpers
// =============================================================================

fn metrics(value: Value) -> MetricsMap {
    value.as_object().cloned().unwrap()
}

fn settings(max_poll_attempts: u32) -> OrchestratorSettings {
    OrchestratorSettings {
        default_max_parallel: 2,
        engine_max_parallel: 4,
        scheduler: SchedulerSettings {
            poll_interval: Duration::from_millis(5),
            max_poll_attempts,
        },
    }
}

/// Sharpe ratio of one tenth of the `fast` period; drawdown grows with it.
fn sharpe_engine() -> ScriptedEngine {
    ScriptedEngine::new().with_evaluator(|config| {
        let fast = config["fast"].as_f64().unwrap_or_default();
        metrics(json!({"sharpe": fast / 10.0, "max_drawdown": fast * 2.0}))
    })
}

fn shared(store: &Arc<InMemoryJobStore>) -> Arc<dyn JobStorePort> {
    Arc::clone(store) as Arc<dyn JobStorePort>
}

fn orchestrator(engine: &ScriptedEngine, store: &Arc<InMemoryJobStore>) -> Orchestrator {
    Orchestrator::new(
        Arc::new(engine.clone()),
        shared(store),
        settings(50),
    )
}

fn fast_sweep(name: &str, values: &[i64]) -> StartRunRequest {
    StartRunRequest::grid(
        name,
        json!({"strategy": {"name": "ema_cross"}}),
        ParameterSpace::builder()
            .param("fast", values.iter().copied())
            .build(),
    )
    .scored_by("sharpe", OptimisationDirection::Maximize)
}

fn positions_with(jobs: &[Job], status: JobStatus) -> Vec<u32> {
    jobs.iter()
        .filter(|job| job.status() == status)
        .map(Job::position)
        .collect()
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
async fn grid_run_completes_and_picks_best() {
    let engine = sharpe_engine();
    let store = Arc::new(InMemoryJobStore::new());
    let orchestrator = orchestrator(&engine, &store);

    let detail = orchestrator
        .execute_run(fast_sweep("ema", &[5, 10, 20]))
        .await
        .unwrap();

    assert_eq!(detail.status(), RunStatus::Completed);
    assert_eq!(detail.summary.total_jobs, 3);
    assert_eq!(detail.summary.completed_jobs, 3);
    assert_eq!(detail.summary.failed_jobs, 0);
    assert_eq!(detail.summary.running_jobs, 0);

    let best = detail.best_result.unwrap();
    assert_eq!(best.position(), 3);
    assert_eq!(best.parameters().get("fast"), Some(&json!(20)));
    assert_eq!(best.optimisation_score(), Some(2.0));

    // Each job's config is the base config with its combination applied.
    let configs: Vec<&Value> = detail.results.iter().map(Job::config).collect();
    assert_eq!(configs[0], &json!({"strategy": {"name": "ema_cross"}, "fast": 5}));
    assert_eq!(configs[2]["fast"], json!(20));

    assert_eq!(engine.launches(), 3);
    assert_eq!(engine.stops(), 3);
    assert_eq!(engine.active(), 0);
    assert_eq!(store.row_count(), 3);
}

#[tokio::test]
async fn minimize_picks_lowest_score() {
    let engine = sharpe_engine();
    let store = Arc::new(InMemoryJobStore::new());
    let orchestrator = orchestrator(&engine, &store);

    let request =
        fast_sweep("dd", &[8, 3, 12]).scored_by("max_drawdown", OptimisationDirection::Minimize);
    let detail = orchestrator.execute_run(request).await.unwrap();

    let best = detail.best_result.unwrap();
    assert_eq!(best.position(), 2);
    assert_eq!(best.optimisation_score(), Some(6.0));
}

#[tokio::test]
async fn strategy_parameters_are_patched_into_the_parameter_list() {
    let engine = ScriptedEngine::new().with_default_script(NodeScript::completes_with(metrics(
        json!({"total_return": "0.12"}),
    )));
    let store = Arc::new(InMemoryJobStore::new());
    let orchestrator = orchestrator(&engine, &store);

    let request = StartRunRequest::grid(
        "params",
        json!({"strategy": {"parameters": [{"key": "fast", "value": 1}]}}),
        ParameterSpace::builder()
            .param("strategy.parameters.fast", [7])
            .param("strategy.parameters.slow", [30])
            .build(),
    )
    .scored_by("total_return", OptimisationDirection::Maximize);
    let detail = orchestrator.execute_run(request).await.unwrap();

    let job = &detail.results[0];
    assert_eq!(
        job.config()["strategy"]["parameters"],
        json!([{"key": "fast", "value": 7}, {"key": "slow", "value": 30}])
    );
    // Numeric strings are coerced
    assert_eq!(job.optimisation_score(), Some(0.12));
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn concurrency_never_exceeds_max_parallel() {
    let engine = sharpe_engine().with_latency(Duration::from_millis(15));
    let store = Arc::new(InMemoryJobStore::new());
    let orchestrator = orchestrator(&engine, &store);

    let detail = orchestrator
        .execute_run(fast_sweep("gate", &[1, 2, 3, 4, 5, 6]).with_max_parallel(2))
        .await
        .unwrap();

    assert_eq!(detail.max_parallel, Some(2));
    assert_eq!(detail.summary.completed_jobs, 6);
    assert!(engine.peak_active() <= 2, "peak {}", engine.peak_active());
    assert!(engine.peak_active() >= 1);
}

#[tokio::test]
async fn requested_parallelism_is_capped_by_engine_limit() {
    let engine = sharpe_engine().with_latency(Duration::from_millis(10));
    let store = Arc::new(InMemoryJobStore::new());
    let orchestrator = orchestrator(&engine, &store);

    let detail = orchestrator
        .execute_run(fast_sweep("cap", &[1, 2, 3, 4, 5, 6, 7, 8]).with_max_parallel(64))
        .await
        .unwrap();

    assert_eq!(detail.max_parallel, Some(4));
    assert!(engine.peak_active() <= 4);
}

#[tokio::test]
async fn counters_stay_consistent_while_running() {
    let engine = sharpe_engine().with_latency(Duration::from_millis(10));
    let store = Arc::new(InMemoryJobStore::new());
    let orchestrator = orchestrator(&engine, &store);

    let started = orchestrator
        .start_run(fast_sweep("watch", &[1, 2, 3, 4, 5]).with_max_parallel(2))
        .unwrap();
    assert_eq!(started.status(), RunStatus::Running);
    assert!(started.results.iter().all(|job| job.status() == JobStatus::Pending));

    let run_id = started.run_id().clone();
    let mut samples = 0;
    let last = loop {
        let detail = orchestrator.get_run(&run_id).await.unwrap().unwrap();
        let progress = detail.summary.progress();
        assert!(progress.is_consistent(), "{progress:?}");
        assert!(progress.running <= 2, "{progress:?}");

        samples += 1;
        if detail.status() != RunStatus::Running || samples > 1_000 {
            break detail;
        }
        tokio::time::sleep(Duration::from_millis(3)).await;
    };

    assert_eq!(last.status(), RunStatus::Completed);
    assert_eq!(last.summary.completed_jobs, 5);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn one_failed_job_does_not_fail_the_run() {
    let engine =
        sharpe_engine().with_script("mix #2", NodeScript::fails_launch("engine rejected config"));
    let store = Arc::new(InMemoryJobStore::new());
    let orchestrator = orchestrator(&engine, &store);

    let detail = orchestrator
        .execute_run(fast_sweep("mix", &[5, 10, 15, 20]))
        .await
        .unwrap();

    assert_eq!(detail.status(), RunStatus::Completed);
    assert_eq!(detail.summary.completed_jobs, 3);
    assert_eq!(detail.summary.failed_jobs, 1);
    assert_eq!(positions_with(&detail.results, JobStatus::Failed), vec![2]);

    let failed = &detail.results[1];
    assert!(failed.error().unwrap().contains("engine rejected config"));
    assert!(failed.node_id().is_none());
    assert_eq!(detail.best_result.unwrap().position(), 4);
}

#[tokio::test]
async fn every_job_failing_fails_the_run() {
    let engine = ScriptedEngine::new().with_default_script(NodeScript::fails_launch("no capacity"));
    let store = Arc::new(InMemoryJobStore::new());
    let orchestrator = orchestrator(&engine, &store);

    let detail = orchestrator
        .execute_run(fast_sweep("doomed", &[1, 2]))
        .await
        .unwrap();

    assert_eq!(detail.status(), RunStatus::Failed);
    assert_eq!(detail.summary.failed_jobs, 2);
    assert!(detail.best_result.is_none());
}

#[tokio::test]
async fn poll_failure_stops_the_node_and_fails_the_job() {
    let engine = sharpe_engine().with_script("flaky #1", NodeScript::fails_poll("node vanished"));
    let store = Arc::new(InMemoryJobStore::new());
    let orchestrator = orchestrator(&engine, &store);

    let detail = orchestrator
        .execute_run(fast_sweep("flaky", &[1, 2]))
        .await
        .unwrap();

    assert_eq!(detail.status(), RunStatus::Completed);
    assert!(detail.results[0].error().unwrap().contains("node vanished"));
    assert_eq!(engine.active(), 0);
}

#[tokio::test]
async fn engine_error_status_still_collects_metrics() {
    let engine = sharpe_engine().with_default_script(
        NodeScript::default().with_statuses([NodeStatus::Running, NodeStatus::Error]),
    );
    let store = Arc::new(InMemoryJobStore::new());
    let orchestrator = orchestrator(&engine, &store);

    let detail = orchestrator
        .execute_run(fast_sweep("erroring", &[10]))
        .await
        .unwrap();

    assert_eq!(detail.results[0].status(), JobStatus::Completed);
    assert_eq!(detail.results[0].optimisation_score(), Some(1.0));
}

#[tokio::test]
async fn node_that_never_settles_is_stopped_at_poll_limit() {
    let engine =
        sharpe_engine().with_default_script(NodeScript::default().with_statuses([NodeStatus::Running]));
    let store = Arc::new(InMemoryJobStore::new());
    let orchestrator = Orchestrator::new(
        Arc::new(engine.clone()),
        shared(&store),
        settings(3),
    );

    let detail = orchestrator
        .execute_run(fast_sweep("slow", &[10]))
        .await
        .unwrap();

    assert_eq!(engine.polls(), 3);
    assert_eq!(engine.stops(), 1);
    assert_eq!(detail.results[0].status(), JobStatus::Completed);
    assert_eq!(detail.results[0].optimisation_score(), Some(1.0));
}

#[tokio::test]
async fn missing_metric_leaves_job_unscored() {
    let engine = ScriptedEngine::new()
        .with_default_script(NodeScript::completes_with(metrics(json!({"sharpe": null}))));
    let store = Arc::new(InMemoryJobStore::new());
    let orchestrator = orchestrator(&engine, &store);

    let detail = orchestrator
        .execute_run(fast_sweep("nulls", &[1, 2]))
        .await
        .unwrap();

    assert_eq!(detail.status(), RunStatus::Completed);
    assert!(detail.results.iter().all(|job| job.optimisation_score().is_none()));
    assert!(detail.best_result.is_none());
}

// =============================================================================
// Cancellation
// =============================================================================

fn stuck_engine() -> ScriptedEngine {
    sharpe_engine().with_default_script(NodeScript::default().with_statuses([NodeStatus::Running]))
}

#[tokio::test]
async fn cancelling_a_run_fails_unfinished_jobs_and_stops_nodes() {
    let engine = stuck_engine();
    let store = Arc::new(InMemoryJobStore::new());
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(engine.clone()),
        shared(&store),
        settings(10_000),
    ));

    let canceller = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            while orchestrator.registry().is_empty() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            tokio::time::sleep(Duration::from_millis(30)).await;
            for summary in orchestrator.registry().summaries() {
                orchestrator.cancel_run(&summary.run_id).unwrap();
            }
        })
    };

    let detail = orchestrator
        .execute_run(fast_sweep("cancel-me", &[1, 2, 3]).with_max_parallel(2))
        .await
        .unwrap();
    canceller.await.unwrap();

    assert_eq!(detail.status(), RunStatus::Failed);
    assert_eq!(detail.error.as_deref(), Some("cancelled"));
    assert_eq!(detail.summary.failed_jobs, 3);
    assert_eq!(detail.summary.running_jobs, 0);
    assert!(
        detail
            .results
            .iter()
            .all(|job| job.error() == Some("cancelled"))
    );

    // Only the two jobs holding slots ever reached the engine
    assert_eq!(engine.launches(), 2);
    assert_eq!(engine.active(), 0);
    assert!(orchestrator.registry().is_empty());

    // Cancelled state is persisted
    let stored = orchestrator.get_run(detail.run_id()).await.unwrap().unwrap();
    assert!(!stored.summary.live);
    assert_eq!(stored.status(), RunStatus::Failed);
    assert_eq!(stored.summary.failed_jobs, 3);
}

#[tokio::test]
async fn cancelled_run_with_a_completed_job_is_stored_as_failed() {
    let engine = stuck_engine().with_script("partial #1", NodeScript::default());
    let store = Arc::new(InMemoryJobStore::new());
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(engine.clone()),
        shared(&store),
        settings(10_000),
    ));

    let canceller = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            loop {
                let summaries = orchestrator.registry().summaries();
                if let Some(summary) = summaries.iter().find(|s| s.completed_jobs == 1) {
                    orchestrator.cancel_run(&summary.run_id).unwrap();
                    return;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
    };

    let live = orchestrator
        .execute_run(fast_sweep("partial", &[1, 2, 3]).with_max_parallel(3))
        .await
        .unwrap();
    canceller.await.unwrap();

    assert_eq!(live.status(), RunStatus::Failed);
    assert_eq!(live.summary.completed_jobs, 1);
    assert_eq!(live.summary.failed_jobs, 2);

    let stored = orchestrator.get_run(live.run_id()).await.unwrap().unwrap();
    assert!(!stored.summary.live);
    assert_eq!(stored.status(), live.status());
    assert_eq!(stored.error.as_deref(), Some("cancelled"));
    assert_eq!(stored.summary.progress(), live.summary.progress());
    assert_eq!(stored.best_result, live.best_result);

    let listed = orchestrator.list_runs().await.unwrap();
    assert_eq!(listed[0].status, RunStatus::Failed);
}

#[tokio::test]
async fn shutdown_cancels_every_live_run() {
    let engine = stuck_engine();
    let store = Arc::new(InMemoryJobStore::new());
    let orchestrator = orchestrator(&engine, &store);

    let first = orchestrator.start_run(fast_sweep("a", &[1, 2])).unwrap();
    let second = orchestrator.start_run(fast_sweep("b", &[3])).unwrap();
    assert_eq!(orchestrator.registry().len(), 2);

    tokio::time::sleep(Duration::from_millis(20)).await;
    orchestrator.shutdown();

    for _ in 0..500 {
        if orchestrator.registry().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(orchestrator.registry().is_empty());

    for run_id in [first.run_id(), second.run_id()] {
        let detail = orchestrator.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(detail.status(), RunStatus::Failed);
    }
    assert_eq!(engine.active(), 0);
}

// =============================================================================
// Reconstruction and listing
// =============================================================================

#[tokio::test]
async fn finished_runs_are_served_from_the_store() {
    let engine = sharpe_engine();
    let store = Arc::new(InMemoryJobStore::new());
    let orchestrator = orchestrator(&engine, &store);

    let live = orchestrator
        .execute_run(fast_sweep("history", &[5, 10, 20]))
        .await
        .unwrap();
    assert!(orchestrator.registry().is_empty());

    let stored = orchestrator.get_run(live.run_id()).await.unwrap().unwrap();
    assert!(!stored.summary.live);
    assert_eq!(stored.status(), live.status());
    assert_eq!(stored.summary.progress(), live.summary.progress());
    assert_eq!(stored.results, live.results);
    assert_eq!(stored.best_result, live.best_result);
    assert_eq!(stored.summary.optimisation_metric.as_deref(), Some("sharpe"));
    // Settings that are not stored per job
    assert!(stored.max_parallel.is_none());
    assert!(stored.parameter_space.is_none());
}

#[tokio::test]
async fn list_runs_includes_live_and_stored_runs_newest_first() {
    let engine = stuck_engine();
    let store = Arc::new(InMemoryJobStore::new());
    let finished_engine = sharpe_engine();
    Orchestrator::new(
        Arc::new(finished_engine),
        shared(&store),
        settings(50),
    )
    .execute_run(fast_sweep("older", &[1]))
    .await
    .unwrap();

    let orchestrator = orchestrator(&engine, &store);
    let running = orchestrator.start_run(fast_sweep("newer", &[1, 2])).unwrap();

    let runs = orchestrator.list_runs().await.unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(&runs[0].run_id, running.run_id());
    assert!(runs[0].live);
    assert_eq!(runs[1].name, "older");
    assert!(!runs[1].live);
    assert_eq!(runs[1].status, RunStatus::Completed);

    orchestrator.shutdown();
}

// =============================================================================
// Random search
// =============================================================================

fn wide_space() -> ParameterSpace {
    ParameterSpace::builder()
        .param("fast", [3, 5, 8, 13, 21])
        .param("slow", [30, 50, 80, 130, 210])
        .build()
}

fn sampled_combinations(jobs: &[Job]) -> Vec<Combination> {
    jobs.iter().map(|job| job.parameters().clone()).collect()
}

#[tokio::test]
async fn random_runs_with_the_same_seed_sample_the_same_combinations() {
    let engine = sharpe_engine();
    let store = Arc::new(InMemoryJobStore::new());
    let orchestrator = orchestrator(&engine, &store);

    let request = StartRunRequest::grid("rnd", json!({}), wide_space()).sampled(4, Some(42));
    let first = orchestrator.execute_run(request.clone()).await.unwrap();
    let second = orchestrator.execute_run(request).await.unwrap();

    assert_eq!(first.summary.total_jobs, 4);
    assert_eq!(first.random_seed, Some(42));
    assert_eq!(
        sampled_combinations(&first.results),
        sampled_combinations(&second.results)
    );

    let mut distinct = sampled_combinations(&first.results);
    distinct.dedup();
    assert_eq!(distinct.len(), 4);
}

#[tokio::test]
async fn oversized_sample_runs_the_whole_grid() {
    let engine = sharpe_engine();
    let store = Arc::new(InMemoryJobStore::new());
    let orchestrator = orchestrator(&engine, &store);

    let request = StartRunRequest::grid("all", json!({}), wide_space()).sampled(500, Some(7));
    let detail = orchestrator.execute_run(request).await.unwrap();

    assert_eq!(detail.summary.total_jobs, 25);
    assert_eq!(detail.status(), RunStatus::Completed);
}
