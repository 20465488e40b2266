//! Integration Tests for the SQLite Job Store
//!
//! Runs sweeps against a file-backed store and reads them back through a
//! fresh orchestrator, as a restarted process would.

// Allow unwrap in tests - tests should panic on unexpected errors
#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use strategy_optimizer::{
    JobStatus, JobStorePort, NodeScript, OptimisationDirection, Orchestrator,
    OrchestratorSettings, ParameterSpace, RunStatus, SchedulerSettings, ScriptedEngine,
    SqliteJobStore, StartRunRequest,
};

fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        default_max_parallel: 3,
        engine_max_parallel: 4,
        scheduler: SchedulerSettings {
            poll_interval: Duration::from_millis(2),
            max_poll_attempts: 20,
        },
    }
}

fn engine() -> ScriptedEngine {
    ScriptedEngine::new()
        .with_evaluator(|config| {
            let fast = config["fast"].as_f64().unwrap_or_default();
            let slow = config["slow"].as_f64().unwrap_or_default();
            json!({"metrics": {"sharpe": (slow - fast) / 100.0}})
                .as_object()
                .cloned()
                .unwrap()
        })
        .with_script("cross #4", NodeScript::fails_launch("invalid window"))
}

fn request() -> StartRunRequest {
    StartRunRequest::grid(
        "cross",
        json!({"strategy": {"name": "ema_cross"}}),
        ParameterSpace::builder()
            .param("fast", [5, 10])
            .param("slow", [50, 100])
            .build(),
    )
    .scored_by("sharpe", OptimisationDirection::Maximize)
}

fn open(dir: &TempDir) -> Arc<dyn JobStorePort> {
    Arc::new(SqliteJobStore::open(dir.path().join("nested").join("optimizer.db")).unwrap())
}

#[tokio::test]
async fn runs_survive_a_restart() {
    let dir = TempDir::new().unwrap();

    let live = {
        let orchestrator = Orchestrator::new(Arc::new(engine()), open(&dir), settings());
        orchestrator.execute_run(request()).await.unwrap()
    };
    assert_eq!(live.status(), RunStatus::Completed);
    assert_eq!(live.summary.failed_jobs, 1);

    let restarted = Orchestrator::new(Arc::new(ScriptedEngine::new()), open(&dir), settings());

    let runs = restarted.list_runs().await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(&runs[0].run_id, live.run_id());
    assert!(!runs[0].live);
    assert_eq!(runs[0].status, RunStatus::Completed);
    assert_eq!(runs[0].progress(), live.summary.progress());

    let stored = restarted.get_run(live.run_id()).await.unwrap().unwrap();
    assert_eq!(stored.results, live.results);
    assert_eq!(stored.best_result, live.best_result);

    // Odometer order: fast varies slowest, so position 2 is fast=5, slow=100
    let best = stored.best_result.unwrap();
    assert_eq!(best.position(), 2);
    assert_eq!(best.optimisation_score(), Some(0.95));

    let failed = &stored.results[3];
    assert_eq!(failed.status(), JobStatus::Failed);
    assert!(failed.error().unwrap().contains("invalid window"));
}

#[tokio::test]
async fn cancelled_run_is_stored_as_failed() {
    let dir = TempDir::new().unwrap();
    let stuck = ScriptedEngine::new().with_default_script(
        NodeScript::default().with_statuses([strategy_optimizer::NodeStatus::Running]),
    );
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(stuck),
        open(&dir),
        OrchestratorSettings {
            scheduler: SchedulerSettings {
                poll_interval: Duration::from_millis(2),
                max_poll_attempts: 100_000,
            },
            ..settings()
        },
    ));

    let started = orchestrator.start_run(request()).unwrap();
    tokio::time::sleep(Duration::from_millis(25)).await;
    orchestrator.cancel_run(started.run_id()).unwrap();

    for _ in 0..500 {
        if !orchestrator.registry().contains(started.run_id()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let restarted = Orchestrator::new(Arc::new(ScriptedEngine::new()), open(&dir), settings());
    let stored = restarted.get_run(started.run_id()).await.unwrap().unwrap();

    assert_eq!(stored.status(), RunStatus::Failed);
    assert_eq!(stored.summary.failed_jobs, 4);
    assert_eq!(stored.summary.running_jobs, 0);
    assert!(
        stored
            .results
            .iter()
            .all(|job| job.error() == Some("cancelled"))
    );
}

#[tokio::test]
async fn separate_runs_are_listed_newest_first() {
    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(Arc::new(engine()), open(&dir), settings());

    let first = orchestrator.execute_run(request()).await.unwrap();
    let mut renamed = request();
    renamed.name = "cross-2".to_string();
    let second = orchestrator.execute_run(renamed).await.unwrap();

    let runs = orchestrator.list_runs().await.unwrap();
    let ids: Vec<_> = runs.iter().map(|run| run.run_id.clone()).collect();
    assert_eq!(ids, vec![second.run_id().clone(), first.run_id().clone()]);
    assert_eq!(runs[0].name, "cross-2");
}
