// Allow unwrap/expect in tests - tests should panic on unexpected errors
// Allow test-specific patterns and pedantic lints in test code
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Strategy Optimizer - Rust Core Library
//!
//! Runs parameter sweeps for trading strategies against an external backtest
//! engine and reports the best combination of each sweep.
//!
//! # Architecture (Clean Architecture + DDD + Hexagonal)
//!
//! ## Layers (inside → outside)
//!
//! - **Domain**: Core optimisation logic
//!   - `optimization`: Run and Job aggregates, parameter space expansion,
//!     config patching, metric extraction, best-result selection
//!   - `shared`: Identifiers
//!
//! - **Application**: Orchestration
//!   - `ports`: `BacktestEnginePort`, `JobStorePort`
//!   - `services`: `Orchestrator`, `RunRegistry`, `RunDriver`
//!   - `dto`: `StartRunRequest`, `RunSummary`, `RunDetail`
//!
//! - **Infrastructure**: Adapters
//!   - `engine`: HTTP engine client, scripted engine
//!   - `persistence`: SQLite and in-memory job stores
//!
//! Cross-cutting: `config` (YAML + env interpolation), `error` (stable error
//! codes), `observability` (Prometheus metrics), `telemetry` (tracing).

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Clean Architecture Layers
// =============================================================================

/// Domain layer - Core business logic with no I/O.
pub mod domain;

/// Application layer - Services and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Cross-cutting
// =============================================================================

/// Configuration loading and validation.
pub mod config;

/// Top-level error type and error codes.
pub mod error;

/// Prometheus metrics.
pub mod observability;

/// Tracing subscriber setup.
pub mod telemetry;

// =============================================================================
// Re-exports
// =============================================================================

// Domain re-exports
pub use domain::optimization::{
    Combination, Job, JobStatus, MetricsMap, OptimisationDirection, ParameterSpace, Run,
    RunStatus, SearchPlan, ValidationError, extract_metric, patch_config, select_best,
};
pub use domain::shared::{NodeId, RunId};

// Application re-exports
pub use application::dto::{RunDetail, RunSummary, StartRunRequest};
pub use application::ports::{
    BacktestEnginePort, EngineError, JobRecord, JobStorePort, NodeHandle, NodeSnapshot,
    NodeStatus, StoreError,
};
pub use application::services::{Orchestrator, OrchestratorSettings, SchedulerSettings};

// Infrastructure re-exports
pub use infrastructure::engine::{HttpBacktestEngine, NodeScript, ScriptedEngine};
pub use infrastructure::persistence::{InMemoryJobStore, SqliteJobStore};

pub use error::{ErrorCode, OptimizerError};
