//! Application Services
//!
//! Long-running coordination of runs: the orchestrator surface, the live run
//! registry and the driver that executes each run's jobs.

mod orchestrator;
mod run_driver;
mod run_registry;

pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use run_driver::{CANCELLED, RunDriver, SchedulerSettings};
pub use run_registry::{LiveRun, RunRegistry};
