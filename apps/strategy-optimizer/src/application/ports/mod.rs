//! Application Ports (Driven)
//!
//! Interfaces the orchestrator uses to reach the backtest engine and the job store.

mod engine_port;
mod job_store_port;

#[cfg(test)]
pub use engine_port::MockBacktestEnginePort;
pub use engine_port::{BacktestEnginePort, EngineError, NodeHandle, NodeSnapshot, NodeStatus};
#[cfg(test)]
pub use job_store_port::MockJobStorePort;
pub use job_store_port::{JobRecord, JobStorePort, StoreError, StoredRunSummary};
