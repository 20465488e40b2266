//! Backtest Engine Port (Driven Port)
//!
//! Interface to the external compute engine that runs one backtest per node.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::optimization::MetricsMap;
use crate::domain::shared::NodeId;

/// Handle returned when a node is launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeHandle {
    /// Engine-assigned node identifier.
    pub node_id: NodeId,
}

/// Node status as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Accepted, not yet running.
    Pending,
    /// Booting.
    Starting,
    /// Backtest in progress.
    Running,
    /// Shutting down; results are final.
    Stopping,
    /// Finished.
    Stopped,
    /// Engine-side failure. Still a finished node, not an adapter error.
    Error,
    /// Any status this client does not know.
    Unknown,
}

impl NodeStatus {
    /// Map an engine status string (case-insensitive).
    #[must_use]
    pub fn from_engine(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" => Self::Pending,
            "starting" | "initializing" => Self::Starting,
            "running" => Self::Running,
            "stopping" => Self::Stopping,
            "stopped" | "finished" | "completed" => Self::Stopped,
            "error" | "failed" => Self::Error,
            _ => Self::Unknown,
        }
    }

    /// Returns true if the node will not make further progress.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }

    /// Returns true if polling can stop: terminal or on its way there.
    #[must_use]
    pub const fn is_settling(&self) -> bool {
        matches!(self, Self::Stopping | Self::Stopped | Self::Error)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    /// Node status.
    pub status: NodeStatus,
    /// Metrics reported so far.
    pub metrics: MetricsMap,
}

impl NodeSnapshot {
    /// Snapshot with no metrics.
    #[must_use]
    pub fn bare(status: NodeStatus) -> Self {
        Self {
            status,
            metrics: MetricsMap::new(),
        }
    }
}

/// Engine port error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Engine refused to launch a node.
    #[error("launch failed: {0}")]
    Launch(String),

    /// Engine could not report a node's status.
    #[error("poll failed: {0}")]
    Poll(String),

    /// Engine could not stop a node.
    #[error("stop failed: {0}")]
    Stop(String),

    /// Transport-level failure.
    #[error("engine network error: {0}")]
    Network(String),

    /// Non-success HTTP status.
    #[error("engine returned HTTP {status}: {message}")]
    Http {
        /// Status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// Response body did not match the expected shape.
    #[error("failed to decode engine response: {0}")]
    Decode(String),

    /// Retries exhausted.
    #[error("engine request failed after {attempts} attempts")]
    MaxRetriesExceeded {
        /// Attempts made.
        attempts: u32,
    },
}

/// Port for the backtest execution engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BacktestEnginePort: Send + Sync {
    /// Start a backtest node for one patched configuration.
    async fn launch(&self, config: &Value, label: &str) -> Result<NodeHandle, EngineError>;

    /// Report the node's status and metrics so far.
    async fn poll(&self, node_id: &NodeId) -> Result<NodeSnapshot, EngineError>;

    /// Stop the node and return its final metrics.
    async fn stop(&self, node_id: &NodeId) -> Result<NodeSnapshot, EngineError>;
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("RUNNING" => NodeStatus::Running)]
    #[test_case(" stopping " => NodeStatus::Stopping)]
    #[test_case("stopped" => NodeStatus::Stopped)]
    #[test_case("Error" => NodeStatus::Error)]
    #[test_case("warming-up" => NodeStatus::Unknown)]
    fn maps_engine_status(raw: &str) -> NodeStatus {
        NodeStatus::from_engine(raw)
    }

    #[test]
    fn settling_includes_stopping() {
        assert!(NodeStatus::Stopping.is_settling());
        assert!(!NodeStatus::Stopping.is_terminal());
        assert!(NodeStatus::Error.is_terminal());
        assert!(!NodeStatus::Running.is_settling());
    }
}
