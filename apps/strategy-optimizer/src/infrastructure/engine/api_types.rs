//! Wire types of the backtest engine HTTP API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::ports::{NodeSnapshot, NodeStatus};
use crate::domain::optimization::MetricsMap;

/// `POST /nodes` body.
#[derive(Debug, Serialize)]
pub struct LaunchNodeRequest<'a> {
    /// Patched strategy configuration.
    pub config: &'a Value,
    /// Human-readable node label.
    pub label: &'a str,
}

/// `POST /nodes` response.
#[derive(Debug, Deserialize)]
pub struct LaunchNodeResponse {
    /// Identifier of the launched node.
    pub node_id: String,
}

/// `GET /nodes/{id}` and `POST /nodes/{id}/stop` response.
#[derive(Debug, Deserialize)]
pub struct NodeStateResponse {
    /// Engine status string.
    #[serde(default)]
    pub status: String,
    /// Metrics reported so far; `null` or missing when none.
    #[serde(default)]
    pub metrics: Option<MetricsMap>,
}

impl From<NodeStateResponse> for NodeSnapshot {
    fn from(response: NodeStateResponse) -> Self {
        Self {
            status: NodeStatus::from_engine(&response.status),
            metrics: response.metrics.unwrap_or_default(),
        }
    }
}

/// Error body returned by the engine.
#[derive(Debug, Deserialize)]
pub struct EngineErrorResponse {
    /// Error message.
    #[serde(alias = "detail", alias = "error")]
    pub message: String,
}
