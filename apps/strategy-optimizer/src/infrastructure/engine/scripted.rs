//! Deterministic in-process engine.
//!
//! Stands in for the real engine in tests and local dry runs. Every node
//! follows a [`NodeScript`], chosen by node label, with a default script for
//! labels that have none. Metrics come from the script or from an evaluator
//! applied to the launched config.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::application::ports::{
    BacktestEnginePort, EngineError, NodeHandle, NodeSnapshot, NodeStatus,
};
use crate::domain::optimization::MetricsMap;
use crate::domain::shared::NodeId;

type Evaluator = Arc<dyn Fn(&Value) -> MetricsMap + Send + Sync>;

/// Behaviour of one scripted node.
#[derive(Debug, Clone)]
pub struct NodeScript {
    statuses: Vec<NodeStatus>,
    metrics: Option<MetricsMap>,
    launch_error: Option<String>,
    poll_error: Option<String>,
    metrics_on_stop: bool,
}

impl Default for NodeScript {
    fn default() -> Self {
        Self {
            statuses: vec![NodeStatus::Stopped],
            metrics: None,
            launch_error: None,
            poll_error: None,
            metrics_on_stop: true,
        }
    }
}

impl NodeScript {
    /// Node that reports `metrics`.
    #[must_use]
    pub fn completes_with(metrics: MetricsMap) -> Self {
        Self {
            metrics: Some(metrics),
            ..Self::default()
        }
    }

    /// Node whose launch is rejected.
    #[must_use]
    pub fn fails_launch(message: impl Into<String>) -> Self {
        Self {
            launch_error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Node that launches but cannot be polled.
    #[must_use]
    pub fn fails_poll(message: impl Into<String>) -> Self {
        Self {
            poll_error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Poll statuses in order; the last one repeats.
    #[must_use]
    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = NodeStatus>) -> Self {
        self.statuses = statuses.into_iter().collect();
        if self.statuses.is_empty() {
            self.statuses.push(NodeStatus::Stopped);
        }
        self
    }

    /// Report metrics only while polling; the stop snapshot carries none.
    #[must_use]
    pub const fn metrics_only_on_poll(mut self) -> Self {
        self.metrics_on_stop = false;
        self
    }
}

#[derive(Debug)]
struct ScriptedNode {
    script: NodeScript,
    metrics: MetricsMap,
    polls: usize,
    stopped: bool,
}

impl ScriptedNode {
    fn status(&self) -> NodeStatus {
        let statuses = &self.script.statuses;
        statuses
            .get(self.polls.saturating_sub(1))
            .or_else(|| statuses.last())
            .copied()
            .unwrap_or(NodeStatus::Stopped)
    }
}

/// Call counters of a [`ScriptedEngine`].
#[derive(Debug, Default)]
struct Counters {
    launches: AtomicUsize,
    polls: AtomicUsize,
    stops: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

/// `BacktestEnginePort` that follows per-label scripts.
#[derive(Clone)]
pub struct ScriptedEngine {
    default_script: NodeScript,
    scripts: Arc<HashMap<String, NodeScript>>,
    evaluator: Option<Evaluator>,
    latency: Duration,
    nodes: Arc<Mutex<HashMap<NodeId, ScriptedNode>>>,
    counters: Arc<Counters>,
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScriptedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedEngine")
            .field("scripts", &self.scripts.len())
            .field("latency", &self.latency)
            .field("launches", &self.launches())
            .field("active", &self.active())
            .finish_non_exhaustive()
    }
}

impl ScriptedEngine {
    /// Engine whose nodes stop on the first poll with empty metrics.
    #[must_use]
    pub fn new() -> Self {
        Self {
            default_script: NodeScript::default(),
            scripts: Arc::new(HashMap::new()),
            evaluator: None,
            latency: Duration::ZERO,
            nodes: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Script for nodes whose label has no script of its own.
    #[must_use]
    pub fn with_default_script(mut self, script: NodeScript) -> Self {
        self.default_script = script;
        self
    }

    /// Script for the node launched with `label`.
    #[must_use]
    pub fn with_script(mut self, label: impl Into<String>, script: NodeScript) -> Self {
        Arc::make_mut(&mut self.scripts).insert(label.into(), script);
        self
    }

    /// Compute metrics from the launched config when a script has none.
    #[must_use]
    pub fn with_evaluator<F>(mut self, evaluator: F) -> Self
    where
        F: Fn(&Value) -> MetricsMap + Send + Sync + 'static,
    {
        self.evaluator = Some(Arc::new(evaluator));
        self
    }

    /// Delay applied to every call.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Successful launches so far.
    #[must_use]
    pub fn launches(&self) -> usize {
        self.counters.launches.load(Ordering::SeqCst)
    }

    /// Poll calls so far.
    #[must_use]
    pub fn polls(&self) -> usize {
        self.counters.polls.load(Ordering::SeqCst)
    }

    /// Stop calls so far.
    #[must_use]
    pub fn stops(&self) -> usize {
        self.counters.stops.load(Ordering::SeqCst)
    }

    /// Nodes launched and not yet stopped.
    #[must_use]
    pub fn active(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously active nodes.
    #[must_use]
    pub fn peak_active(&self) -> usize {
        self.counters.peak_active.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn script_for(&self, label: &str) -> NodeScript {
        self.scripts
            .get(label)
            .cloned()
            .unwrap_or_else(|| self.default_script.clone())
    }
}

#[async_trait]
impl BacktestEnginePort for ScriptedEngine {
    async fn launch(&self, config: &Value, label: &str) -> Result<NodeHandle, EngineError> {
        self.pause().await;

        let script = self.script_for(label);
        if let Some(message) = &script.launch_error {
            return Err(EngineError::Launch(message.clone()));
        }

        let metrics = match (&script.metrics, &self.evaluator) {
            (Some(metrics), _) => metrics.clone(),
            (None, Some(evaluate)) => evaluate(config),
            (None, None) => MetricsMap::new(),
        };

        let sequence = self.counters.launches.fetch_add(1, Ordering::SeqCst) + 1;
        let node_id = NodeId::new(format!("scripted-{sequence}"));
        self.nodes.lock().insert(
            node_id.clone(),
            ScriptedNode {
                script,
                metrics,
                polls: 0,
                stopped: false,
            },
        );

        let active = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak_active.fetch_max(active, Ordering::SeqCst);

        Ok(NodeHandle { node_id })
    }

    async fn poll(&self, node_id: &NodeId) -> Result<NodeSnapshot, EngineError> {
        self.pause().await;
        self.counters.polls.fetch_add(1, Ordering::SeqCst);

        let mut nodes = self.nodes.lock();
        let node = nodes
            .get_mut(node_id)
            .ok_or_else(|| EngineError::Poll(format!("unknown node {node_id}")))?;
        if let Some(message) = &node.script.poll_error {
            return Err(EngineError::Poll(message.clone()));
        }

        node.polls += 1;
        let status = node.status();
        let metrics = if status.is_settling() || !node.script.metrics_on_stop {
            node.metrics.clone()
        } else {
            MetricsMap::new()
        };
        Ok(NodeSnapshot { status, metrics })
    }

    async fn stop(&self, node_id: &NodeId) -> Result<NodeSnapshot, EngineError> {
        self.pause().await;
        self.counters.stops.fetch_add(1, Ordering::SeqCst);

        let mut nodes = self.nodes.lock();
        let node = nodes
            .get_mut(node_id)
            .ok_or_else(|| EngineError::Stop(format!("unknown node {node_id}")))?;

        if !node.stopped {
            node.stopped = true;
            self.counters.active.fetch_sub(1, Ordering::SeqCst);
        }

        let metrics = if node.script.metrics_on_stop {
            node.metrics.clone()
        } else {
            MetricsMap::new()
        };
        Ok(NodeSnapshot {
            status: NodeStatus::Stopped,
            metrics,
        })
    }
}
