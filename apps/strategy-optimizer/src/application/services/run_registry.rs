//! Live run registry.
//!
//! Holds every run that is still being driven. A run leaves the registry once it
//! reaches a terminal state; from then on it is read back from the job store.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::application::dto::{RunDetail, RunSummary};
use crate::domain::optimization::Run;
use crate::domain::shared::RunId;

/// Handle to a run that is being driven.
#[derive(Debug, Clone)]
pub struct LiveRun {
    run: Arc<Mutex<Run>>,
    cancel: CancellationToken,
}

impl LiveRun {
    /// Wrap a run with a fresh cancellation token.
    #[must_use]
    pub fn new(run: Run) -> Self {
        Self {
            run: Arc::new(Mutex::new(run)),
            cancel: CancellationToken::new(),
        }
    }

    /// Shared run state. Never hold the guard across an `.await`.
    #[must_use]
    pub const fn run(&self) -> &Arc<Mutex<Run>> {
        &self.run
    }

    /// Token tripped when the run is cancelled.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run identifier.
    #[must_use]
    pub fn id(&self) -> RunId {
        self.run.lock().id().clone()
    }

    /// Current summary.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        RunSummary::from_run(&self.run.lock())
    }

    /// Current detail.
    #[must_use]
    pub fn detail(&self) -> RunDetail {
        RunDetail::from_run(&self.run.lock())
    }
}

/// Process-scoped map of live runs.
#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: RwLock<HashMap<RunId, LiveRun>>,
}

impl RunRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live run.
    pub fn insert(&self, live: LiveRun) {
        let id = live.id();
        self.runs.write().insert(id, live);
    }

    /// Look up a live run.
    #[must_use]
    pub fn get(&self, run_id: &RunId) -> Option<LiveRun> {
        self.runs.read().get(run_id).cloned()
    }

    /// Evict a run.
    pub fn remove(&self, run_id: &RunId) -> Option<LiveRun> {
        self.runs.write().remove(run_id)
    }

    /// Returns true if the run is live.
    #[must_use]
    pub fn contains(&self, run_id: &RunId) -> bool {
        self.runs.read().contains_key(run_id)
    }

    /// Number of live runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.read().len()
    }

    /// Returns true if no run is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.read().is_empty()
    }

    /// Summaries of every live run.
    #[must_use]
    pub fn summaries(&self) -> Vec<RunSummary> {
        let live: Vec<LiveRun> = self.runs.read().values().cloned().collect();
        live.iter().map(LiveRun::summary).collect()
    }

    /// Trip the cancellation token of every live run. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let runs = self.runs.read();
        for live in runs.values() {
            live.cancel.cancel();
        }
        runs.len()
    }
}
