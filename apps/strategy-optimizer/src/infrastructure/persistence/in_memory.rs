//! In-memory job store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::application::ports::{JobRecord, JobStorePort, StoreError, StoredRunSummary};
use crate::domain::shared::RunId;

type RunRows = Arc<Mutex<BTreeMap<u32, JobRecord>>>;

/// In-memory implementation of `JobStorePort`.
///
/// Rows are grouped per run behind their own lock, so writers of unrelated
/// runs never contend. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    runs: RwLock<HashMap<RunId, RunRows>>,
}

impl InMemoryJobStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored runs.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs.read().len()
    }

    /// Number of stored rows across all runs.
    #[must_use]
    pub fn row_count(&self) -> usize {
        let runs: Vec<RunRows> = self.runs.read().values().cloned().collect();
        runs.iter().map(|rows| rows.lock().len()).sum()
    }

    fn rows_for(&self, run_id: &RunId) -> RunRows {
        if let Some(rows) = self.runs.read().get(run_id) {
            return Arc::clone(rows);
        }
        Arc::clone(self.runs.write().entry(run_id.clone()).or_default())
    }
}

#[async_trait]
impl JobStorePort for InMemoryJobStore {
    async fn upsert_job(&self, record: &JobRecord) -> Result<(), StoreError> {
        let rows = self.rows_for(&record.run_id);
        rows.lock().insert(record.position, record.clone());
        Ok(())
    }

    async fn list_run_summaries(&self) -> Result<Vec<StoredRunSummary>, StoreError> {
        let runs: Vec<RunRows> = self.runs.read().values().cloned().collect();

        let mut summaries: Vec<StoredRunSummary> = runs
            .iter()
            .filter_map(|rows| {
                let records: Vec<JobRecord> = rows.lock().values().cloned().collect();
                StoredRunSummary::from_records(&records)
            })
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    async fn load_run_jobs(&self, run_id: &RunId) -> Result<Vec<JobRecord>, StoreError> {
        let Some(rows) = self.runs.read().get(run_id).cloned() else {
            return Ok(Vec::new());
        };
        let records = rows.lock().values().cloned().collect();
        Ok(records)
    }
}
