//! Progress counters for a run.

use serde::{Deserialize, Serialize};

/// Snapshot of a run's job counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunProgress {
    /// Number of jobs in the run.
    pub total: u32,
    /// Jobs that finished successfully.
    pub completed: u32,
    /// Jobs that failed.
    pub failed: u32,
    /// Jobs currently holding a slot.
    pub running: u32,
}

impl RunProgress {
    /// Jobs not yet started.
    #[must_use]
    pub const fn pending(&self) -> u32 {
        self.total
            .saturating_sub(self.completed + self.failed + self.running)
    }

    /// Jobs in a terminal state.
    #[must_use]
    pub const fn finished(&self) -> u32 {
        self.completed + self.failed
    }

    /// Returns true if the counters can describe a real run.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.completed + self.failed + self.running <= self.total
    }

    /// Completion percentage (terminal jobs over total).
    #[must_use]
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (f64::from(self.finished()) / f64::from(self.total)) * 100.0
        }
    }
}
