//! Run and job lifecycle statuses.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of an optimisation run.
///
/// `PENDING -> RUNNING -> COMPLETED | FAILED`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Created, combinations not yet scheduled.
    Pending,
    /// Jobs are being scheduled or executed.
    Running,
    /// Every job reached a terminal state and at least one completed.
    Completed,
    /// Every job failed, or the run itself was aborted.
    Failed,
}

impl RunStatus {
    /// Returns true once the run can no longer change.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Derive a run status from job counters.
    ///
    /// Used both when a live run finishes and when a run is rebuilt from
    /// persisted job rows.
    #[must_use]
    pub const fn from_counts(total: u32, completed: u32, failed: u32) -> Self {
        if completed + failed < total {
            Self::Running
        } else if failed > 0 && completed == 0 {
            Self::Failed
        } else {
            Self::Completed
        }
    }

    /// Wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a single combination's backtest.
///
/// `PENDING -> RUNNING -> COMPLETED | FAILED`, or `PENDING -> FAILED` when the
/// run is cancelled before the job acquires a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Waiting for a concurrency slot.
    Pending,
    /// Slot acquired, backtest in flight.
    Running,
    /// Backtest finished and metrics were collected.
    Completed,
    /// Launch, polling or stopping raised an error.
    Failed,
}

impl JobStatus {
    /// Returns true if the job is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Wire representation, also used as the stored column value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Parse a stored status value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(Self::Pending),
            "RUNNING" => Some(Self::Running),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(3, 1, 0 => RunStatus::Running ; "jobs outstanding")]
    #[test_case(3, 0, 3 => RunStatus::Failed ; "all failed")]
    #[test_case(3, 1, 2 => RunStatus::Completed ; "partial failure still completes")]
    #[test_case(2, 2, 0 => RunStatus::Completed ; "all completed")]
    #[test_case(0, 0, 0 => RunStatus::Completed ; "nothing to run")]
    fn run_status_from_counts(total: u32, completed: u32, failed: u32) -> RunStatus {
        RunStatus::from_counts(total, completed, failed)
    }

    #[test]
    fn terminal_states() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn job_status_parse_round_trips_wire_names() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("running"), None);
    }

    #[test]
    fn statuses_serialize_screaming_snake_case() {
        assert_eq!(
            serde_json::to_string(&RunStatus::Completed).unwrap(),
            "\"COMPLETED\""
        );
        assert_eq!(
            serde_json::to_string(&JobStatus::Pending).unwrap(),
            "\"PENDING\""
        );
    }
}
