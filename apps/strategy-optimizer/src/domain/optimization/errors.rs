//! Optimization domain errors.

use thiserror::Error;

use super::value_objects::{JobStatus, RunStatus};

/// A run request that cannot be turned into jobs.
///
/// Raised synchronously by run creation; no run exists when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A parameter has no candidates left after dropping nulls.
    #[error("parameter '{name}' has no candidate values")]
    EmptyParameter {
        /// Parameter name.
        name: String,
    },

    /// The parameter space declares no parameters at all.
    #[error("parameter space is empty")]
    EmptySpace,

    /// A random plan asked for zero samples.
    #[error("sample_count must be at least 1")]
    ZeroSampleCount,

    /// The cartesian product does not fit in memory addressing.
    #[error("parameter space has too many combinations to enumerate")]
    SpaceTooLarge,

    /// A combination key could not be applied to the base configuration.
    #[error("cannot apply parameter '{key}': {reason}")]
    InvalidPatch {
        /// Combination key.
        key: String,
        /// Why the path could not be written.
        reason: String,
    },

    /// Any other malformed request field.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Illegal lifecycle transition on a run or one of its jobs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// Job cannot move from its current status.
    #[error("job #{position} cannot move from {from} to {to}")]
    InvalidJobTransition {
        /// Job position.
        position: u32,
        /// Current status.
        from: JobStatus,
        /// Attempted status.
        to: JobStatus,
    },

    /// Run cannot move from its current status.
    #[error("run cannot move from {from} to {to}")]
    InvalidRunTransition {
        /// Current status.
        from: RunStatus,
        /// Attempted status.
        to: RunStatus,
    },

    /// No job exists at the given position.
    #[error("run has no job at position {position}")]
    UnknownPosition {
        /// Requested position.
        position: u32,
    },
}
