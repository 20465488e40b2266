//! Error types for the strategy optimizer.
//!
//! Each layer has its own `thiserror` enum; [`OptimizerError`] wraps them at the
//! orchestrator surface and maps every failure to a stable [`ErrorCode`].
//!
//! | Code | Client error | Raised when |
//! |------|--------------|-------------|
//! | `INVALID_PARAMETER_SPACE` | yes | Empty space, empty parameter, zero sample count |
//! | `INVALID_PATCH` | yes | A combination key cannot be written into the base config |
//! | `INVALID_REQUEST` | yes | Other malformed request fields |
//! | `RUN_NOT_FOUND` | yes | Cancelling a run that is not live |
//! | `ENGINE_ERROR` | no | Backtest engine failure surfaced to the caller |
//! | `RUN_DRIVER_ERROR` | no | The run driver task died |
//! | `PERSISTENCE_ERROR` | no | Job store failure on a read path |
//! | `CONFIG_ERROR` | no | Configuration could not be loaded |

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::ports::{EngineError, StoreError};
use crate::config::ConfigError;
use crate::domain::optimization::ValidationError;

/// Domain for optimizer errors.
pub const ERROR_DOMAIN: &str = "cream.optimizer";

/// Stable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Parameter space cannot be expanded.
    InvalidParameterSpace,
    /// Combination cannot be applied to the base config.
    InvalidPatch,
    /// Malformed request.
    InvalidRequest,
    /// Run is not live.
    RunNotFound,
    /// Backtest engine failure.
    EngineError,
    /// Run driver failure.
    RunDriverError,
    /// Job store failure.
    PersistenceError,
    /// Configuration failure.
    ConfigError,
}

impl ErrorCode {
    /// Reason string.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::InvalidParameterSpace => "INVALID_PARAMETER_SPACE",
            Self::InvalidPatch => "INVALID_PATCH",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::RunNotFound => "RUN_NOT_FOUND",
            Self::EngineError => "ENGINE_ERROR",
            Self::RunDriverError => "RUN_DRIVER_ERROR",
            Self::PersistenceError => "PERSISTENCE_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
        }
    }

    /// Returns true if the caller can fix the request.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidParameterSpace
                | Self::InvalidPatch
                | Self::InvalidRequest
                | Self::RunNotFound
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}

/// Errors surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum OptimizerError {
    /// Run request rejected before any job was created.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Backtest engine failure.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The task driving a run died.
    #[error("run {run_id} driver failed: {message}")]
    RunDriver {
        /// Affected run.
        run_id: String,
        /// Failure detail.
        message: String,
    },

    /// Job store failure.
    #[error(transparent)]
    Persistence(#[from] StoreError),

    /// Run is not live.
    #[error("run not found: {run_id}")]
    NotFound {
        /// Requested run.
        run_id: String,
    },

    /// Configuration failure.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl OptimizerError {
    /// Stable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(ValidationError::InvalidPatch { .. }) => ErrorCode::InvalidPatch,
            Self::Validation(ValidationError::InvalidRequest(_)) => ErrorCode::InvalidRequest,
            Self::Validation(_) => ErrorCode::InvalidParameterSpace,
            Self::Engine(_) => ErrorCode::EngineError,
            Self::RunDriver { .. } => ErrorCode::RunDriverError,
            Self::Persistence(_) => ErrorCode::PersistenceError,
            Self::NotFound { .. } => ErrorCode::RunNotFound,
            Self::Config(_) => ErrorCode::ConfigError,
        }
    }
}
