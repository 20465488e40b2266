//! Domain Layer
//!
//! Optimisation logic with zero infrastructure dependencies:
//!
//! - **Aggregates**: `Run` owns its `Job`s and the counters derived from them
//! - **Value Objects**: parameter spaces, search plans, directions, statuses
//! - **Domain Services**: configuration patching and best-result selection
//!
//! # Bounded Contexts
//!
//! - [`optimization`]: parameter sweeps over a backtest strategy configuration
//! - [`shared`]: identifiers used across layers

pub mod optimization;
pub mod shared;
