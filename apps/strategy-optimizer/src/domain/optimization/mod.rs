//! Optimization Bounded Context
//!
//! Parameter sweeps over a strategy configuration. A [`aggregate::Run`] expands a
//! [`value_objects::ParameterSpace`] into combinations, each carried by a
//! [`aggregate::Job`] that is backtested independently and scored by one metric.

pub mod aggregate;
pub mod errors;
pub mod services;
pub mod value_objects;

pub use aggregate::{Job, ReconstitutedJobParams, Run, RunProgress, RunSettings};
pub use errors::{LifecycleError, ValidationError};
pub use services::{STRATEGY_PARAMETER_PREFIX, Scored, patch_config, select_best};
pub use value_objects::{
    Combination, JobStatus, MetricsMap, OptimisationDirection, ParameterSpace, RunStatus,
    SearchPlan, extract_metric,
};
