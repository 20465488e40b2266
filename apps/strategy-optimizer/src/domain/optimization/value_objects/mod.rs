//! Optimization Value Objects

mod direction;
mod metrics;
mod parameter_space;
mod search_plan;
mod status;

pub use direction::OptimisationDirection;
pub use metrics::{MetricsMap, coerce_numeric, extract_metric};
pub use parameter_space::{Combination, ParameterSpace};
pub use search_plan::SearchPlan;
pub use status::{JobStatus, RunStatus};
