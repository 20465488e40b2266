//! Optimization Domain Services
//!
//! Stateless logic applied to run and job data.

mod best_selection;
mod config_patch;

pub use best_selection::{Scored, select_best};
pub use config_patch::{STRATEGY_PARAMETER_PREFIX, patch_config};
