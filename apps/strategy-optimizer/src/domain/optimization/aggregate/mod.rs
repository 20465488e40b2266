//! Run Aggregate
//!
//! A run is the consistency boundary for its jobs: job transitions go through the
//! run so the progress counters can never drift from job statuses.

mod job;
mod progress;
mod run;

pub use job::{Job, ReconstitutedJobParams};
pub use progress::RunProgress;
pub use run::{Run, RunSettings};
