//! Data Transfer Objects (DTOs)
//!
//! Inputs and outputs of the orchestrator surface.

mod run_dto;

pub use run_dto::{RunDetail, RunSummary, StartRunRequest};
