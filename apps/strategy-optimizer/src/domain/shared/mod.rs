//! Shared Domain Types
//!
//! Value objects used across the optimisation context and its adapters.

pub mod value_objects;

pub use value_objects::{NodeId, RunId};
