//! Shared value objects.

mod identifiers;

pub use identifiers::{NodeId, RunId};
