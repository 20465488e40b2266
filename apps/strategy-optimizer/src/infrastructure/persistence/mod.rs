//! Persistence Adapters
//!
//! Implementations of `JobStorePort`.

pub mod in_memory;
pub mod sqlite;

pub use in_memory::InMemoryJobStore;
pub use sqlite::SqliteJobStore;
