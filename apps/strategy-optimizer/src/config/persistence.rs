//! Job store configuration.

use serde::{Deserialize, Serialize};

/// Which job store backs the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Embedded SQLite file.
    #[default]
    Sqlite,
    /// Process memory only; history is lost on exit.
    Memory,
}

/// Job store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Store backend.
    #[serde(default)]
    pub backend: StoreBackend,
    /// SQLite database path.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "./data/optimizer.db".to_string()
}
