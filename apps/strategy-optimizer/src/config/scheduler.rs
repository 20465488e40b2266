//! Run scheduling settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::application::services::SchedulerSettings;

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// `max_parallel` applied when a request does not set one.
    #[serde(default = "default_max_parallel")]
    pub default_max_parallel: usize,
    /// Delay between node status polls in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Polls per job before the node is stopped regardless of status.
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_max_parallel: default_max_parallel(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
        }
    }
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_poll_attempts: config.max_poll_attempts,
        }
    }
}

const fn default_max_parallel() -> usize {
    2
}

const fn default_poll_interval_ms() -> u64 {
    2_000
}

const fn default_max_poll_attempts() -> u32 {
    150
}
