//! Prometheus metrics for the optimizer.
//!
//! Recording goes through the `metrics` facade and is a no-op until an exporter
//! is installed, so library users and tests pay nothing for it.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Settings for the Prometheus exporter.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    /// Address of the `/metrics` HTTP listener.
    pub listen_addr: SocketAddr,
    /// Histogram buckets for job durations (seconds).
    pub duration_buckets: Vec<f64>,
}

impl ExporterConfig {
    /// Exporter on `addr` with default buckets.
    #[must_use]
    pub fn with_addr(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            // Backtests run from seconds to hours
            duration_buckets: vec![
                1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0, 7200.0,
            ],
        }
    }
}

/// Error type for metrics operations.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to configure the exporter.
    #[error("metrics configuration error: {0}")]
    Configuration(String),
    /// Failed to install the exporter.
    #[error("metrics installation error: {0}")]
    Installation(String),
}

/// Install the Prometheus exporter and its HTTP listener.
pub fn init_metrics(config: &ExporterConfig) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(config.listen_addr)
        .set_buckets(&config.duration_buckets)
        .map_err(|e| MetricsError::Configuration(e.to_string()))?
        .install()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    tracing::info!(addr = %config.listen_addr, "Prometheus metrics exporter started");
    Ok(())
}

/// A job acquired a slot.
pub fn record_job_started() {
    gauge!("optimizer_jobs_running").increment(1.0);
}

/// A job reached a terminal state.
///
/// * `outcome` - `completed`, `failed` or `cancelled`
/// * `was_running` - whether the job held a slot
pub fn record_job_finished(outcome: &str, was_running: bool, duration_seconds: f64) {
    counter!("optimizer_jobs_total", "outcome" => outcome.to_string()).increment(1);
    if was_running {
        gauge!("optimizer_jobs_running").decrement(1.0);
        histogram!("optimizer_job_duration_seconds", "outcome" => outcome.to_string())
            .record(duration_seconds);
    }
}

/// A run reached a terminal state.
pub fn record_run_finished(status: &str) {
    counter!("optimizer_runs_total", "status" => status.to_string()).increment(1);
}

/// A job row could not be written.
pub fn record_persistence_failure() {
    counter!("optimizer_persistence_failures_total").increment(1);
}
