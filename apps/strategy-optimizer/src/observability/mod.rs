//! Observability module: Prometheus metrics for runs and jobs.

mod metrics;

pub use self::metrics::{
    ExporterConfig, MetricsError, init_metrics, record_job_finished, record_job_started,
    record_persistence_failure, record_run_finished,
};
