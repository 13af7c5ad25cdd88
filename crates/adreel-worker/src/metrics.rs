//! Worker metrics and the Prometheus exporter.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const EXECUTIONS_TOTAL: &str = "adreel_worker_executions_total";
    pub const JOBS_IN_FLIGHT: &str = "adreel_worker_jobs_in_flight";
    pub const POLLS_TOTAL: &str = "adreel_worker_polls_total";
}

/// Serve Prometheus metrics on `addr`.
pub fn init_metrics(addr: &str) -> WorkerResult<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| WorkerError::config_error(format!("invalid metrics address {addr}: {e}")))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("failed to install Prometheus exporter: {e}")))
}

/// Record how one claimed job ended.
pub fn record_execution(engine_id: &str, disposition: &str) {
    let labels = [
        ("engine", engine_id.to_string()),
        ("disposition", disposition.to_string()),
    ];
    counter!(names::EXECUTIONS_TOTAL, &labels).increment(1);
}

pub fn set_jobs_in_flight(count: usize) {
    gauge!(names::JOBS_IN_FLIGHT).set(count as f64);
}

/// Record one status poll against an engine.
pub fn record_poll(engine_id: &str, status: &str) {
    let labels = [
        ("engine", engine_id.to_string()),
        ("status", status.to_string()),
    ];
    counter!(names::POLLS_TOTAL, &labels).increment(1);
}
