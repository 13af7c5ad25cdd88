//! Worker configuration.

use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Sleep between claim attempts when the queue is empty
    pub poll_interval: Duration,
    /// Deadline for one engine submission
    pub submit_timeout: Duration,
    /// How often submitted jobs are polled at their engine
    pub external_poll_interval: Duration,
    /// How often the stuck-job scan runs
    pub stuck_scan_interval: Duration,
    /// Path of the engine catalog file
    pub engines_file: String,
    /// Address the Prometheus exporter listens on
    pub metrics_addr: String,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            poll_interval: Duration::from_millis(1000),
            submit_timeout: Duration::from_secs(60),
            external_poll_interval: Duration::from_secs(30),
            stuck_scan_interval: Duration::from_secs(300), // 5 minutes
            engines_file: "engines.toml".to_string(),
            metrics_addr: "0.0.0.0:9100".to_string(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(4),
            poll_interval: Duration::from_millis(
                std::env::var("WORKER_POLL_INTERVAL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1000),
            ),
            submit_timeout: Duration::from_secs(
                std::env::var("WORKER_SUBMIT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            external_poll_interval: Duration::from_secs(
                std::env::var("WORKER_EXTERNAL_POLL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            stuck_scan_interval: Duration::from_secs(
                std::env::var("WORKER_STUCK_SCAN_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            engines_file: std::env::var("ENGINES_FILE").unwrap_or_else(|_| "engines.toml".to_string()),
            metrics_addr: std::env::var("WORKER_METRICS_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:9100".to_string()),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }
}
