//! Router configuration.

use std::time::Duration;

use adreel_models::DEFAULT_MAX_ATTEMPTS;

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Per-attempt deadline when the caller gives none
    pub engine_timeout: Duration,
    /// Deadline for handing a job to the queue
    pub enqueue_timeout: Duration,
    /// Outcomes kept per engine for success-rate scoring
    pub stats_window: usize,
    /// Attempts granted to jobs created for async engines
    pub job_max_attempts: u32,
    /// URL async engines should call back on completion
    pub callback_url: Option<String>,
    /// Path of the engine catalog file
    pub engines_file: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            engine_timeout: Duration::from_secs(30),
            enqueue_timeout: Duration::from_secs(5),
            stats_window: 50,
            job_max_attempts: DEFAULT_MAX_ATTEMPTS,
            callback_url: None,
            engines_file: "engines.toml".to_string(),
        }
    }
}

impl RouterConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            engine_timeout: Duration::from_millis(
                std::env::var("ROUTER_ENGINE_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30_000),
            ),
            enqueue_timeout: Duration::from_millis(
                std::env::var("ROUTER_ENQUEUE_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5_000),
            ),
            stats_window: std::env::var("ROUTER_STATS_WINDOW")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|w: &usize| *w > 0)
                .unwrap_or(50),
            job_max_attempts: std::env::var("ROUTER_JOB_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
            callback_url: std::env::var("ROUTER_CALLBACK_URL").ok().filter(|s| !s.is_empty()),
            engines_file: std::env::var("ENGINES_FILE").unwrap_or_else(|_| "engines.toml".to_string()),
        }
    }
}
