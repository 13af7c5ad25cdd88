//! Structured job logging utilities.
//!
//! Keeps the `job_id`, `engine_id` and `attempt` fields on every line a
//! worker writes about a job.

use tracing::{error, info, warn, Span};

use adreel_models::Job;

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    engine_id: String,
    attempt: u32,
}

impl JobLogger {
    /// Create a logger for the job's current attempt.
    pub fn new(job: &Job) -> Self {
        Self {
            job_id: job.id.to_string(),
            engine_id: job.engine_id.clone(),
            attempt: job.attempts,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            engine_id = %self.engine_id,
            attempt = self.attempt,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            engine_id = %self.engine_id,
            attempt = self.attempt,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            engine_id = %self.engine_id,
            attempt = self.attempt,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            engine_id = %self.engine_id,
            attempt = self.attempt,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            engine_id = %self.engine_id,
            attempt = self.attempt,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn engine_id(&self) -> &str {
        &self.engine_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Span carrying the job's fields, for instrumenting engine calls.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            engine_id = %self.engine_id,
            attempt = self.attempt
        )
    }
}
