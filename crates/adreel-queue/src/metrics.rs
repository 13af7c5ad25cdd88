//! Queue metrics.

use metrics::{counter, gauge};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_ENQUEUED_TOTAL: &str = "adreel_jobs_enqueued_total";
    pub const JOBS_CLAIMED_TOTAL: &str = "adreel_jobs_claimed_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "adreel_jobs_completed_total";
    pub const JOBS_RETRIED_TOTAL: &str = "adreel_jobs_retried_total";
    pub const JOBS_FAILED_TOTAL: &str = "adreel_jobs_failed_total";
    pub const JOBS_STUCK_RECOVERED_TOTAL: &str = "adreel_jobs_stuck_recovered_total";
    pub const CALLBACKS_TOTAL: &str = "adreel_callbacks_total";
    pub const QUEUE_LENGTH: &str = "adreel_queue_length";
}

pub fn record_job_enqueued(job_type: &str) {
    let labels = [("type", job_type.to_string())];
    counter!(names::JOBS_ENQUEUED_TOTAL, &labels).increment(1);
}

pub fn record_job_claimed(engine_id: &str) {
    let labels = [("engine", engine_id.to_string())];
    counter!(names::JOBS_CLAIMED_TOTAL, &labels).increment(1);
}

pub fn record_job_completed(engine_id: &str) {
    let labels = [("engine", engine_id.to_string())];
    counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
}

pub fn record_job_retried(engine_id: &str) {
    let labels = [("engine", engine_id.to_string())];
    counter!(names::JOBS_RETRIED_TOTAL, &labels).increment(1);
}

pub fn record_job_failed(engine_id: &str) {
    let labels = [("engine", engine_id.to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_stuck_recovered(count: usize) {
    counter!(names::JOBS_STUCK_RECOVERED_TOTAL).increment(count as u64);
}

/// Record an inbound callback by outcome (`applied`, `malformed`, `unknown`, `ignored`).
pub fn record_callback(outcome: &str) {
    let labels = [("outcome", outcome.to_string())];
    counter!(names::CALLBACKS_TOTAL, &labels).increment(1);
}

pub fn set_queue_length(length: usize) {
    gauge!(names::QUEUE_LENGTH).set(length as f64);
}
