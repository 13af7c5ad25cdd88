//! Queue error types.

use thiserror::Error;

use adreel_models::JobStatus;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Duplicate job: {0}")]
    DuplicateJob(String),

    #[error("No job with external id {0}")]
    UnknownExternalJob(String),

    #[error("Job {id} is in terminal state {status}")]
    TerminalState { id: String, status: JobStatus },

    #[error("Job {id} changed concurrently: expected {expected}, found {actual}")]
    Conflict {
        id: String,
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("Cannot {action} job {id} in state {status}")]
    InvalidTransition {
        id: String,
        status: JobStatus,
        action: &'static str,
    },

    #[error("Attempt limit reached for job {id} ({attempts}/{max_attempts})")]
    AttemptsExhausted {
        id: String,
        attempts: u32,
        max_attempts: u32,
    },

    #[error("Callback for {external_job_id} no longer matches job {id}")]
    StaleCallback { id: String, external_job_id: String },

    #[error("Malformed callback: {0}")]
    MalformedCallback(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::JobNotFound(id.into())
    }

    pub fn invalid_transition(id: impl Into<String>, status: JobStatus, action: &'static str) -> Self {
        Self::InvalidTransition {
            id: id.into(),
            status,
            action,
        }
    }

    /// True for errors caused by another writer getting there first.
    pub fn is_race(&self) -> bool {
        matches!(
            self,
            QueueError::Conflict { .. }
                | QueueError::TerminalState { .. }
                | QueueError::StaleCallback { .. }
        )
    }
}
