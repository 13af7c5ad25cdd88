//! Engine adapter seam.
//!
//! The router never talks to a provider directly. Every engine in the
//! registry is paired with an [`EngineAdapter`] that performs the actual
//! invocation and, for asynchronous engines, status polling.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use adreel_models::{ExecutionPlan, Job, JobId};

/// Work handed to an engine.
///
/// This is also the payload stored on queued jobs, so the worker can rebuild
/// the request after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineRequest {
    pub job_id: JobId,
    pub plan: ExecutionPlan,
    #[serde(default)]
    pub blueprint: serde_json::Value,
    #[serde(default)]
    pub analysis: serde_json::Value,
    /// Where the engine should deliver its completion callback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

impl EngineRequest {
    /// Rebuild the request from a queued job's payload.
    pub fn from_job(job: &Job) -> Result<Self, EngineError> {
        serde_json::from_value(job.payload.clone())
            .map_err(|e| EngineError::malformed(format!("job {} payload: {e}", job.id)))
    }

    pub fn to_payload(&self) -> serde_json::Value {
        // Only derived, string-keyed types; cannot fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Result of a successful invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutcome {
    /// Output is ready
    Completed { output_ref: String },
    /// Work accepted; completion arrives later via callback or polling
    Accepted { external_job_id: String },
}

/// Status of externally-running work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Pending,
    Completed { output_ref: String },
    Failed { error: String },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("engine timed out after {0:?}")]
    Timeout(Duration),

    #[error("engine returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("malformed engine output: {0}")]
    MalformedOutput(String),

    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl EngineError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedOutput(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Short label used in metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Timeout(_) => "timeout",
            EngineError::Http { .. } => "http",
            EngineError::MalformedOutput(_) => "malformed",
            EngineError::Unavailable(_) => "unavailable",
            EngineError::Transport(_) => "transport",
        }
    }
}

/// Invokes one engine.
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    /// Submit work. Synchronous engines return `Completed`; asynchronous
    /// ones return `Accepted` with their own job id.
    async fn invoke(&self, request: &EngineRequest) -> Result<EngineOutcome, EngineError>;

    /// Check on previously accepted work.
    async fn poll(&self, _external_job_id: &str) -> Result<PollStatus, EngineError> {
        Ok(PollStatus::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adreel_models::{JobType, TimelineSegment};

    #[test]
    fn test_request_survives_job_payload() {
        let plan = ExecutionPlan::new(
            "plan-1",
            vec![TimelineSegment::new("s1", "asset://a", 0.0, 5.0)],
        );
        let request = EngineRequest {
            job_id: JobId::from_string("job-1"),
            plan,
            blueprint: serde_json::json!({"hook": "fast"}),
            analysis: serde_json::Value::Null,
            callback_url: Some("http://localhost/api/callbacks".into()),
        };

        let job = Job::new(
            request.job_id.clone(),
            JobType::Render,
            "cloud-a",
            request.to_payload(),
        );
        assert_eq!(EngineRequest::from_job(&job).unwrap(), request);
    }

    #[test]
    fn test_garbage_payload_is_malformed() {
        let job = Job::new(
            JobId::new(),
            JobType::Render,
            "cloud-a",
            serde_json::json!({"nope": 1}),
        );
        let err = EngineRequest::from_job(&job).unwrap_err();
        assert_eq!(err.kind(), "malformed");
    }
}
