//! Durable job records for asynchronous engine work.

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::engine::EngineId;
use crate::error::ModelError;

/// Attempts allowed when the caller does not specify a limit.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Unique identifier for a job (and for the routing call that created it).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Job lifecycle state.
///
/// `queued -> processing -> {completed | failed}`, with `processing -> queued`
/// for retries. `completed` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed by a worker
    #[default]
    Queued,
    /// Claimed; submitted to (or awaiting) the engine
    Processing,
    /// Output produced
    Completed,
    /// Attempts exhausted
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(ModelError::invalid_transition(format!("unknown status {other}"))),
        }
    }
}

/// Kind of asynchronous work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Third-party generative API call
    Generation,
    /// Server-side or cloud render/transcode
    Render,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Generation => "generation",
            JobType::Render => "render",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Durable record of asynchronous engine work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID (same as the routing call that created it)
    pub id: JobId,
    /// Job type
    #[serde(rename = "type")]
    pub job_type: JobType,
    /// Engine chosen at dispatch time (recorded, not live-joined)
    pub engine_id: EngineId,
    /// Current state
    pub status: JobStatus,
    /// Higher drains first
    pub priority: i32,
    /// Claims so far
    pub attempts: u32,
    /// Claim limit
    pub max_attempts: u32,
    /// Id assigned by the external engine on submission
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_job_id: Option<String>,
    /// Raw data from the completing callback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<serde_json::Value>,
    /// Last error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Output reference once completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,
    /// Everything needed to (re)submit the work: plan, blueprint, analysis
    pub payload: serde_json::Value,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// Last state change or progress observation
    pub updated_at: DateTime<Utc>,
    /// When the current attempt started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Earliest time the job may be claimed (retry backoff)
    pub available_at: DateTime<Utc>,
}

impl Job {
    /// Create a new queued job.
    pub fn new(
        id: JobId,
        job_type: JobType,
        engine_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            job_type,
            engine_id: engine_id.into(),
            status: JobStatus::Queued,
            priority: 0,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            external_job_id: None,
            callback_data: None,
            error_message: None,
            output_ref: None,
            payload,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            available_at: now,
        }
    }

    /// Set priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set attempt limit (at least one).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Override creation time (also resets `updated_at` and `available_at`).
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.updated_at = created_at;
        self.available_at = created_at;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// True if a failed attempt may be retried.
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// True if a worker may claim this job at `now`.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Queued && self.available_at <= now
    }

    /// True if the job sat in `processing` with no update for longer than `threshold`.
    pub fn is_stuck(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Processing && now - self.updated_at > threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(JobId::new(), JobType::Generation, "veo", serde_json::json!({}))
    }

    #[test]
    fn test_new_job_is_queued_and_claimable() {
        let j = job();
        assert_eq!(j.status, JobStatus::Queued);
        assert_eq!(j.attempts, 0);
        assert!(j.is_claimable(Utc::now()));
        assert!(j.has_attempts_left());
    }

    #[test]
    fn test_backoff_gate_blocks_claim() {
        let mut j = job();
        j.available_at = Utc::now() + Duration::seconds(60);
        assert!(!j.is_claimable(Utc::now()));
    }

    #[test]
    fn test_stuck_detection_only_applies_to_processing() {
        let mut j = job();
        let now = Utc::now();
        j.updated_at = now - Duration::hours(5);
        assert!(!j.is_stuck(Duration::hours(4), now));
        j.status = JobStatus::Processing;
        assert!(j.is_stuck(Duration::hours(4), now));
        assert!(!j.is_stuck(Duration::hours(6), now));
    }

    #[test]
    fn test_max_attempts_floor_is_one() {
        assert_eq!(job().with_max_attempts(0).max_attempts, 1);
    }

    #[test]
    fn test_status_roundtrip_strings() {
        for s in [JobStatus::Queued, JobStatus::Processing, JobStatus::Completed, JobStatus::Failed] {
            assert_eq!(s.as_str().parse::<JobStatus>().unwrap(), s);
        }
        assert!(JobStatus::Completed.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }
}
