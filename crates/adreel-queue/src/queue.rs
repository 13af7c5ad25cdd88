//! Job queue facade.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use adreel_models::{CallbackPayload, CallbackStatus, Job, JobId, JobStatus};
use adreel_router::{BoxError, JobSink};

use crate::backoff::BackoffPolicy;
use crate::error::{QueueError, QueueResult};
use crate::metrics;
use crate::redis_store::RedisJobStore;
use crate::state::{self, FailureOutcome};
use crate::store::{InMemoryJobStore, JobStore};

/// Where jobs are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackend {
    Redis,
    Memory,
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Prefix for every Redis key
    pub key_prefix: String,
    /// Storage backend
    pub backend: QueueBackend,
    /// Retry delay policy
    pub backoff: BackoffPolicy,
    /// How long a job may sit in `processing` without an update
    pub stuck_threshold: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "adreel:queue".to_string(),
            backend: QueueBackend::Redis,
            backoff: BackoffPolicy::default(),
            stuck_threshold: Duration::from_secs(4 * 3600), // 4 hours
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("QUEUE_KEY_PREFIX")
                .unwrap_or_else(|_| "adreel:queue".to_string()),
            backend: match std::env::var("QUEUE_BACKEND").as_deref() {
                Ok("memory") => QueueBackend::Memory,
                _ => QueueBackend::Redis,
            },
            backoff: BackoffPolicy::new(
                Duration::from_secs(
                    std::env::var("QUEUE_BACKOFF_BASE_SECS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(30),
                ),
                Duration::from_secs(
                    std::env::var("QUEUE_BACKOFF_MAX_SECS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(1800),
                ),
                std::env::var("QUEUE_BACKOFF_MULTIPLIER")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2.0),
            ),
            stuck_threshold: Duration::from_secs(
                std::env::var("QUEUE_STUCK_THRESHOLD_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(4 * 3600),
            ),
        }
    }
}

/// Job queue client.
///
/// All transitions read-modify-write through the store's compare-and-swap;
/// a caller that loses a race gets `Conflict` or `TerminalState` back.
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    config: QueueConfig,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>, config: QueueConfig) -> Self {
        Self { store, config }
    }

    /// Queue backed by an in-process store.
    pub fn in_memory(config: QueueConfig) -> Self {
        Self::new(Arc::new(InMemoryJobStore::new()), config)
    }

    /// Build the configured backend.
    pub fn connect(config: QueueConfig) -> QueueResult<Self> {
        let store: Arc<dyn JobStore> = match config.backend {
            QueueBackend::Redis => Arc::new(RedisJobStore::new(&config.redis_url, config.key_prefix.clone())?),
            QueueBackend::Memory => Arc::new(InMemoryJobStore::new()),
        };
        info!(backend = ?config.backend, prefix = %config.key_prefix, "Job queue ready");
        Ok(Self::new(store, config))
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::connect(QueueConfig::from_env())
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Persist a freshly created job.
    pub async fn enqueue(&self, job: Job) -> QueueResult<JobId> {
        if job.status != JobStatus::Queued || job.attempts != 0 {
            return Err(QueueError::invalid_transition(job.id.as_str(), job.status, "enqueue"));
        }
        self.store.insert(&job).await?;
        metrics::record_job_enqueued(job.job_type.as_str());
        info!(
            job_id = %job.id,
            engine_id = %job.engine_id,
            priority = job.priority,
            max_attempts = job.max_attempts,
            "Enqueued job"
        );
        Ok(job.id)
    }

    pub async fn get_job(&self, id: &JobId) -> QueueResult<Option<Job>> {
        self.store.get(id).await
    }

    /// Claim the next job for this worker, if any.
    pub async fn claim_next(&self) -> QueueResult<Option<Job>> {
        let claimed = self.store.claim_next(Utc::now()).await?;
        if let Some(job) = &claimed {
            metrics::record_job_claimed(&job.engine_id);
            debug!(job_id = %job.id, attempt = job.attempts, "Claimed job");
        }
        Ok(claimed)
    }

    /// Record that the engine accepted the work under its own id.
    pub async fn mark_submitted(&self, job: &Job, external_job_id: &str) -> QueueResult<Job> {
        let mut next = job.clone();
        state::record_submission(&mut next, external_job_id, Utc::now())?;
        self.store.update(job, &next).await?;
        info!(job_id = %job.id, external_job_id, "Job submitted to engine");
        Ok(next)
    }

    /// Refresh a long-running job's `updated_at`.
    pub async fn heartbeat(&self, job: &Job) -> QueueResult<Job> {
        let mut next = job.clone();
        state::touch(&mut next, Utc::now())?;
        self.store.update(job, &next).await?;
        Ok(next)
    }

    pub async fn complete(
        &self,
        job: &Job,
        output_ref: &str,
        callback_data: Option<serde_json::Value>,
    ) -> QueueResult<Job> {
        let mut next = job.clone();
        state::complete(&mut next, output_ref, callback_data, Utc::now())?;
        self.store.update(job, &next).await?;
        metrics::record_job_completed(&job.engine_id);
        info!(job_id = %job.id, output_ref, "Job completed");
        Ok(next)
    }

    /// Fail the current attempt; retried with backoff while attempts remain.
    pub async fn fail(&self, job: &Job, error: &str) -> QueueResult<(Job, FailureOutcome)> {
        let mut next = job.clone();
        let outcome = state::fail_attempt(&mut next, error, &self.config.backoff, Utc::now())?;
        self.store.update(job, &next).await?;
        self.log_failure(&next, outcome);
        Ok((next, outcome))
    }

    fn log_failure(&self, job: &Job, outcome: FailureOutcome) {
        match outcome {
            FailureOutcome::Retry { available_at } => {
                metrics::record_job_retried(&job.engine_id);
                warn!(
                    job_id = %job.id,
                    attempt = job.attempts,
                    max_attempts = job.max_attempts,
                    retry_at = %available_at,
                    error = job.error_message.as_deref().unwrap_or(""),
                    "Job attempt failed; retrying"
                );
            }
            FailureOutcome::Terminal => {
                metrics::record_job_failed(&job.engine_id);
                warn!(
                    job_id = %job.id,
                    attempts = job.attempts,
                    error = job.error_message.as_deref().unwrap_or(""),
                    "Job failed permanently"
                );
            }
        }
    }

    /// Apply a parsed engine callback.
    pub async fn handle_callback(&self, payload: CallbackPayload) -> QueueResult<Job> {
        let job = self
            .store
            .find_by_external_id(&payload.external_job_id)
            .await?
            .ok_or_else(|| QueueError::UnknownExternalJob(payload.external_job_id.clone()))?;
        // Only the submission currently in flight may settle the job.
        if job.external_job_id.as_deref() != Some(payload.external_job_id.as_str()) {
            return Err(QueueError::StaleCallback {
                id: job.id.to_string(),
                external_job_id: payload.external_job_id,
            });
        }

        match payload.status {
            CallbackStatus::Succeeded => {
                let output_ref = payload
                    .output_ref
                    .as_deref()
                    .ok_or_else(|| QueueError::MalformedCallback("missing output_ref".into()))?;
                let data = payload.data.clone().or_else(|| serde_json::to_value(&payload).ok());
                self.complete(&job, output_ref, data).await
            }
            CallbackStatus::Failed => {
                let error = payload
                    .error
                    .clone()
                    .unwrap_or_else(|| "engine reported failure".to_string());
                let (next, _) = self.fail(&job, &error).await?;
                Ok(next)
            }
        }
    }

    /// Requeue or fail every job stuck in `processing`.
    pub async fn recover_stuck(&self) -> QueueResult<Vec<(Job, FailureOutcome)>> {
        let now = Utc::now();
        let stuck = self.store.list_stuck(self.config.stuck_threshold, now).await?;
        let mut recovered = Vec::with_capacity(stuck.len());

        for job in stuck {
            let mut next = job.clone();
            let outcome = state::recover_stuck(&mut next, &self.config.backoff, now)?;
            match self.store.update(&job, &next).await {
                Ok(()) => {
                    self.log_failure(&next, outcome);
                    recovered.push((next, outcome));
                }
                Err(e) if e.is_race() => {
                    debug!(job_id = %job.id, error = %e, "Stuck job moved on before recovery");
                }
                Err(e) => return Err(e),
            }
        }

        if !recovered.is_empty() {
            metrics::record_stuck_recovered(recovered.len());
            info!(count = recovered.len(), "Recovered stuck jobs");
        }
        Ok(recovered)
    }

    pub async fn list_by_status(&self, status: JobStatus) -> QueueResult<Vec<Job>> {
        self.store.list_by_status(status).await
    }

    pub async fn len(&self) -> QueueResult<usize> {
        self.store.len().await
    }

    pub async fn ping(&self) -> QueueResult<()> {
        self.store.ping().await
    }
}

#[async_trait]
impl JobSink for JobQueue {
    async fn enqueue_job(&self, job: Job) -> Result<JobId, BoxError> {
        Ok(self.enqueue(job).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adreel_models::JobType;

    fn queue() -> JobQueue {
        JobQueue::in_memory(QueueConfig {
            backend: QueueBackend::Memory,
            backoff: BackoffPolicy::immediate(),
            ..Default::default()
        })
    }

    fn job(max_attempts: u32) -> Job {
        Job::new(JobId::new(), JobType::Generation, "gen", serde_json::Value::Null)
            .with_max_attempts(max_attempts)
    }

    #[tokio::test]
    async fn test_enqueue_rejects_non_fresh_jobs() {
        let queue = queue();
        let mut used = job(3);
        used.attempts = 1;
        assert!(queue.enqueue(used).await.is_err());
    }

    #[tokio::test]
    async fn test_callback_completes_job() {
        let queue = queue();
        let id = queue.enqueue(job(3)).await.unwrap();
        let claimed = queue.claim_next().await.unwrap().unwrap();
        queue.mark_submitted(&claimed, "ext-1").await.unwrap();

        let payload = CallbackPayload::parse(
            br#"{"external_job_id":"ext-1","status":"succeeded","output_ref":"s3://v.mp4","data":{"frames":120}}"#,
        )
        .unwrap();
        let done = queue.handle_callback(payload).await.unwrap();

        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.output_ref.as_deref(), Some("s3://v.mp4"));
        assert_eq!(done.callback_data, Some(serde_json::json!({"frames": 120})));
        assert_eq!(queue.get_job(&id).await.unwrap().unwrap(), done);
    }

    #[tokio::test]
    async fn test_failed_callback_retries_then_fails() {
        let queue = queue();
        queue.enqueue(job(2)).await.unwrap();

        for (attempt, expected) in [(1, JobStatus::Queued), (2, JobStatus::Failed)] {
            let claimed = queue.claim_next().await.unwrap().unwrap();
            assert_eq!(claimed.attempts, attempt);
            queue.mark_submitted(&claimed, &format!("ext-{attempt}")).await.unwrap();

            let payload = CallbackPayload::parse(
                format!(r#"{{"external_job_id":"ext-{attempt}","status":"failed","error":"nsfw"}}"#).as_bytes(),
            )
            .unwrap();
            let next = queue.handle_callback(payload).await.unwrap();
            assert_eq!(next.status, expected);
        }

        assert!(queue.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_late_callback_from_abandoned_submission_is_ignored() {
        let queue = queue();
        let id = queue.enqueue(job(3)).await.unwrap();

        let first = queue.claim_next().await.unwrap().unwrap();
        let first = queue.mark_submitted(&first, "ext-1").await.unwrap();
        queue.fail(&first, "lease expired").await.unwrap();

        let second = queue.claim_next().await.unwrap().unwrap();
        queue.mark_submitted(&second, "ext-2").await.unwrap();

        let late = CallbackPayload::parse(
            br#"{"external_job_id":"ext-1","status":"failed","error":"old attempt"}"#,
        )
        .unwrap();
        let err = queue.handle_callback(late).await.unwrap_err();
        assert!(matches!(err, QueueError::UnknownExternalJob(_)));

        let job = queue.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.attempts, 2);
        assert_eq!(job.external_job_id.as_deref(), Some("ext-2"));
        assert_eq!(job.error_message.as_deref(), Some("lease expired"));
    }

    #[tokio::test]
    async fn test_unknown_external_id() {
        let queue = queue();
        let payload =
            CallbackPayload::parse(br#"{"external_job_id":"ghost","status":"failed"}"#).unwrap();
        let err = queue.handle_callback(payload).await.unwrap_err();
        assert!(matches!(err, QueueError::UnknownExternalJob(_)));
    }

    #[tokio::test]
    async fn test_duplicate_callback_hits_terminal_state() {
        let queue = queue();
        queue.enqueue(job(3)).await.unwrap();
        let claimed = queue.claim_next().await.unwrap().unwrap();
        queue.mark_submitted(&claimed, "ext-1").await.unwrap();

        let body = br#"{"external_job_id":"ext-1","status":"succeeded","output_ref":"s3://a"}"#;
        queue.handle_callback(CallbackPayload::parse(body).unwrap()).await.unwrap();
        let err = queue
            .handle_callback(CallbackPayload::parse(body).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::TerminalState { .. }));
    }

    #[tokio::test]
    async fn test_recover_stuck_requeues_job() {
        let queue = JobQueue::in_memory(QueueConfig {
            backend: QueueBackend::Memory,
            backoff: BackoffPolicy::immediate(),
            stuck_threshold: Duration::ZERO,
            ..Default::default()
        });
        queue.enqueue(job(3)).await.unwrap();
        queue.claim_next().await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let recovered = queue.recover_stuck().await.unwrap();

        assert_eq!(recovered.len(), 1);
        assert!(matches!(recovered[0].1, FailureOutcome::Retry { .. }));
        let again = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(again.attempts, 2);
    }

    #[tokio::test]
    async fn test_acts_as_router_job_sink() {
        let queue = queue();
        let sink: &dyn JobSink = &queue;
        let id = sink.enqueue_job(job(3)).await.unwrap();
        assert!(queue.get_job(&id).await.unwrap().is_some());
    }
}
