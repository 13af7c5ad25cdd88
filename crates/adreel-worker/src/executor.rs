//! Job executor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use adreel_models::Job;
use adreel_queue::{FailureOutcome, JobQueue};
use adreel_router::{EngineError, EngineOutcome, EngineRegistry, EngineRequest};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;

/// How a claimed job left the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobDisposition {
    /// Engine produced output
    Completed,
    /// Engine accepted the work; completion arrives by callback or polling
    Submitted,
    /// Attempt failed; the job is queued again
    Retrying,
    /// Attempt failed and no attempts remain
    Failed,
    /// Another writer moved the job first
    Superseded,
}

impl JobDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobDisposition::Completed => "completed",
            JobDisposition::Submitted => "submitted",
            JobDisposition::Retrying => "retrying",
            JobDisposition::Failed => "failed",
            JobDisposition::Superseded => "superseded",
        }
    }
}

impl From<FailureOutcome> for JobDisposition {
    fn from(outcome: FailureOutcome) -> Self {
        match outcome {
            FailureOutcome::Retry { .. } => JobDisposition::Retrying,
            FailureOutcome::Terminal => JobDisposition::Failed,
        }
    }
}

/// Claims queued jobs and submits them to their engines.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    registry: Arc<EngineRegistry>,
    job_semaphore: Arc<Semaphore>,
    worker_name: String,
}

impl JobExecutor {
    pub fn new(config: WorkerConfig, queue: Arc<JobQueue>, registry: Arc<EngineRegistry>) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let worker_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            queue,
            registry,
            job_semaphore,
            worker_name,
        }
    }

    pub fn worker_name(&self) -> &str {
        &self.worker_name
    }

    /// Claim and execute jobs until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> WorkerResult<()> {
        info!(
            worker = %self.worker_name,
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            "Starting job executor"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.claim_and_spawn() => {
                    match result {
                        Ok(true) => {}
                        Ok(false) => tokio::time::sleep(self.config.poll_interval).await,
                        Err(e) => {
                            error!(error = %e, "Error claiming jobs");
                            tokio::time::sleep(self.config.poll_interval).await;
                        }
                    }
                }
            }
        }

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                in_flight = self.in_flight(),
                "Shutdown timeout reached with jobs in flight; the stuck-job scan will recover them"
            );
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Claim one job and run it in the background. Returns false when the
    /// queue had nothing claimable.
    async fn claim_and_spawn(&self) -> WorkerResult<bool> {
        let permit = self
            .job_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::job_failed("Semaphore closed"))?;

        let Some(job) = self.queue.claim_next().await? else {
            return Ok(false);
        };

        let queue = Arc::clone(&self.queue);
        let registry = Arc::clone(&self.registry);
        let submit_timeout = self.config.submit_timeout;
        let semaphore = Arc::clone(&self.job_semaphore);
        let max = self.config.max_concurrent_jobs;
        tokio::spawn(async move {
            let _permit: OwnedSemaphorePermit = permit;
            metrics::set_jobs_in_flight(max - semaphore.available_permits());
            if let Err(e) = execute_job(&queue, &registry, job, submit_timeout).await {
                error!(error = %e, "Job execution failed");
            }
        });
        Ok(true)
    }

    /// Claim and execute one job inline.
    pub async fn run_once(&self) -> WorkerResult<Option<JobDisposition>> {
        let Some(job) = self.queue.claim_next().await? else {
            return Ok(None);
        };
        execute_job(&self.queue, &self.registry, job, self.config.submit_timeout)
            .await
            .map(Some)
    }

    fn in_flight(&self) -> usize {
        self.config.max_concurrent_jobs - self.job_semaphore.available_permits()
    }

    async fn wait_for_jobs(&self) {
        while self.in_flight() > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Submit one claimed job to its engine and record the outcome.
pub async fn execute_job(
    queue: &JobQueue,
    registry: &EngineRegistry,
    job: Job,
    submit_timeout: Duration,
) -> WorkerResult<JobDisposition> {
    let logger = JobLogger::new(&job);
    let span = logger.create_span();

    let result = async {
        logger.log_start("submitting to engine");
        let outcome = submit(registry, &job, submit_timeout).await;

        let applied = match outcome {
            Ok(EngineOutcome::Completed { output_ref }) => {
                logger.log_completion(&output_ref);
                queue
                    .complete(&job, &output_ref, None)
                    .await
                    .map(|_| JobDisposition::Completed)
            }
            Ok(EngineOutcome::Accepted { external_job_id }) => {
                logger.log_progress(&format!("accepted as {external_job_id}"));
                queue
                    .mark_submitted(&job, &external_job_id)
                    .await
                    .map(|_| JobDisposition::Submitted)
            }
            Err(e) => {
                logger.log_warning(&e.to_string());
                queue
                    .fail(&job, &e.to_string())
                    .await
                    .map(|(_, outcome)| outcome.into())
            }
        };

        match applied {
            Ok(disposition) => Ok(disposition),
            Err(e) if e.is_race() => {
                debug!(error = %e, "Job changed while executing");
                Ok(JobDisposition::Superseded)
            }
            Err(e) => {
                logger.log_error(&e.to_string());
                Err(WorkerError::from(e))
            }
        }
    }
    .instrument(span)
    .await;

    if let Ok(disposition) = &result {
        metrics::record_execution(&job.engine_id, disposition.as_str());
    }
    result
}

async fn submit(
    registry: &EngineRegistry,
    job: &Job,
    submit_timeout: Duration,
) -> Result<EngineOutcome, EngineError> {
    let adapter = registry
        .snapshot()
        .adapter(&job.engine_id)
        .ok_or_else(|| EngineError::unavailable(format!("unknown engine {}", job.engine_id)))?;
    let request = EngineRequest::from_job(job)?;

    match tokio::time::timeout(submit_timeout, adapter.invoke(&request)).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout(submit_timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adreel_models::{
        Capability, CostProfile, EngineEntry, EngineLocation, ExecutionPlan, JobId, JobStatus,
        JobType, TimelineSegment,
    };
    use adreel_queue::{BackoffPolicy, QueueBackend, QueueConfig};
    use adreel_router::EngineAdapter;
    use async_trait::async_trait;

    enum Behavior {
        Complete,
        Accept,
        Fail,
        Hang,
    }

    struct Scripted(Behavior);

    #[async_trait]
    impl EngineAdapter for Scripted {
        async fn invoke(&self, request: &EngineRequest) -> Result<EngineOutcome, EngineError> {
            match self.0 {
                Behavior::Complete => Ok(EngineOutcome::Completed {
                    output_ref: format!("s3://out/{}.mp4", request.job_id),
                }),
                Behavior::Accept => Ok(EngineOutcome::Accepted {
                    external_job_id: "ext-1".into(),
                }),
                Behavior::Fail => Err(EngineError::Http {
                    status: 503,
                    body: "overloaded".into(),
                }),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!()
                }
            }
        }
    }

    fn registry(behavior: Behavior) -> Arc<EngineRegistry> {
        let entry = EngineEntry::new(
            "gen",
            [Capability::AiGenerate],
            CostProfile::High,
            EngineLocation::Cloud,
        );
        Arc::new(
            EngineRegistry::with_engines(vec![(entry, Arc::new(Scripted(behavior)) as Arc<dyn EngineAdapter>)])
                .unwrap(),
        )
    }

    fn queue() -> Arc<JobQueue> {
        Arc::new(JobQueue::in_memory(QueueConfig {
            backend: QueueBackend::Memory,
            backoff: BackoffPolicy::immediate(),
            ..Default::default()
        }))
    }

    fn job(engine_id: &str, max_attempts: u32) -> Job {
        let id = JobId::new();
        let plan = ExecutionPlan::new(
            "plan-1",
            vec![TimelineSegment::new("s1", "asset-1", 0.0, 5.0).requires(Capability::AiGenerate)],
        );
        let request = EngineRequest {
            job_id: id.clone(),
            plan,
            blueprint: serde_json::Value::Null,
            analysis: serde_json::Value::Null,
            callback_url: None,
        };
        Job::new(id, JobType::Generation, engine_id, request.to_payload()).with_max_attempts(max_attempts)
    }

    fn executor(queue: Arc<JobQueue>, registry: Arc<EngineRegistry>) -> JobExecutor {
        let config = WorkerConfig {
            submit_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        JobExecutor::new(config, queue, registry)
    }

    #[tokio::test]
    async fn test_completed_outcome_completes_job() {
        let queue = queue();
        let id = queue.enqueue(job("gen", 3)).await.unwrap();
        let executor = executor(queue.clone(), registry(Behavior::Complete));

        assert_eq!(executor.run_once().await.unwrap(), Some(JobDisposition::Completed));

        let stored = queue.get_job(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.output_ref, Some(format!("s3://out/{id}.mp4")));
    }

    #[tokio::test]
    async fn test_accepted_outcome_records_external_id() {
        let queue = queue();
        let id = queue.enqueue(job("gen", 3)).await.unwrap();
        let executor = executor(queue.clone(), registry(Behavior::Accept));

        assert_eq!(executor.run_once().await.unwrap(), Some(JobDisposition::Submitted));

        let stored = queue.get_job(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Processing);
        assert_eq!(stored.external_job_id.as_deref(), Some("ext-1"));
    }

    #[tokio::test]
    async fn test_failures_retry_until_attempts_run_out() {
        let queue = queue();
        let id = queue.enqueue(job("gen", 2)).await.unwrap();
        let executor = executor(queue.clone(), registry(Behavior::Fail));

        assert_eq!(executor.run_once().await.unwrap(), Some(JobDisposition::Retrying));
        assert_eq!(executor.run_once().await.unwrap(), Some(JobDisposition::Failed));
        assert_eq!(executor.run_once().await.unwrap(), None);

        let stored = queue.get_job(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.attempts, 2);
        assert!(stored.error_message.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_timeout_is_a_failed_attempt() {
        let queue = queue();
        let id = queue.enqueue(job("gen", 3)).await.unwrap();
        let executor = executor(queue.clone(), registry(Behavior::Hang));

        assert_eq!(executor.run_once().await.unwrap(), Some(JobDisposition::Retrying));
        let stored = queue.get_job(&id).await.unwrap().unwrap();
        assert!(stored.error_message.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_unknown_engine_fails_attempt() {
        let queue = queue();
        let id = queue.enqueue(job("retired-engine", 1)).await.unwrap();
        let executor = executor(queue.clone(), registry(Behavior::Complete));

        assert_eq!(executor.run_once().await.unwrap(), Some(JobDisposition::Failed));
        let stored = queue.get_job(&id).await.unwrap().unwrap();
        assert!(stored.error_message.unwrap().contains("unknown engine"));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let queue = queue();
        let id = queue.enqueue(job("gen", 3)).await.unwrap();
        let executor = Arc::new(executor(queue.clone(), registry(Behavior::Complete)));
        let (tx, rx) = watch::channel(false);

        let handle = {
            let executor = executor.clone();
            tokio::spawn(async move { executor.run(rx).await })
        };

        for _ in 0..50 {
            if queue.get_job(&id).await.unwrap().unwrap().is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(
            queue.get_job(&id).await.unwrap().unwrap().status,
            JobStatus::Completed
        );
    }
}
