//! Status polling for jobs running at an external engine.
//!
//! Callbacks are the primary completion path; polling covers engines that
//! never call back and callbacks that were lost.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use adreel_models::{Job, JobStatus};
use adreel_queue::JobQueue;
use adreel_router::{EngineError, EngineRegistry, PollStatus};

use crate::error::WorkerResult;
use crate::metrics;

/// Polls engines for submitted jobs.
pub struct Poller {
    queue: Arc<JobQueue>,
    registry: Arc<EngineRegistry>,
    interval: Duration,
    request_timeout: Duration,
}

impl Poller {
    pub fn new(
        queue: Arc<JobQueue>,
        registry: Arc<EngineRegistry>,
        interval: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            registry,
            interval,
            request_timeout,
        }
    }

    /// Poll every submitted job once. Returns how many jobs changed state.
    pub async fn poll_once(&self) -> WorkerResult<usize> {
        let submitted: Vec<Job> = self
            .queue
            .list_by_status(JobStatus::Processing)
            .await?
            .into_iter()
            .filter(|job| job.external_job_id.is_some())
            .collect();

        let mut settled = 0;
        for job in submitted {
            if self.poll_job(&job).await {
                settled += 1;
            }
        }
        Ok(settled)
    }

    async fn poll_job(&self, job: &Job) -> bool {
        let Some(external_job_id) = job.external_job_id.as_deref() else {
            return false;
        };
        let Some(adapter) = self.registry.snapshot().adapter(&job.engine_id) else {
            debug!(job_id = %job.id, engine_id = %job.engine_id, "No adapter to poll");
            return false;
        };

        let status = match tokio::time::timeout(self.request_timeout, adapter.poll(external_job_id)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout(self.request_timeout)),
        };

        let applied = match status {
            Ok(PollStatus::Pending) => {
                metrics::record_poll(&job.engine_id, "pending");
                return false;
            }
            Ok(PollStatus::Completed { output_ref }) => {
                metrics::record_poll(&job.engine_id, "completed");
                self.queue.complete(job, &output_ref, None).await.map(|_| ())
            }
            Ok(PollStatus::Failed { error }) => {
                metrics::record_poll(&job.engine_id, "failed");
                self.queue.fail(job, &error).await.map(|_| ())
            }
            Err(e) => {
                metrics::record_poll(&job.engine_id, "error");
                warn!(
                    job_id = %job.id,
                    engine_id = %job.engine_id,
                    external_job_id,
                    error = %e,
                    "Failed to poll engine"
                );
                return false;
            }
        };

        match applied {
            Ok(()) => true,
            Err(e) if e.is_race() => {
                debug!(job_id = %job.id, error = %e, "Job settled before poll result");
                false
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Failed to apply poll result");
                false
            }
        }
    }

    /// Poll on an interval until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Starting engine poller");
        let mut interval = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    match self.poll_once().await {
                        Ok(0) => {}
                        Ok(n) => info!(settled = n, "Settled jobs from engine polling"),
                        Err(e) => warn!(error = %e, "Engine polling failed"),
                    }
                }
            }
        }
        info!("Engine poller stopped");
    }
}
