//! Periodic recovery of jobs that stopped making progress.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use adreel_queue::{FailureOutcome, JobQueue};

use crate::error::WorkerResult;

/// Re-queues (or terminally fails) jobs stuck in `processing`.
pub struct StuckJobDetector {
    queue: Arc<JobQueue>,
    interval: Duration,
}

impl StuckJobDetector {
    pub fn new(queue: Arc<JobQueue>, interval: Duration) -> Self {
        Self { queue, interval }
    }

    /// Run one scan. Returns `(requeued, failed)`.
    pub async fn scan_once(&self) -> WorkerResult<(usize, usize)> {
        let recovered = self.queue.recover_stuck().await?;
        let requeued = recovered
            .iter()
            .filter(|(_, outcome)| matches!(outcome, FailureOutcome::Retry { .. }))
            .count();
        Ok((requeued, recovered.len() - requeued))
    }

    /// Scan on an interval until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            threshold_secs = self.queue.config().stuck_threshold.as_secs(),
            "Starting stuck job detector"
        );
        let mut interval = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    match self.scan_once().await {
                        Ok((0, 0)) => {}
                        Ok((requeued, failed)) => info!(requeued, failed, "Recovered stuck jobs"),
                        Err(e) => warn!(error = %e, "Stuck job scan failed"),
                    }
                }
            }
        }
        info!("Stuck job detector stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adreel_models::{Job, JobId, JobStatus, JobType};
    use adreel_queue::{BackoffPolicy, QueueBackend, QueueConfig};

    #[tokio::test]
    async fn test_scan_requeues_then_fails() {
        let queue = Arc::new(JobQueue::in_memory(QueueConfig {
            backend: QueueBackend::Memory,
            backoff: BackoffPolicy::immediate(),
            stuck_threshold: Duration::ZERO,
            ..Default::default()
        }));
        let retry = queue
            .enqueue(Job::new(JobId::new(), JobType::Render, "e", serde_json::Value::Null).with_max_attempts(2))
            .await
            .unwrap();
        let last = queue
            .enqueue(Job::new(JobId::new(), JobType::Render, "e", serde_json::Value::Null).with_max_attempts(1))
            .await
            .unwrap();
        queue.claim_next().await.unwrap().unwrap();
        queue.claim_next().await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let detector = StuckJobDetector::new(queue.clone(), Duration::from_secs(60));
        assert_eq!(detector.scan_once().await.unwrap(), (1, 1));

        assert_eq!(queue.get_job(&retry).await.unwrap().unwrap().status, JobStatus::Queued);
        assert_eq!(queue.get_job(&last).await.unwrap().unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_fresh_jobs_are_left_alone() {
        let queue = Arc::new(JobQueue::in_memory(QueueConfig {
            backend: QueueBackend::Memory,
            ..Default::default()
        }));
        queue
            .enqueue(Job::new(JobId::new(), JobType::Render, "e", serde_json::Value::Null))
            .await
            .unwrap();
        queue.claim_next().await.unwrap().unwrap();

        let detector = StuckJobDetector::new(queue, Duration::from_secs(60));
        assert_eq!(detector.scan_once().await.unwrap(), (0, 0));
    }
}
