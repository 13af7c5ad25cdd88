//! Engine callback ingestion.
//!
//! HTTP handlers push raw bodies onto a bounded channel and return
//! immediately; a single ingestor task applies them to the queue.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use adreel_models::{CallbackPayload, JobStatus};

use crate::error::QueueError;
use crate::metrics;
use crate::queue::JobQueue;

/// What happened to one callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Applied; the job is now in this state
    Applied(JobStatus),
    /// Body did not parse or failed validation
    Malformed,
    /// No job carries the external id
    UnknownJob,
    /// Job was already terminal or changed underneath us
    Ignored,
}

impl CallbackOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackOutcome::Applied(_) => "applied",
            CallbackOutcome::Malformed => "malformed",
            CallbackOutcome::UnknownJob => "unknown_job",
            CallbackOutcome::Ignored => "ignored",
        }
    }
}

/// Sending half handed to HTTP handlers.
#[derive(Clone)]
pub struct CallbackSender {
    tx: mpsc::Sender<Vec<u8>>,
}

impl CallbackSender {
    /// Queue a raw body for ingestion. Fails if the ingestor is gone or full.
    pub fn submit(&self, body: impl Into<Vec<u8>>) -> Result<(), QueueError> {
        self.tx.try_send(body.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                QueueError::connection_failed("callback buffer is full")
            }
            mpsc::error::TrySendError::Closed(_) => {
                QueueError::connection_failed("callback ingestor stopped")
            }
        })
    }
}

/// Receiving half, consumed by [`CallbackIngestor::new`].
pub struct CallbackReceiver {
    rx: mpsc::Receiver<Vec<u8>>,
}

/// Create a bounded callback channel.
pub fn channel(capacity: usize) -> (CallbackSender, CallbackReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (CallbackSender { tx }, CallbackReceiver { rx })
}

/// Applies engine callbacks to the queue.
pub struct CallbackIngestor {
    queue: Arc<JobQueue>,
    rx: CallbackReceiver,
}

impl CallbackIngestor {
    pub fn new(queue: Arc<JobQueue>, rx: CallbackReceiver) -> Self {
        Self { queue, rx }
    }

    /// Apply one raw callback body.
    pub async fn process(&self, body: &[u8]) -> CallbackOutcome {
        let outcome = apply(&self.queue, body).await;
        metrics::record_callback(outcome.as_str());
        outcome
    }

    /// Drain the channel until shutdown or every sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Callback ingestor started");
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                body = self.rx.rx.recv() => {
                    let Some(body) = body else { break };
                    self.process(&body).await;
                }
            }
        }

        // Apply what was already accepted before stopping.
        self.rx.rx.close();
        while let Ok(body) = self.rx.rx.try_recv() {
            self.process(&body).await;
        }
        info!("Callback ingestor stopped");
    }
}

async fn apply(queue: &JobQueue, body: &[u8]) -> CallbackOutcome {
    let payload = match CallbackPayload::parse(body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "Dropping malformed callback");
            return CallbackOutcome::Malformed;
        }
    };

    let external_job_id = payload.external_job_id.clone();
    match queue.handle_callback(payload).await {
        Ok(job) => {
            debug!(job_id = %job.id, external_job_id = %external_job_id, status = %job.status, "Applied callback");
            CallbackOutcome::Applied(job.status)
        }
        Err(QueueError::UnknownExternalJob(_)) => {
            warn!(external_job_id = %external_job_id, "Dropping callback for unknown job");
            CallbackOutcome::UnknownJob
        }
        Err(QueueError::MalformedCallback(e)) => {
            warn!(external_job_id = %external_job_id, error = %e, "Dropping malformed callback");
            CallbackOutcome::Malformed
        }
        Err(e) if e.is_race() => {
            info!(external_job_id = %external_job_id, error = %e, "Ignoring callback for settled job");
            CallbackOutcome::Ignored
        }
        Err(e) => {
            warn!(external_job_id = %external_job_id, error = %e, "Failed to apply callback");
            CallbackOutcome::Ignored
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffPolicy;
    use crate::queue::{QueueBackend, QueueConfig};
    use adreel_models::{Job, JobId, JobType};

    async fn submitted_queue() -> (Arc<JobQueue>, JobId) {
        let queue = Arc::new(JobQueue::in_memory(QueueConfig {
            backend: QueueBackend::Memory,
            backoff: BackoffPolicy::immediate(),
            ..Default::default()
        }));
        let id = queue
            .enqueue(Job::new(JobId::new(), JobType::Generation, "gen", serde_json::Value::Null))
            .await
            .unwrap();
        let claimed = queue.claim_next().await.unwrap().unwrap();
        queue.mark_submitted(&claimed, "ext-7").await.unwrap();
        (queue, id)
    }

    #[tokio::test]
    async fn test_process_outcomes() {
        let (queue, id) = submitted_queue().await;
        let (_tx, rx) = channel(4);
        let ingestor = CallbackIngestor::new(queue.clone(), rx);

        assert_eq!(ingestor.process(b"{not json").await, CallbackOutcome::Malformed);
        assert_eq!(
            ingestor
                .process(br#"{"external_job_id":"nobody","status":"failed"}"#)
                .await,
            CallbackOutcome::UnknownJob
        );

        let ok = br#"{"external_job_id":"ext-7","status":"succeeded","output_ref":"s3://done.mp4"}"#;
        assert_eq!(
            ingestor.process(ok).await,
            CallbackOutcome::Applied(JobStatus::Completed)
        );
        assert_eq!(ingestor.process(ok).await, CallbackOutcome::Ignored);

        let job = queue.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.output_ref.as_deref(), Some("s3://done.mp4"));
    }

    #[tokio::test]
    async fn test_run_drains_channel_until_senders_drop() {
        let (queue, id) = submitted_queue().await;
        let (tx, rx) = channel(4);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        tx.submit(b"garbage".to_vec()).unwrap();
        tx.submit(br#"{"external_job_id":"ext-7","status":"failed","error":"quota"}"#.to_vec())
            .unwrap();
        drop(tx);

        CallbackIngestor::new(queue.clone(), rx).run(shutdown_rx).await;

        let job = queue.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.error_message.as_deref(), Some("quota"));
    }

    #[tokio::test]
    async fn test_submit_fails_when_full() {
        let (tx, _rx) = channel(1);
        tx.submit(b"a".to_vec()).unwrap();
        assert!(tx.submit(b"b".to_vec()).is_err());
    }
}
