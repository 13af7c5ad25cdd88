//! Job persistence.
//!
//! Stores are the source of truth for job state. Two guarantees matter:
//! - `claim_next` hands a given queued job to exactly one caller
//! - `update` is a compare-and-swap on `(status, attempts)`, so a writer
//!   holding a stale copy loses instead of overwriting newer state

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use adreel_models::{Job, JobId, JobStatus};

use crate::error::{QueueError, QueueResult};
use crate::state;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job. Fails with `DuplicateJob` if the id exists.
    async fn insert(&self, job: &Job) -> QueueResult<()>;

    async fn get(&self, id: &JobId) -> QueueResult<Option<Job>>;

    async fn find_by_external_id(&self, external_job_id: &str) -> QueueResult<Option<Job>>;

    /// Atomically claim the best claimable job: highest priority first,
    /// then oldest. The returned job is already `processing`.
    async fn claim_next(&self, now: DateTime<Utc>) -> QueueResult<Option<Job>>;

    /// Replace `current` with `next` if the stored job still has
    /// `current`'s status and attempt count.
    async fn update(&self, current: &Job, next: &Job) -> QueueResult<()>;

    /// `processing` jobs with no update for longer than `threshold`.
    async fn list_stuck(&self, threshold: Duration, now: DateTime<Utc>) -> QueueResult<Vec<Job>>;

    async fn list_by_status(&self, status: JobStatus) -> QueueResult<Vec<Job>>;

    /// Total number of stored jobs.
    async fn len(&self) -> QueueResult<usize>;

    /// Check the backing store is reachable.
    async fn ping(&self) -> QueueResult<()> {
        Ok(())
    }
}

/// Compare a stored job against the copy a writer started from.
pub(crate) fn check_current(stored: &Job, current: &Job) -> QueueResult<()> {
    if stored.is_terminal() {
        return Err(QueueError::TerminalState {
            id: stored.id.to_string(),
            status: stored.status,
        });
    }
    if stored.status != current.status || stored.attempts != current.attempts {
        return Err(QueueError::Conflict {
            id: stored.id.to_string(),
            expected: current.status,
            actual: stored.status,
        });
    }
    Ok(())
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, (u64, Job)>,
    external: HashMap<String, JobId>,
    next_seq: u64,
}

/// In-process store for tests and single-binary deployments.
#[derive(Default)]
pub struct InMemoryJobStore {
    inner: Mutex<Inner>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: &Job) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.jobs.contains_key(&job.id) {
            return Err(QueueError::DuplicateJob(job.id.to_string()));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        if let Some(external) = &job.external_job_id {
            inner.external.insert(external.clone(), job.id.clone());
        }
        inner.jobs.insert(job.id.clone(), (seq, job.clone()));
        Ok(())
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<Job>> {
        let inner = self.inner.lock().await;
        Ok(inner.jobs.get(id).map(|(_, job)| job.clone()))
    }

    async fn find_by_external_id(&self, external_job_id: &str) -> QueueResult<Option<Job>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .external
            .get(external_job_id)
            .and_then(|id| inner.jobs.get(id))
            .map(|(_, job)| job.clone()))
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> QueueResult<Option<Job>> {
        let mut inner = self.inner.lock().await;

        let best = inner
            .jobs
            .values()
            .filter(|(_, job)| job.is_claimable(now) && job.has_attempts_left())
            .min_by(|(seq_a, a), (seq_b, b)| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| a.created_at.cmp(&b.created_at))
                    .then_with(|| seq_a.cmp(seq_b))
            })
            .map(|(_, job)| job.id.clone());

        let Some(id) = best else {
            return Ok(None);
        };
        let Some((_, job)) = inner.jobs.get_mut(&id) else {
            return Ok(None);
        };
        state::claim(job, now)?;
        Ok(Some(job.clone()))
    }

    async fn update(&self, current: &Job, next: &Job) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        let (_, stored) = inner
            .jobs
            .get_mut(&current.id)
            .ok_or_else(|| QueueError::not_found(current.id.as_str()))?;
        check_current(stored, current)?;
        let previous = std::mem::replace(stored, next.clone()).external_job_id;

        if let Some(old) = previous.filter(|old| next.external_job_id.as_ref() != Some(old)) {
            if inner.external.get(&old) == Some(&next.id) {
                inner.external.remove(&old);
            }
        }
        if let Some(external) = &next.external_job_id {
            inner.external.insert(external.clone(), next.id.clone());
        }
        Ok(())
    }

    async fn list_stuck(&self, threshold: Duration, now: DateTime<Utc>) -> QueueResult<Vec<Job>> {
        let threshold =
            chrono::Duration::from_std(threshold).unwrap_or_else(|_| chrono::Duration::weeks(5200));
        let inner = self.inner.lock().await;
        let mut stuck: Vec<Job> = inner
            .jobs
            .values()
            .filter(|(_, job)| job.is_stuck(threshold, now))
            .map(|(_, job)| job.clone())
            .collect();
        stuck.sort_by_key(|job| job.updated_at);
        Ok(stuck)
    }

    async fn list_by_status(&self, status: JobStatus) -> QueueResult<Vec<Job>> {
        let inner = self.inner.lock().await;
        let mut jobs: Vec<(u64, Job)> = inner
            .jobs
            .values()
            .filter(|(_, job)| job.status == status)
            .cloned()
            .collect();
        jobs.sort_by_key(|(seq, _)| *seq);
        Ok(jobs.into_iter().map(|(_, job)| job).collect())
    }

    async fn len(&self) -> QueueResult<usize> {
        Ok(self.inner.lock().await.jobs.len())
    }
}
