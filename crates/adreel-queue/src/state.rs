//! Job state machine.
//!
//! ```text
//! queued --claim--> processing --complete--> completed
//!   ^                   |
//!   +----retry----------+--fail (attempts == max)--> failed
//! ```
//!
//! Every function mutates a job in place and refuses transitions out of
//! terminal states. Stores persist the result with a compare-and-swap, so
//! these functions never race with each other on the same stored job.

use chrono::{DateTime, Utc};

use adreel_models::{Job, JobStatus};

use crate::backoff::BackoffPolicy;
use crate::error::{QueueError, QueueResult};

/// What a failed attempt turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back to `queued`, claimable again at `available_at`
    Retry { available_at: DateTime<Utc> },
    /// `failed`, never retried again
    Terminal,
}

fn ensure_not_terminal(job: &Job) -> QueueResult<()> {
    if job.is_terminal() {
        return Err(QueueError::TerminalState {
            id: job.id.to_string(),
            status: job.status,
        });
    }
    Ok(())
}

fn ensure_processing(job: &Job, action: &'static str) -> QueueResult<()> {
    ensure_not_terminal(job)?;
    if job.status != JobStatus::Processing {
        return Err(QueueError::invalid_transition(job.id.as_str(), job.status, action));
    }
    Ok(())
}

/// `queued -> processing`; consumes one attempt.
pub fn claim(job: &mut Job, now: DateTime<Utc>) -> QueueResult<()> {
    ensure_not_terminal(job)?;
    if job.status != JobStatus::Queued {
        return Err(QueueError::invalid_transition(job.id.as_str(), job.status, "claim"));
    }
    if !job.has_attempts_left() {
        return Err(QueueError::AttemptsExhausted {
            id: job.id.to_string(),
            attempts: job.attempts,
            max_attempts: job.max_attempts,
        });
    }

    job.status = JobStatus::Processing;
    job.attempts += 1;
    job.started_at = Some(now);
    job.updated_at = now;
    Ok(())
}

/// Record the engine's own id for submitted work. The job stays `processing`.
pub fn record_submission(job: &mut Job, external_job_id: &str, now: DateTime<Utc>) -> QueueResult<()> {
    ensure_processing(job, "record submission for")?;
    job.external_job_id = Some(external_job_id.to_string());
    job.updated_at = now;
    Ok(())
}

/// Refresh `updated_at` so the job is not mistaken for stuck.
pub fn touch(job: &mut Job, now: DateTime<Utc>) -> QueueResult<()> {
    ensure_processing(job, "touch")?;
    job.updated_at = now;
    Ok(())
}

/// `processing -> completed`.
pub fn complete(
    job: &mut Job,
    output_ref: &str,
    callback_data: Option<serde_json::Value>,
    now: DateTime<Utc>,
) -> QueueResult<()> {
    ensure_processing(job, "complete")?;
    job.status = JobStatus::Completed;
    job.output_ref = Some(output_ref.to_string());
    if callback_data.is_some() {
        job.callback_data = callback_data;
    }
    job.error_message = None;
    job.completed_at = Some(now);
    job.updated_at = now;
    Ok(())
}

/// A `processing` attempt failed: retry with backoff or fail terminally.
pub fn fail_attempt(
    job: &mut Job,
    error: &str,
    backoff: &BackoffPolicy,
    now: DateTime<Utc>,
) -> QueueResult<FailureOutcome> {
    ensure_processing(job, "fail")?;
    job.error_message = Some(error.to_string());
    job.updated_at = now;

    if job.has_attempts_left() {
        let delay = chrono::Duration::from_std(backoff.delay_for(job.attempts))
            .unwrap_or_else(|_| chrono::Duration::zero());
        let available_at = now + delay;
        job.status = JobStatus::Queued;
        job.external_job_id = None;
        job.available_at = available_at;
        return Ok(FailureOutcome::Retry { available_at });
    }

    job.status = JobStatus::Failed;
    job.completed_at = Some(now);
    Ok(FailureOutcome::Terminal)
}

/// A job sat in `processing` past the stuck threshold.
pub fn recover_stuck(
    job: &mut Job,
    backoff: &BackoffPolicy,
    now: DateTime<Utc>,
) -> QueueResult<FailureOutcome> {
    let since = job.updated_at;
    fail_attempt(
        job,
        &format!("no progress since {}", since.to_rfc3339()),
        backoff,
        now,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use adreel_models::{JobId, JobType};
    use std::time::Duration;

    fn job(max_attempts: u32) -> Job {
        Job::new(JobId::new(), JobType::Generation, "gen", serde_json::Value::Null)
            .with_max_attempts(max_attempts)
    }

    #[test]
    fn test_claim_consumes_attempt() {
        let now = Utc::now();
        let mut job = job(3);
        claim(&mut job, now).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.started_at, Some(now));
    }

    #[test]
    fn test_failure_retries_with_backoff() {
        let now = Utc::now();
        let policy = BackoffPolicy::new(Duration::from_secs(10), Duration::from_secs(60), 2.0);
        let mut job = job(3);
        claim(&mut job, now).unwrap();
        record_submission(&mut job, "ext-1", now).unwrap();

        let outcome = fail_attempt(&mut job, "quota", &policy, now).unwrap();

        assert_eq!(
            outcome,
            FailureOutcome::Retry {
                available_at: now + chrono::Duration::seconds(10)
            }
        );
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.external_job_id, None);
        assert!(!job.is_claimable(now));
        assert!(job.is_claimable(now + chrono::Duration::seconds(10)));
    }

    #[test]
    fn test_last_attempt_failure_is_terminal() {
        let now = Utc::now();
        let mut job = job(3);
        job.attempts = 2;
        claim(&mut job, now).unwrap();
        assert_eq!(job.attempts, 3);

        let outcome = fail_attempt(&mut job, "boom", &BackoffPolicy::default(), now).unwrap();

        assert_eq!(outcome, FailureOutcome::Terminal);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.completed_at, Some(now));
        assert_eq!(job.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_attempts_never_exceed_max() {
        let now = Utc::now();
        let policy = BackoffPolicy::immediate();
        let mut job = job(2);

        for _ in 0..5 {
            if claim(&mut job, now).is_err() {
                break;
            }
            let _ = fail_attempt(&mut job, "x", &policy, now);
            assert!(job.attempts <= job.max_attempts);
        }
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 2);
    }

    #[test]
    fn test_terminal_states_never_transition() {
        let now = Utc::now();
        let mut done = job(3);
        claim(&mut done, now).unwrap();
        complete(&mut done, "s3://out", None, now).unwrap();

        assert!(matches!(claim(&mut done, now), Err(QueueError::TerminalState { .. })));
        assert!(matches!(
            fail_attempt(&mut done, "late", &BackoffPolicy::default(), now),
            Err(QueueError::TerminalState { .. })
        ));
        assert!(matches!(
            complete(&mut done, "other", None, now),
            Err(QueueError::TerminalState { .. })
        ));
        assert_eq!(done.output_ref.as_deref(), Some("s3://out"));
    }

    #[test]
    fn test_cannot_complete_queued_job() {
        let mut job = job(3);
        let err = complete(&mut job, "s3://out", None, Utc::now()).unwrap_err();
        assert!(matches!(err, QueueError::InvalidTransition { action: "complete", .. }));
    }

    #[test]
    fn test_recover_stuck_requeues() {
        let start = Utc::now();
        let mut job = job(3);
        claim(&mut job, start).unwrap();

        let later = start + chrono::Duration::hours(5);
        let outcome = recover_stuck(&mut job, &BackoffPolicy::immediate(), later).unwrap();

        assert_eq!(outcome, FailureOutcome::Retry { available_at: later });
        assert!(job.error_message.unwrap().starts_with("no progress since"));
    }
}
