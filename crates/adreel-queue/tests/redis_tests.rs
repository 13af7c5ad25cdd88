//! Redis job store integration tests.

use std::sync::Arc;

use adreel_models::{Job, JobId, JobStatus, JobType};
use adreel_queue::{BackoffPolicy, FailureOutcome, JobQueue, QueueBackend, QueueConfig, RedisJobStore};

fn redis_queue() -> Arc<JobQueue> {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    // Fresh prefix per test so runs never see each other's jobs.
    let prefix = format!("adreel-test:{}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default());
    let store = RedisJobStore::new(&url, prefix.clone()).expect("Failed to create store");
    Arc::new(JobQueue::new(
        Arc::new(store),
        QueueConfig {
            redis_url: url,
            key_prefix: prefix,
            backend: QueueBackend::Redis,
            backoff: BackoffPolicy::immediate(),
            ..Default::default()
        },
    ))
}

fn job(priority: i32, offset_ms: i64) -> Job {
    Job::new(JobId::new(), JobType::Render, "engine-b", serde_json::Value::Null)
        .with_priority(priority)
        .with_created_at(chrono::Utc::now() - chrono::Duration::seconds(5) + chrono::Duration::milliseconds(offset_ms))
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_ping() {
    let queue = redis_queue();
    queue.ping().await.expect("Failed to ping");
    assert_eq!(queue.len().await.expect("Failed to get length"), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_priority_then_fifo() {
    let queue = redis_queue();
    let mut ids = Vec::new();
    for (i, priority) in [5, 1, 5, 3].into_iter().enumerate() {
        ids.push(queue.enqueue(job(priority, i as i64)).await.expect("Failed to enqueue"));
    }

    let mut order = Vec::new();
    while let Some(claimed) = queue.claim_next().await.expect("Failed to claim") {
        assert_eq!(claimed.status, JobStatus::Processing);
        order.push(claimed.id);
    }
    assert_eq!(order, [ids[0].clone(), ids[2].clone(), ids[3].clone(), ids[1].clone()]);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_concurrent_claim_single_winner() {
    let queue = redis_queue();
    queue.enqueue(job(0, 0)).await.expect("Failed to enqueue");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let queue = queue.clone();
            tokio::spawn(async move { queue.claim_next().await })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if handle.await.expect("task panicked").expect("Failed to claim").is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_callback_and_retry_lifecycle() {
    let queue = redis_queue();
    let id = queue
        .enqueue(job(0, 0).with_max_attempts(2))
        .await
        .expect("Failed to enqueue");

    let claimed = queue.claim_next().await.unwrap().unwrap();
    let (_, outcome) = queue.fail(&claimed, "flaky").await.unwrap();
    assert!(matches!(outcome, FailureOutcome::Retry { .. }));

    let claimed = queue.claim_next().await.unwrap().unwrap();
    assert_eq!(claimed.attempts, 2);
    queue.mark_submitted(&claimed, "ext-redis-1").await.unwrap();

    let payload = adreel_models::CallbackPayload::parse(
        br#"{"external_job_id":"ext-redis-1","status":"succeeded","output_ref":"s3://out.mp4"}"#,
    )
    .unwrap();
    let done = queue.handle_callback(payload).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);

    let stored = queue.get_job(&id).await.unwrap().unwrap();
    assert_eq!(stored.output_ref.as_deref(), Some("s3://out.mp4"));
    assert_eq!(queue.list_by_status(JobStatus::Completed).await.unwrap().len(), 1);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_late_callback_after_retry_is_dropped() {
    let queue = redis_queue();
    let id = queue.enqueue(job(0, 0)).await.expect("Failed to enqueue");

    let first = queue.claim_next().await.unwrap().unwrap();
    let first = queue.mark_submitted(&first, "ext-old").await.unwrap();
    queue.fail(&first, "lease expired").await.unwrap();

    let second = queue.claim_next().await.unwrap().unwrap();
    queue.mark_submitted(&second, "ext-new").await.unwrap();

    let late = adreel_models::CallbackPayload::parse(
        br#"{"external_job_id":"ext-old","status":"failed","error":"old attempt"}"#,
    )
    .unwrap();
    assert!(queue.handle_callback(late).await.is_err());

    let stored = queue.get_job(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Processing);
    assert_eq!(stored.external_job_id.as_deref(), Some("ext-new"));
}
