//! Durable job queue for asynchronous engine work.
//!
//! This crate provides:
//! - The job state machine with bounded retries and backoff
//! - Redis and in-memory stores with atomic claiming
//! - Callback ingestion for externally-running jobs
//! - Stuck-job recovery

pub mod backoff;
pub mod callbacks;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod redis_store;
pub mod state;
pub mod store;

pub use backoff::BackoffPolicy;
pub use callbacks::{channel as callback_channel, CallbackIngestor, CallbackOutcome, CallbackReceiver, CallbackSender};
pub use error::{QueueError, QueueResult};
pub use queue::{JobQueue, QueueBackend, QueueConfig};
pub use redis_store::RedisJobStore;
pub use state::FailureOutcome;
pub use store::{InMemoryJobStore, JobStore};
