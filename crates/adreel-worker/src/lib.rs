//! Worker for asynchronous engine jobs.
//!
//! This crate provides:
//! - Job executor that submits claimed jobs to their engines
//! - Engine status polling for submitted jobs
//! - Stuck job recovery
//! - Structured per-job logging
//! - Graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod poller;
pub mod stuck_detector;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::{execute_job, JobDisposition, JobExecutor};
pub use logging::JobLogger;
pub use poller::Poller;
pub use stuck_detector::StuckJobDetector;
