//! Shared data models for the adreel execution router.
//!
//! This crate provides Serde-serializable types for:
//! - Capabilities and compiled execution plans
//! - Engine catalog entries (cost, location, execution mode)
//! - Router lifecycle events and terminal results
//! - Durable jobs and engine callback payloads

pub mod callback;
pub mod capability;
pub mod engine;
pub mod error;
pub mod event;
pub mod job;
pub mod plan;
pub mod result;

// Re-export common types
pub use callback::{CallbackPayload, CallbackStatus};
pub use capability::{Capability, CapabilitySet};
pub use engine::{CostProfile, EngineEntry, EngineId, EngineLocation, ExecutionMode};
pub use error::{ModelError, ModelResult};
pub use event::{RouterEvent, RouterPhase};
pub use job::{Job, JobId, JobStatus, JobType, DEFAULT_MAX_ATTEMPTS};
pub use plan::{ExecutionPlan, TimelineSegment};
pub use result::{Artifacts, RouterResult, RouterStatus};
