//! Execution router.
//!
//! This crate provides:
//! - Engine registry with snapshot reads and hot swap
//! - Capability matching and deterministic engine scoring
//! - Rolling per-engine success statistics
//! - The dispatcher that never fails the caller for engine-side causes
//! - Event sinks for observing dispatch progress

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod events;
pub mod http_adapter;
pub mod matcher;
pub mod metrics;
pub mod registry;
pub mod scorer;
pub mod stats;

pub use config::RouterConfig;
pub use dispatcher::{
    BoxError, JobSink, RouteInput, Router, ALL_ENGINES_FAILED, CANCELLED, NO_COMPATIBLE_ENGINE,
    NO_ENGINE_SATISFIES_CONSTRAINTS,
};
pub use engine::{EngineAdapter, EngineError, EngineOutcome, EngineRequest, PollStatus};
pub use error::{RegistryResult, RouterError};
pub use events::{
    BroadcastSink, ChannelSink, CollectingSink, EventEmitter, EventSink, FanoutSink, NoopSink,
    TracingSink,
};
pub use http_adapter::HttpEngineAdapter;
pub use matcher::get_compatible_engines;
pub use registry::{EngineCatalog, EngineRegistry, RegistrySnapshot};
pub use scorer::{score_engines, ScoringConstraints};
pub use stats::SuccessStats;
