//! Router lifecycle events.
//!
//! Events are append-only and never mutated after emission. They are the
//! only channel through which callers observe dispatch progress.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::engine::EngineId;
use crate::job::JobId;

/// Dispatch phase an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RouterPhase {
    RouteStarted,
    CandidatesResolved,
    DispatchAttempt,
    DispatchResult,
    DispatchFailed,
    DispatchCancelled,
    JobEnqueued,
    RouteCompleted,
}

impl RouterPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouterPhase::RouteStarted => "route_started",
            RouterPhase::CandidatesResolved => "candidates_resolved",
            RouterPhase::DispatchAttempt => "dispatch_attempt",
            RouterPhase::DispatchResult => "dispatch_result",
            RouterPhase::DispatchFailed => "dispatch_failed",
            RouterPhase::DispatchCancelled => "dispatch_cancelled",
            RouterPhase::JobEnqueued => "job_enqueued",
            RouterPhase::RouteCompleted => "route_completed",
        }
    }
}

impl fmt::Display for RouterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Timestamped record emitted during dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RouterEvent {
    /// Position within the routing call (starts at 0)
    pub seq: u64,
    /// When the event was emitted
    pub timestamp: DateTime<Utc>,
    /// Routing call / job this event belongs to
    pub job_id: JobId,
    /// Dispatch phase
    pub phase: RouterPhase,
    /// Engine concerned, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_id: Option<EngineId>,
    /// Human-readable detail
    pub message: String,
}

impl RouterEvent {
    pub fn new(
        seq: u64,
        job_id: JobId,
        phase: RouterPhase,
        engine_id: Option<EngineId>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            seq,
            timestamp: Utc::now(),
            job_id,
            phase,
            engine_id,
            message: message.into(),
        }
    }
}
