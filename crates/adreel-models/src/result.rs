//! Terminal router results.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::engine::EngineId;
use crate::job::JobId;
use crate::plan::ExecutionPlan;

/// Outcome of a routing call.
///
/// `Failed` is reserved for caller-input errors detected before any engine
/// is attempted. Engine-side failures downgrade to `PartialSuccess`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RouterStatus {
    Success,
    PartialSuccess,
    Failed,
}

impl RouterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouterStatus::Success => "success",
            RouterStatus::PartialSuccess => "partial_success",
            RouterStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RouterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything computed so far, preserved whatever the outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Artifacts {
    /// The compiled plan as received
    pub plan: ExecutionPlan,
    /// Upstream creative blueprint (opaque)
    #[serde(default)]
    pub blueprint: serde_json::Value,
    /// Upstream analysis (opaque)
    #[serde(default)]
    pub analysis: serde_json::Value,
    /// Output produced by a synchronous engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,
    /// Engine that produced the output or accepted the job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_id: Option<EngineId>,
    /// Durable job handle when work was handed to an async engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
}

impl Artifacts {
    pub fn new(plan: ExecutionPlan, blueprint: serde_json::Value, analysis: serde_json::Value) -> Self {
        Self {
            plan,
            blueprint,
            analysis,
            output_ref: None,
            engine_id: None,
            job_id: None,
        }
    }
}

/// Terminal value returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RouterResult {
    pub status: RouterStatus,
    /// Id of the routing call; for async engines, also the job id
    pub job_id: JobId,
    /// Engines tried, in order
    pub attempted_engines: Vec<EngineId>,
    pub artifacts: Artifacts,
    /// Machine-readable reason for degraded outcomes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// What happened, for display
    pub human_message: String,
}

impl RouterResult {
    pub fn is_success(&self) -> bool {
        self.status == RouterStatus::Success
    }

    /// True for `partial_success` and `failed`.
    pub fn is_degraded(&self) -> bool {
        self.status != RouterStatus::Success
    }

    /// True if an async job now tracks the work.
    pub fn has_job(&self) -> bool {
        self.artifacts.job_id.is_some()
    }
}
