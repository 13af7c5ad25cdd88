//! Engine catalog entries.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::capability::CapabilitySet;

/// Engine identifier as it appears in the catalog.
pub type EngineId = String;

/// Coarse pricing tier used for ranking.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum CostProfile {
    Free,
    Low,
    Medium,
    High,
}

impl CostProfile {
    /// Rank used for ordering, cheapest first.
    pub fn rank(&self) -> u8 {
        match self {
            CostProfile::Free => 0,
            CostProfile::Low => 1,
            CostProfile::Medium => 2,
            CostProfile::High => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CostProfile::Free => "free",
            CostProfile::Low => "low",
            CostProfile::Medium => "medium",
            CostProfile::High => "high",
        }
    }
}

impl fmt::Display for CostProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where an engine does its work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EngineLocation {
    /// In the user's browser / on the client device
    Local,
    /// Hosted third-party service
    Cloud,
    /// Our own media pipeline
    Server,
}

impl EngineLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineLocation::Local => "local",
            EngineLocation::Cloud => "cloud",
            EngineLocation::Server => "server",
        }
    }
}

impl fmt::Display for EngineLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the dispatcher hands work to an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Invoked inline; the call returns the output reference
    #[default]
    Sync,
    /// Long-running; tracked as a durable job completed by callback or poll
    Async,
}

/// Catalog entry for a rendering/generation engine.
///
/// Created and updated by configuration. Read-only to the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EngineEntry {
    /// Stable engine id
    pub id: EngineId,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Capabilities this engine provides
    pub capabilities: CapabilitySet,
    /// Pricing tier
    pub cost_profile: CostProfile,
    /// Processing location
    pub location: EngineLocation,
    /// Longest segment the engine accepts, in seconds
    #[serde(default = "default_max_duration")]
    pub max_duration_sec: f64,
    /// Operator-declared preference (higher is preferred)
    #[serde(default)]
    pub priority_score: f64,
    /// Whether the engine is currently accepting work
    #[serde(default = "default_available")]
    pub available: bool,
    /// Sync or async execution
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Adapter endpoint, when the engine is reached over HTTP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

fn default_available() -> bool {
    true
}

fn default_max_duration() -> f64 {
    600.0
}

impl EngineEntry {
    pub fn new(
        id: impl Into<String>,
        capabilities: impl IntoIterator<Item = crate::Capability>,
        cost_profile: CostProfile,
        location: EngineLocation,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            capabilities: capabilities.into_iter().collect(),
            cost_profile,
            location,
            max_duration_sec: default_max_duration(),
            priority_score: 0.0,
            available: true,
            mode: ExecutionMode::Sync,
            endpoint: None,
        }
    }

    /// Set display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set declared priority.
    pub fn with_priority(mut self, priority_score: f64) -> Self {
        self.priority_score = priority_score;
        self
    }

    /// Set maximum segment duration.
    pub fn with_max_duration(mut self, seconds: f64) -> Self {
        self.max_duration_sec = seconds;
        self
    }

    /// Set execution mode.
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set availability.
    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    /// Set adapter endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// True if every required capability is provided.
    pub fn supports(&self, required: &CapabilitySet) -> bool {
        required.is_subset(&self.capabilities)
    }

    /// True if a segment of `seconds` fits within the engine's limit.
    pub fn accepts_duration(&self, seconds: f64) -> bool {
        seconds <= self.max_duration_sec
    }

    pub fn is_async(&self) -> bool {
        self.mode == ExecutionMode::Async
    }
}
