//! Compiled execution plans.
//!
//! A plan is produced by the creative compiler and is immutable once
//! compiled. The router only reads it.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use validator::Validate;

use crate::capability::{Capability, CapabilitySet};
use crate::error::{ModelError, ModelResult};

/// One segment of the output timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct TimelineSegment {
    /// Segment identifier, unique within the plan
    #[validate(length(min = 1, max = 128))]
    pub id: String,
    /// Capabilities an engine must provide to render this segment
    #[serde(default)]
    pub required_capabilities: CapabilitySet,
    /// Reference to the source asset (storage key, URL or prompt id)
    #[validate(length(min = 1))]
    pub asset_ref: String,
    /// Offset of the segment within the output, in seconds
    #[validate(range(min = 0.0))]
    pub start_sec: f64,
    /// Segment length in seconds
    pub duration_sec: f64,
}

impl TimelineSegment {
    pub fn new(
        id: impl Into<String>,
        asset_ref: impl Into<String>,
        start_sec: f64,
        duration_sec: f64,
    ) -> Self {
        Self {
            id: id.into(),
            required_capabilities: CapabilitySet::new(),
            asset_ref: asset_ref.into(),
            start_sec,
            duration_sec,
        }
    }

    /// Add a required capability.
    pub fn requires(mut self, capability: Capability) -> Self {
        self.required_capabilities.insert(capability);
        self
    }

    /// Add several required capabilities.
    pub fn requires_all(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.required_capabilities.extend(capabilities);
        self
    }

    /// End of the segment on the output timeline.
    pub fn end_sec(&self) -> f64 {
        self.start_sec + self.duration_sec
    }
}

/// Ordered sequence of timeline segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionPlan {
    /// Plan identifier assigned by the compiler
    pub plan_id: String,
    /// Segments in output order
    pub timeline: Vec<TimelineSegment>,
    /// When the plan was compiled
    pub compiled_at: DateTime<Utc>,
}

impl ExecutionPlan {
    pub fn new(plan_id: impl Into<String>, timeline: Vec<TimelineSegment>) -> Self {
        Self {
            plan_id: plan_id.into(),
            timeline,
            compiled_at: Utc::now(),
        }
    }

    /// Union of every segment's required capabilities.
    pub fn required_capabilities(&self) -> CapabilitySet {
        self.timeline
            .iter()
            .flat_map(|s| s.required_capabilities.iter().copied())
            .collect()
    }

    /// Longest single segment, in seconds. Zero for an empty plan.
    pub fn max_segment_duration(&self) -> f64 {
        self.timeline
            .iter()
            .map(|s| s.duration_sec)
            .fold(0.0, f64::max)
    }

    /// Sum of all segment durations.
    pub fn total_duration(&self) -> f64 {
        self.timeline.iter().map(|s| s.duration_sec).sum()
    }

    /// Validate the plan before it is routed.
    ///
    /// Any error here is a caller-input error: the router reports it as
    /// `failed` without attempting an engine.
    pub fn validate(&self) -> ModelResult<()> {
        if self.timeline.is_empty() {
            return Err(ModelError::EmptyTimeline);
        }

        let mut seen = HashSet::with_capacity(self.timeline.len());
        for segment in &self.timeline {
            if let Err(e) = Validate::validate(segment) {
                return Err(ModelError::invalid_segment(&segment.id, e.to_string()));
            }
            if !segment.duration_sec.is_finite() || segment.duration_sec <= 0.0 {
                return Err(ModelError::invalid_segment(
                    &segment.id,
                    format!("duration must be positive, got {}", segment.duration_sec),
                ));
            }
            if !segment.start_sec.is_finite() {
                return Err(ModelError::invalid_segment(
                    &segment.id,
                    format!("start must be finite, got {}", segment.start_sec),
                ));
            }
            if !seen.insert(segment.id.as_str()) {
                return Err(ModelError::DuplicateSegment(segment.id.clone()));
            }
        }

        Ok(())
    }
}
