//! Model validation errors.

use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("Plan has no timeline segments")]
    EmptyTimeline,

    #[error("Invalid segment {segment}: {reason}")]
    InvalidSegment { segment: String, reason: String },

    #[error("Duplicate segment id: {0}")]
    DuplicateSegment(String),

    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error("Invalid job transition: {0}")]
    InvalidTransition(String),
}

impl ModelError {
    pub fn invalid_segment(segment: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSegment {
            segment: segment.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }
}
