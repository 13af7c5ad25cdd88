//! Router error types.
//!
//! Only registry and configuration problems surface as errors. Engine-side
//! failures during dispatch are folded into the routing result instead.

use thiserror::Error;

pub type RegistryResult<T> = Result<T, RouterError>;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Duplicate engine id: {0}")]
    DuplicateEngine(String),

    #[error("Invalid engine {engine_id}: {reason}")]
    InvalidEngine { engine_id: String, reason: String },

    #[error("Engine catalog error: {0}")]
    Catalog(#[from] config::ConfigError),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

impl RouterError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_engine(engine_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEngine {
            engine_id: engine_id.into(),
            reason: reason.into(),
        }
    }
}
