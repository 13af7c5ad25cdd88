//! Application state.

use std::sync::Arc;

use adreel_queue::{CallbackSender, JobQueue};
use adreel_router::Router as ExecutionRouter;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub router: Arc<ExecutionRouter>,
    pub queue: Arc<JobQueue>,
    pub callbacks: CallbackSender,
}

impl AppState {
    pub fn new(
        config: ApiConfig,
        router: Arc<ExecutionRouter>,
        queue: Arc<JobQueue>,
        callbacks: CallbackSender,
    ) -> Self {
        Self {
            config,
            router,
            queue,
            callbacks,
        }
    }
}
