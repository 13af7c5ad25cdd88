//! Engine callback endpoint.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::warn;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CallbackAccepted {
    pub status: &'static str,
}

/// Accept an engine callback for asynchronous processing.
///
/// Parsing happens in the ingestor; bad payloads are dropped there.
pub async fn receive_callback(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<CallbackAccepted>)> {
    state.callbacks.submit(body.to_vec()).map_err(|e| {
        warn!(error = %e, "Rejecting engine callback");
        ApiError::unavailable(e.to_string())
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CallbackAccepted { status: "accepted" }),
    ))
}
