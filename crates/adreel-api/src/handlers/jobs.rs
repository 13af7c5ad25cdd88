//! Job status endpoint.

use axum::extract::{Path, State};
use axum::Json;

use adreel_models::{Job, JobId};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const MAX_JOB_ID_LEN: usize = 128;

/// Reject ids that cannot name a job.
fn parse_job_id(raw: &str) -> ApiResult<JobId> {
    let valid = !raw.is_empty()
        && raw.len() <= MAX_JOB_ID_LEN
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(ApiError::bad_request(format!("malformed job id: {raw:?}")));
    }
    Ok(JobId::from_string(raw))
}

/// Current state of a job.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Job>> {
    let id = parse_job_id(&job_id)?;
    let job = state
        .queue
        .get_job(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("job {id}")))?;
    Ok(Json(job))
}
