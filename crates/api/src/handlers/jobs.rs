//! Handlers for tracked job records.

use atelier_core::error::CoreError;
use atelier_core::job::JobKey;
use atelier_core::types::BackendIndex;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

fn not_found(key: &JobKey) -> CoreError {
    CoreError::NotFound {
        entity: "Job",
        id: key.to_string(),
    }
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// GET /api/jobs
///
/// All recorded jobs, oldest first.
pub async fn list_jobs(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let jobs = state.pipeline.jobs_list().await?;
    Ok(Json(DataResponse { data: jobs }))
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

/// GET /api/jobs/{backend_index}/{job_id}
pub async fn get_job(
    State(state): State<AppState>,
    Path((backend_index, job_id)): Path<(BackendIndex, String)>,
) -> AppResult<impl IntoResponse> {
    let key = JobKey::new(backend_index, job_id);
    let job = state
        .pipeline
        .job(&key)
        .await?
        .ok_or_else(|| not_found(&key))?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// DELETE /api/jobs/{backend_index}/{job_id}
///
/// Stop polling a job. Returns 204, or 404 if the job is not being polled.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path((backend_index, job_id)): Path<(BackendIndex, String)>,
) -> AppResult<impl IntoResponse> {
    let key = JobKey::new(backend_index, job_id);
    if !state.pipeline.cancel(&key).await {
        return Err(not_found(&key).into());
    }

    tracing::info!(job = %key, "Job cancelled");
    Ok(StatusCode::NO_CONTENT)
}
