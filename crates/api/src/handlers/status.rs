//! Status query surface.

use atelier_core::asset::{AssetDescriptor, ImageMetadata};
use atelier_core::job::JobKey;
use atelier_pipeline::{JobStatus, PipelineError, StatusAction};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    #[serde(default, alias = "promptId")]
    pub job_id: Option<String>,
    #[serde(default, alias = "apiIndex")]
    pub backend_index: Option<String>,
    #[serde(default)]
    pub action: Option<StatusAction>,
}

/// One materialized image as reported to the caller.
#[derive(Debug, Serialize)]
pub struct CompletedImage {
    pub url: String,
    pub metadata: ImageMetadata,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StatusResponse {
    Pending,
    Processing,
    Ready { images: Vec<AssetDescriptor> },
    Completed { images: Vec<CompletedImage> },
    Error { error: String },
}

impl From<JobStatus> for StatusResponse {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Pending => Self::Pending,
            JobStatus::Processing => Self::Processing,
            JobStatus::Ready(images) => Self::Ready { images },
            JobStatus::Completed(artifacts) => Self::Completed {
                images: artifacts
                    .into_iter()
                    .map(|a| CompletedImage {
                        url: a.url,
                        metadata: a.metadata,
                    })
                    .collect(),
            },
            JobStatus::Error(e) => Self::Error {
                error: e.to_string(),
            },
        }
    }
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(StatusResponse::Error { error: error.into() })).into_response()
}

/// GET /api/status?jobId=&backendIndex=&action=poll|retrieve
///
/// `poll` never fetches bytes. `retrieve` materializes a ready job's
/// assets and answers `completed` with servable URLs. A job the backend
/// ran and failed is a 200 `error`; a failed check is a 500 `error`.
pub async fn get_status(
    State(state): State<AppState>,
    query: Result<Query<StatusQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let Some(job_id) = query.job_id.filter(|id| !id.trim().is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing jobId");
    };

    let backend_index = match query.backend_index.as_deref().map(str::trim) {
        None | Some("") => 0,
        Some(raw) => match raw.parse::<usize>() {
            Ok(index) => index,
            Err(_) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("Invalid backendIndex '{raw}'"),
                )
            }
        },
    };

    let key = JobKey::new(backend_index, job_id);
    let action = query.action.unwrap_or_default();

    match state.pipeline.check_status(&key, action).await {
        Ok(status) => Json(StatusResponse::from(status)).into_response(),
        Err(e @ PipelineError::UnknownBackend(_)) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => {
            let (status, _, _) = AppError::Pipeline(e.clone()).classify();
            error_response(status, e.to_string())
        }
    }
}
