//! Artifact serving: the local directory and the durable store.

use atelier_core::asset::RemoteRef;
use atelier_core::naming::{content_type_for, validate_artifact_name};
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Artifacts never change once written.
const IMMUTABLE_CACHE: &str = "public, max-age=31536000, immutable";

fn stream_response(name: &str, body: Body) -> Response {
    (
        [
            (CONTENT_TYPE, content_type_for(name)),
            (CACHE_CONTROL, IMMUTABLE_CACHE),
        ],
        body,
    )
        .into_response()
}

/// GET /local/{filename}
///
/// Serve a locally persisted artifact. Names with path components are
/// rejected before touching the filesystem.
pub async fn get_local(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> AppResult<Response> {
    let name = validate_artifact_name(&filename).map_err(|e| AppError::BadRequest(e.to_string()))?;

    let stream = state.pipeline.materializer().local().open(name).await?;
    Ok(stream_response(name, Body::from_stream(stream)))
}

/// GET /remote/{id}
///
/// Proxy an object from the durable store.
pub async fn get_remote(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let name = validate_artifact_name(&id).map_err(|e| AppError::BadRequest(e.to_string()))?;

    let stream = state
        .durable
        .get(&RemoteRef(name.to_string()))
        .await
        .inspect_err(|e| {
            if !e.is_not_found() {
                tracing::error!(id = %name, error = %e, "Durable store read failed");
            }
        })?;
    Ok(stream_response(name, Body::from_stream(stream)))
}
