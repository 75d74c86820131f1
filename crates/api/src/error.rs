use atelier_core::error::CoreError;
use atelier_pipeline::PipelineError;
use atelier_storage::StoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps the domain error types and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `atelier_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A dispatch pipeline failure.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// A local directory or durable store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

fn internal(message: &str) -> (StatusCode, &'static str, String) {
    tracing::error!(error = %message, "Internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

impl AppError {
    /// HTTP status, error code and client-facing message.
    pub fn classify(&self) -> (StatusCode, &'static str, String) {
        match self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
                CoreError::Internal(msg) => internal(msg),
            },

            // --- Pipeline errors ---
            AppError::Pipeline(err) => match err {
                PipelineError::UnknownBackend(_) => {
                    (StatusCode::BAD_REQUEST, "UNKNOWN_BACKEND", err.to_string())
                }
                PipelineError::NoBackendAccepted { .. } => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "NO_BACKEND_ACCEPTED",
                    err.to_string(),
                ),
                PipelineError::BackendUnreachable { .. }
                | PipelineError::BackendRejected { .. }
                | PipelineError::ParseFailure { .. } => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STATUS_CHECK_FAILED",
                    err.to_string(),
                ),
                other => internal(&other.to_string()),
            },

            // --- Storage errors ---
            AppError::Store(err) => match err {
                StoreError::NotFound(_) => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    "File not found".to_string(),
                ),
                StoreError::InvalidName(msg) => {
                    (StatusCode::BAD_REQUEST, "INVALID_NAME", msg.clone())
                }
                other => internal(&other.to_string()),
            },

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => internal(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.classify();

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
