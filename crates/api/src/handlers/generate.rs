//! Submission surface.

use atelier_core::job::JobRequest;
use atelier_core::types::BackendIndex;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::rate_limit::ANONYMOUS_CLIENT;
use crate::state::AppState;

/// Header carrying the originating client address behind a proxy.
const FORWARDED_FOR: &str = "x-forwarded-for";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedPrompt {
    pub job_id: String,
    pub backend_index: BackendIndex,
    pub seed: u64,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Vec<AcceptedPrompt>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn failure(status: StatusCode, error: impl Into<String>) -> Response {
    let body = GenerateResponse {
        success: false,
        prompts: None,
        error: Some(error.into()),
    };
    (status, Json(body)).into_response()
}

/// First address of `x-forwarded-for`, else the anonymous bucket.
fn client_identifier(headers: &HeaderMap) -> String {
    headers
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS_CLIENT)
        .to_string()
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/generate
///
/// Submit one job to every backend. Succeeds when at least one backend
/// accepted; returns 500 with every backend's reason when none did.
pub async fn generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<JobRequest>, JsonRejection>,
) -> Response {
    let client = client_identifier(&headers);
    let decision = state.rate_limiter.check(&client).await;
    if decision.limited {
        tracing::warn!(client = %client, "Submission rate limit exceeded");
        let mut response = failure(
            StatusCode::TOO_MANY_REQUESTS,
            "Rate limit exceeded. Please try again later.",
        );
        let headers = response.headers_mut();
        headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
        headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
        return response;
    }

    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return failure(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    if let Err(e) = request.check() {
        return failure(StatusCode::BAD_REQUEST, e.to_string());
    }

    match state.pipeline.submit(request).await {
        Ok(submission) => {
            tracing::info!(
                seed = submission.params.seed,
                accepted = submission.handles.len(),
                failed = submission.failures.len(),
                "Generation submitted",
            );
            let prompts = submission
                .handles
                .into_iter()
                .map(|h| AcceptedPrompt {
                    job_id: h.job_id,
                    backend_index: h.backend_index,
                    seed: h.seed,
                })
                .collect();
            Json(GenerateResponse {
                success: true,
                prompts: Some(prompts),
                error: None,
            })
            .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Generation failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
