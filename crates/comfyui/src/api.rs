//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps workflow submission, history retrieval and asset download
//! using [`reqwest`]. Every request is bounded by the client timeout so
//! a hung backend surfaces as an error instead of a stall.

use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;

use crate::history::{classify_history, HistoryStatus};

/// Default per-request timeout for backend calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for a single ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: i64,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The response body was not the JSON shape we expected.
    #[error("Malformed ComfyUI response: {0}")]
    Parse(String),
}

impl ComfyUIApiError {
    /// Whether the failure happened below HTTP (unreachable, timed out).
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Request { .. })
    }
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_timeout(api_url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create an API client whose requests give up after `timeout`.
    pub fn with_timeout(api_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self::with_client(client, api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (useful for connection pooling across multiple instances).
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Base HTTP URL of this instance.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Submit a workflow for execution.
    ///
    /// Sends a `POST /prompt` request with the given workflow JSON and a
    /// fresh client ID. Returns the server-assigned `prompt_id`.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": uuid::Uuid::new_v4().to_string(),
        });

        let url = format!("{}/prompt", self.api_url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|source| ComfyUIApiError::Request { url, source })?;

        Self::parse_response(response).await
    }

    /// Retrieve the raw execution history for a specific prompt.
    ///
    /// Sends a `GET /history/{prompt_id}` request. An empty object means
    /// the backend has no record of the prompt yet.
    pub async fn get_history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError> {
        let url = format!("{}/history/{}", self.api_url, prompt_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| ComfyUIApiError::Request { url, source })?;

        Self::parse_response(response).await
    }

    /// Fetch the history of a prompt and classify it.
    ///
    /// Performs no writes; calling it twice without backend-side change
    /// returns the same status.
    pub async fn poll(&self, prompt_id: &str) -> Result<HistoryStatus, ComfyUIApiError> {
        let history = self.get_history(prompt_id).await?;
        classify_history(prompt_id, &history)
    }

    /// URL of a produced asset on this backend (`GET /view`).
    pub fn view_url(&self, filename: &str, subfolder: &str, kind: &str) -> String {
        let base = format!("{}/view", self.api_url);
        match reqwest::Url::parse_with_params(
            &base,
            &[("filename", filename), ("subfolder", subfolder), ("type", kind)],
        ) {
            Ok(url) => url.to_string(),
            Err(_) => format!("{base}?filename={filename}&subfolder={subfolder}&type={kind}"),
        }
    }

    /// Download the raw bytes of a produced asset.
    pub async fn fetch_asset(
        &self,
        filename: &str,
        subfolder: &str,
        kind: &str,
    ) -> Result<Bytes, ComfyUIApiError> {
        let url = self.view_url(filename, subfolder, kind);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| ComfyUIApiError::Request {
                url: url.clone(),
                source,
            })?;

        let response = Self::ensure_success(response).await?;
        response
            .bytes()
            .await
            .map_err(|source| ComfyUIApiError::Request { url, source })
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    ///
    /// Body decoding failures are reported as [`ComfyUIApiError::Parse`]
    /// so callers can tell them apart from transport errors.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let url = response.url().to_string();
        let response = Self::ensure_success(response).await?;
        let text = response
            .text()
            .await
            .map_err(|source| ComfyUIApiError::Request { url, source })?;
        serde_json::from_str(&text).map_err(|e| ComfyUIApiError::Parse(e.to_string()))
    }
}
