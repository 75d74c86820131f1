use atelier_comfyui::api::ComfyUIApiError;
use atelier_core::error::CoreError;
use atelier_core::types::BackendIndex;

/// Failures of the dispatch pipeline.
///
/// Per-backend and per-job failures are isolated by the callers: they
/// shrink an aggregate result or show up as an `error` status, they
/// never abort sibling work.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    /// The backend could not be reached or did not answer in time.
    #[error("Backend {endpoint} unreachable: {reason}")]
    BackendUnreachable { endpoint: String, reason: String },

    /// The backend answered with a non-success status.
    #[error("Backend {endpoint} rejected request ({status}): {body}")]
    BackendRejected {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// The backend's history or job graph was malformed.
    #[error("Malformed response from {endpoint}: {reason}")]
    ParseFailure { endpoint: String, reason: String },

    /// The backend ran the job and reported a failure.
    #[error("Execution failed on {endpoint}: {message}")]
    ExecutionFailed { endpoint: String, message: String },

    /// A job stayed pending longer than the configured limit.
    #[error("Job {job_id} still pending after {waited_secs}s")]
    PendingTimeout { job_id: String, waited_secs: u64 },

    /// The produced asset could not be downloaded.
    #[error("Failed to fetch asset {filename}: {reason}")]
    AssetFetchFailure { filename: String, reason: String },

    /// The local artifact write failed.
    #[error("Failed to persist {name} locally: {reason}")]
    LocalPersistFailure { name: String, reason: String },

    /// The job already resolved to an error; carries the recorded message.
    #[error("{message}")]
    JobFailed { message: String },

    /// Upload to the durable store failed after all retries.
    #[error("Failed to replicate {name}: {reason}")]
    RemoteReplicationFailure { name: String, reason: String },

    /// Every configured backend refused or could not be reached.
    #[error("{}", .reasons.join(", "))]
    NoBackendAccepted { reasons: Vec<String> },

    /// The backend index is outside the registry.
    #[error("Unknown backend index {0}")]
    UnknownBackend(BackendIndex),

    /// Job record bookkeeping failed.
    #[error(transparent)]
    Store(#[from] CoreErrorMessage),
}

/// Cloneable wrapper for [`CoreError`] messages.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct CoreErrorMessage(pub String);

impl From<CoreError> for PipelineError {
    fn from(err: CoreError) -> Self {
        PipelineError::Store(CoreErrorMessage(err.to_string()))
    }
}

impl PipelineError {
    /// Classify a backend API error raised while talking to `endpoint`.
    pub fn from_api(endpoint: &str, err: ComfyUIApiError) -> Self {
        let endpoint = endpoint.to_string();
        match err {
            ComfyUIApiError::Request { source, .. } => PipelineError::BackendUnreachable {
                endpoint,
                reason: source.to_string(),
            },
            ComfyUIApiError::ApiError { status, body } => PipelineError::BackendRejected {
                endpoint,
                status,
                body,
            },
            ComfyUIApiError::Parse(reason) => PipelineError::ParseFailure { endpoint, reason },
        }
    }

    /// Whether retrying later could help (network-level failure).
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::BackendUnreachable { .. })
    }

    /// Whether the backend could not answer a status check at all, as
    /// opposed to answering that the job failed.
    pub fn is_failed_check(&self) -> bool {
        matches!(
            self,
            Self::BackendUnreachable { .. } | Self::BackendRejected { .. } | Self::ParseFailure { .. }
        )
    }
}
