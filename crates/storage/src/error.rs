use atelier_core::error::CoreError;

/// Errors from the local artifact directory and durable store adapters.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No object or file with the given name exists.
    #[error("Object not found: {0}")]
    NotFound(String),

    /// The name was rejected before touching storage.
    #[error("Invalid object name: {0}")]
    InvalidName(String),

    /// Local filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote storage service reported a failure.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether a later attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Backend(_))
    }
}

impl From<CoreError> for StoreError {
    fn from(err: CoreError) -> Self {
        StoreError::InvalidName(err.to_string())
    }
}
