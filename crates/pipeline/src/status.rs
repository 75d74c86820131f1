//! Job status as reported to callers.

use atelier_core::asset::{AssetDescriptor, StoredArtifact};
use atelier_core::job::JobState;
use serde::Deserialize;

use crate::error::PipelineError;

/// Outcome of checking a job.
///
/// `Processing` is a sub-state of `Pending`. `Ready` carries the asset
/// descriptors (bytes not fetched yet); `Completed` carries the
/// materialized artifacts.
#[derive(Debug, Clone)]
pub enum JobStatus {
    Pending,
    Processing,
    Ready(Vec<AssetDescriptor>),
    Completed(Vec<StoredArtifact>),
    Error(PipelineError),
}

impl JobStatus {
    pub fn state(&self) -> JobState {
        match self {
            Self::Pending => JobState::Pending,
            Self::Processing => JobState::Processing,
            Self::Ready(_) => JobState::Ready,
            Self::Completed(_) => JobState::Completed,
            Self::Error(_) => JobState::Error,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.state().is_resolved()
    }
}

/// What the status surface should do with a ready job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusAction {
    /// Report readiness only; never fetch bytes.
    #[default]
    Poll,
    /// Materialize every asset and return servable URLs.
    Retrieve,
}
