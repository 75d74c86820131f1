//! Generation requests, job handles and the job state machine.
//!
//! A [`JobRequest`] arrives from the submission surface with optional
//! fields. [`JobRequest::resolve`] fills in defaults and draws the base
//! seed exactly once, producing [`JobParams`]. Each backend then receives
//! `seed + backend_index` so parallel renders differ.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;
use crate::types::BackendIndex;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Sampler steps used when the request does not specify any.
pub const DEFAULT_STEPS: u32 = 20;

/// Classifier-free guidance scale used when the request does not specify one.
pub const DEFAULT_CFG: f64 = 7.0;

/// Default latent width in pixels.
pub const DEFAULT_WIDTH: u32 = 832;

/// Default latent height in pixels.
pub const DEFAULT_HEIGHT: u32 = 1216;

/// Negative prompt applied when the request leaves it empty.
pub const DEFAULT_NEGATIVE_PROMPT: &str = "low quality, bad anatomy, worst quality";

/// Upper bound (exclusive) for randomly drawn seeds.
pub const MAX_RANDOM_SEED: u64 = 1_000_000_000;

// ---------------------------------------------------------------------------
// JobRequest
// ---------------------------------------------------------------------------

/// Generation parameters as submitted by a caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct JobRequest {
    #[validate(length(min = 1, max = 4000))]
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[validate(range(min = 64, max = 4096))]
    #[serde(default)]
    pub width: Option<u32>,
    #[validate(range(min = 64, max = 4096))]
    #[serde(default)]
    pub height: Option<u32>,
    #[validate(range(min = 1, max = 150))]
    #[serde(default)]
    pub steps: Option<u32>,
    #[validate(range(min = 0.0, max = 30.0))]
    #[serde(default)]
    pub cfg: Option<f64>,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl JobRequest {
    /// Run field validation, mapping failures into [`CoreError::Validation`].
    pub fn check(&self) -> Result<(), CoreError> {
        if self.prompt.trim().is_empty() {
            return Err(CoreError::Validation("prompt must not be blank".into()));
        }
        self.validate()?;
        Ok(())
    }

    /// Fill in defaults and draw the base seed if none was given.
    pub fn resolve(self) -> JobParams {
        let seed = self
            .seed
            .unwrap_or_else(|| rand::rng().random_range(0..MAX_RANDOM_SEED));

        let negative_prompt = match self.negative_prompt {
            Some(text) if !text.trim().is_empty() => text,
            _ => DEFAULT_NEGATIVE_PROMPT.to_string(),
        };

        JobParams {
            prompt: self.prompt,
            negative_prompt,
            width: self.width.unwrap_or(DEFAULT_WIDTH),
            height: self.height.unwrap_or(DEFAULT_HEIGHT),
            steps: self.steps.unwrap_or(DEFAULT_STEPS),
            cfg: self.cfg.unwrap_or(DEFAULT_CFG),
            seed,
        }
    }
}

/// Fully resolved generation parameters. `seed` is the base seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParams {
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub cfg: f64,
    pub seed: u64,
}

impl JobParams {
    /// Seed submitted to the backend at `index`.
    pub fn seed_for(&self, index: BackendIndex) -> u64 {
        self.seed.wrapping_add(index as u64)
    }
}

// ---------------------------------------------------------------------------
// JobHandle
// ---------------------------------------------------------------------------

/// A backend-assigned job id paired with the backend that owns it.
///
/// Immutable once created by the submission step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHandle {
    pub job_id: String,
    pub backend_index: BackendIndex,
    pub endpoint: String,
    /// Seed actually submitted to this backend.
    pub seed: u64,
}

impl JobHandle {
    pub fn key(&self) -> JobKey {
        JobKey::new(self.backend_index, self.job_id.clone())
    }
}

/// Lookup key for a job: backend position plus backend job id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobKey {
    pub backend_index: BackendIndex,
    pub job_id: String,
}

impl JobKey {
    pub fn new(backend_index: BackendIndex, job_id: impl Into<String>) -> Self {
        Self {
            backend_index,
            job_id: job_id.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.backend_index, self.job_id)
    }
}

// ---------------------------------------------------------------------------
// JobState
// ---------------------------------------------------------------------------

/// Lifecycle state of a job.
///
/// `Processing` is a sub-state of pending: the backend knows the job but
/// has produced no output yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Ready,
    Completed,
    Error,
}

impl JobState {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Processing => 1,
            Self::Ready => 2,
            Self::Completed => 3,
            Self::Error => 4,
        }
    }

    /// Whether the job is still waiting on the backend.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    /// Whether the job has left the polling set for good.
    pub fn is_resolved(self) -> bool {
        !self.is_pending()
    }

    /// Transitions are monotonic. Self-transitions are allowed so repeated
    /// polls can be recorded idempotently.
    pub fn can_transition_to(self, next: JobState) -> bool {
        if self == next {
            return true;
        }
        match (self, next) {
            (Self::Completed | Self::Error, _) => false,
            (_, Self::Error) => true,
            _ => next.rank() > self.rank(),
        }
    }

    /// Validate a transition, returning [`CoreError::Conflict`] if it
    /// would move backwards.
    pub fn transition(self, next: JobState) -> Result<JobState, CoreError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::Conflict(format!(
                "Invalid job state transition {} -> {}",
                self.as_str(),
                next.as_str()
            )))
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}
