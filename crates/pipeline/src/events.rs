//! Job lifecycle events.
//!
//! Emitted by the reconciler and the replication pool on a
//! [`tokio::sync::broadcast`] channel. Call
//! [`Reconciler::subscribe`](crate::reconciler::Reconciler::subscribe)
//! to receive them.

use atelier_core::asset::{AssetDescriptor, RemoteRef, StoredArtifact};
use atelier_core::job::JobKey;
use serde::Serialize;

/// Broadcast channel capacity for job events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// A handle entered the outstanding set.
    Tracked { key: JobKey },

    /// The backend has started on the job.
    Processing { key: JobKey },

    /// The job produced assets and left the polling set.
    Ready {
        key: JobKey,
        images: Vec<AssetDescriptor>,
    },

    /// The job was retrieved before the reconciler saw it ready.
    Completed {
        key: JobKey,
        artifacts: Vec<StoredArtifact>,
    },

    /// The job failed and left the polling set.
    Failed { key: JobKey, error: String },

    /// The handle was removed before it resolved.
    Cancelled { key: JobKey },

    /// An artifact reached the durable store.
    Replicated {
        key: Option<JobKey>,
        name: String,
        remote_ref: RemoteRef,
    },

    /// An artifact could not be replicated after all retries.
    ReplicationFailed {
        key: Option<JobKey>,
        name: String,
        error: String,
    },
}
