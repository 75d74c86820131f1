//! Job record store.
//!
//! Components receive an `Arc<dyn JobStore>` instead of reaching for a
//! global. [`MemoryJobStore`] is the in-process implementation; every
//! state change goes through [`JobState::transition`] so records never
//! move backwards.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use atelier_core::asset::{AssetDescriptor, RemoteRef, StoredArtifact};
use atelier_core::error::CoreError;
use atelier_core::job::{JobHandle, JobKey, JobState};
use atelier_core::types::Timestamp;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;

/// Persistent view of one submitted job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub handle: JobHandle,
    pub state: JobState,
    pub images: Vec<AssetDescriptor>,
    pub artifacts: Vec<StoredArtifact>,
    pub error: Option<String>,
    /// Durable references by artifact name, possibly recorded before the
    /// artifacts themselves.
    pub replicated: BTreeMap<String, RemoteRef>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl JobRecord {
    fn new(handle: JobHandle) -> Self {
        let now = Utc::now();
        Self {
            handle,
            state: JobState::Pending,
            images: Vec::new(),
            artifacts: Vec::new(),
            error: None,
            replicated: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> JobKey {
        self.handle.key()
    }
}

/// A state change to apply to a record.
#[derive(Debug, Clone)]
pub enum JobUpdate {
    Processing,
    Ready(Vec<AssetDescriptor>),
    Completed(Vec<StoredArtifact>),
    Failed(String),
}

impl JobUpdate {
    fn state(&self) -> JobState {
        match self {
            Self::Processing => JobState::Processing,
            Self::Ready(_) => JobState::Ready,
            Self::Completed(_) => JobState::Completed,
            Self::Failed(_) => JobState::Error,
        }
    }
}

#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Insert a pending record. Inserting an existing key returns the
    /// existing record unchanged.
    async fn insert(&self, handle: JobHandle) -> Result<JobRecord, CoreError>;

    async fn get(&self, key: &JobKey) -> Result<Option<JobRecord>, CoreError>;

    /// All records, oldest first.
    async fn list(&self) -> Result<Vec<JobRecord>, CoreError>;

    /// Apply a state change, rejecting backward transitions with
    /// [`CoreError::Conflict`].
    async fn apply(&self, key: &JobKey, update: JobUpdate) -> Result<JobRecord, CoreError>;

    /// Record the durable reference of an already materialized artifact.
    async fn attach_remote_ref(
        &self,
        key: &JobKey,
        name: &str,
        remote_ref: RemoteRef,
    ) -> Result<(), CoreError>;
}

/// In-memory [`JobStore`].
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    records: RwLock<HashMap<JobKey, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(key: &JobKey) -> CoreError {
    CoreError::NotFound {
        entity: "Job",
        id: key.to_string(),
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, handle: JobHandle) -> Result<JobRecord, CoreError> {
        let mut records = self.records.write().await;
        let record = records
            .entry(handle.key())
            .or_insert_with(|| JobRecord::new(handle));
        Ok(record.clone())
    }

    async fn get(&self, key: &JobKey) -> Result<Option<JobRecord>, CoreError> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn list(&self) -> Result<Vec<JobRecord>, CoreError> {
        let mut all: Vec<JobRecord> = self.records.read().await.values().cloned().collect();
        all.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.key().cmp(&b.key()))
        });
        Ok(all)
    }

    async fn apply(&self, key: &JobKey, update: JobUpdate) -> Result<JobRecord, CoreError> {
        let mut records = self.records.write().await;
        let record = records.get_mut(key).ok_or_else(|| not_found(key))?;

        record.state = record.state.transition(update.state())?;
        match update {
            JobUpdate::Processing => {}
            JobUpdate::Ready(images) => record.images = images,
            JobUpdate::Completed(mut artifacts) => {
                for artifact in artifacts.iter_mut().filter(|a| a.remote_ref.is_none()) {
                    artifact.remote_ref = record.replicated.get(&artifact.name).cloned();
                }
                record.artifacts = artifacts;
            }
            JobUpdate::Failed(error) => record.error = Some(error),
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn attach_remote_ref(
        &self,
        key: &JobKey,
        name: &str,
        remote_ref: RemoteRef,
    ) -> Result<(), CoreError> {
        let mut records = self.records.write().await;
        let record = records.get_mut(key).ok_or_else(|| not_found(key))?;

        if let Some(artifact) = record.artifacts.iter_mut().find(|a| a.name == name) {
            artifact.remote_ref = Some(remote_ref.clone());
        }
        record.replicated.insert(name.to_string(), remote_ref);
        record.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use atelier_core::asset::{ArtifactSource, ImageMetadata};

    fn handle(job_id: &str) -> JobHandle {
        JobHandle {
            job_id: job_id.to_string(),
            backend_index: 0,
            endpoint: "http://a".into(),
            seed: 42,
        }
    }

    fn artifact(name: &str) -> StoredArtifact {
        StoredArtifact {
            url: format!("/local/{name}"),
            source: ArtifactSource::Local,
            name: name.to_string(),
            remote_ref: None,
            metadata: ImageMetadata::default(),
        }
    }

    #[tokio::test]
    async fn insert_is_idempotent() {
        let store = MemoryJobStore::new();
        store.insert(handle("j1")).await.unwrap();
        store
            .apply(&handle("j1").key(), JobUpdate::Processing)
            .await
            .unwrap();

        let again = store.insert(handle("j1")).await.unwrap();
        assert_eq!(again.state, JobState::Processing);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn backward_transition_is_conflict() {
        let store = MemoryJobStore::new();
        let key = handle("j1").key();
        store.insert(handle("j1")).await.unwrap();
        store
            .apply(&key, JobUpdate::Completed(vec![artifact("j1_a.webp")]))
            .await
            .unwrap();

        assert_matches!(
            store.apply(&key, JobUpdate::Ready(Vec::new())).await,
            Err(CoreError::Conflict(_))
        );
    }

    #[tokio::test]
    async fn unknown_key_is_not_found() {
        let store = MemoryJobStore::new();
        assert_matches!(
            store.apply(&handle("nope").key(), JobUpdate::Processing).await,
            Err(CoreError::NotFound { .. })
        );
    }

    #[tokio::test]
    async fn remote_ref_attaches_to_named_artifact() {
        let store = MemoryJobStore::new();
        let key = handle("j1").key();
        store.insert(handle("j1")).await.unwrap();
        store
            .apply(
                &key,
                JobUpdate::Completed(vec![artifact("j1_a.webp"), artifact("j1_b.webp")]),
            )
            .await
            .unwrap();

        store
            .attach_remote_ref(&key, "j1_b.webp", RemoteRef("j1_b.webp".into()))
            .await
            .unwrap();

        let record = store.get(&key).await.unwrap().unwrap();
        assert!(record.artifacts[0].remote_ref.is_none());
        assert_eq!(
            record.artifacts[1].remote_ref,
            Some(RemoteRef("j1_b.webp".into()))
        );
    }

    #[tokio::test]
    async fn remote_ref_recorded_before_completion_is_kept() {
        let store = MemoryJobStore::new();
        let key = handle("j1").key();
        store.insert(handle("j1")).await.unwrap();

        store
            .attach_remote_ref(&key, "j1_a.webp", RemoteRef("j1_a.webp".into()))
            .await
            .unwrap();
        let record = store
            .apply(&key, JobUpdate::Completed(vec![artifact("j1_a.webp")]))
            .await
            .unwrap();

        assert_eq!(
            record.artifacts[0].remote_ref,
            Some(RemoteRef("j1_a.webp".into()))
        );
    }
}
