//! Artifact materialization.
//!
//! Turns a ready asset into something servable: fetch the bytes from the
//! owning backend, persist them in the local directory under a unique
//! name, hand the same bytes to the replication queue, and return the
//! local URL. A fetch or write failure degrades to a direct backend URL
//! instead of failing the request.
//!
//! An asset already present in the local directory is served from there
//! without contacting the backend. The in-memory map only holds assets
//! being materialized right now, so concurrent callers share one fetch and
//! the map stays empty between requests.

use std::collections::HashMap;
use std::sync::Arc;

use atelier_comfyui::api::ComfyUIApi;
use atelier_comfyui::registry::BackendRegistry;
use atelier_core::asset::{ArtifactSource, AssetDescriptor, StoredArtifact};
use atelier_core::job::JobHandle;
use atelier_core::naming::{local_url, unique_artifact_name};
use atelier_storage::local::LocalArtifactStore;
use futures::future::join_all;
use tokio::sync::{Mutex, OnceCell};

use crate::error::PipelineError;
use crate::replication::{ReplicationQueue, ReplicationTask};

pub struct Materializer {
    registry: Arc<BackendRegistry>,
    local: LocalArtifactStore,
    replication: ReplicationQueue,
    /// One cell per artifact name currently being materialized.
    in_flight: Mutex<HashMap<String, Arc<OnceCell<StoredArtifact>>>>,
}

impl Materializer {
    pub fn new(
        registry: Arc<BackendRegistry>,
        local: LocalArtifactStore,
        replication: ReplicationQueue,
    ) -> Self {
        Self {
            registry,
            local,
            replication,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn local(&self) -> &LocalArtifactStore {
        &self.local
    }

    /// Materialize one asset of `handle`.
    ///
    /// Concurrent calls for the same asset share one fetch and one write.
    /// Only an unknown backend index is an error.
    pub async fn materialize(
        &self,
        handle: &JobHandle,
        asset: &AssetDescriptor,
    ) -> Result<StoredArtifact, PipelineError> {
        let api = self
            .registry
            .api_at(handle.backend_index)
            .ok_or(PipelineError::UnknownBackend(handle.backend_index))?;

        let name = unique_artifact_name(&handle.job_id, &asset.filename);
        if self.local.exists(&name).await.unwrap_or(false) {
            return Ok(local_artifact(&name, asset));
        }

        let cell = {
            let mut in_flight = self.in_flight.lock().await;
            Arc::clone(in_flight.entry(name.clone()).or_default())
        };

        let persisted = cell
            .get_or_try_init(|| self.persist(&api, handle, asset, &name))
            .await
            .cloned();
        self.release(&name, &cell).await;

        match persisted {
            Ok(artifact) => Ok(artifact),
            Err(e) => {
                tracing::warn!(
                    job_id = %handle.job_id,
                    backend_index = handle.backend_index,
                    name = %name,
                    error = %e,
                    "Serving asset directly from backend",
                );
                Ok(StoredArtifact {
                    url: api.view_url(&asset.filename, &asset.subfolder, &asset.kind),
                    source: ArtifactSource::Backend,
                    name,
                    remote_ref: None,
                    metadata: asset.metadata.clone(),
                })
            }
        }
    }

    /// Materialize every asset of `handle` concurrently, keeping order.
    pub async fn materialize_all(
        &self,
        handle: &JobHandle,
        assets: &[AssetDescriptor],
    ) -> Result<Vec<StoredArtifact>, PipelineError> {
        join_all(assets.iter().map(|asset| self.materialize(handle, asset)))
            .await
            .into_iter()
            .collect()
    }

    async fn persist(
        &self,
        api: &ComfyUIApi,
        handle: &JobHandle,
        asset: &AssetDescriptor,
        name: &str,
    ) -> Result<StoredArtifact, PipelineError> {
        let bytes = api
            .fetch_asset(&asset.filename, &asset.subfolder, &asset.kind)
            .await
            .map_err(|e| PipelineError::AssetFetchFailure {
                filename: asset.filename.clone(),
                reason: e.to_string(),
            })?;

        self.local
            .write(name, &bytes)
            .await
            .map_err(|e| PipelineError::LocalPersistFailure {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        tracing::info!(
            job_id = %handle.job_id,
            backend_index = handle.backend_index,
            name,
            size = bytes.len(),
            "Artifact persisted locally",
        );

        self.replication.enqueue(ReplicationTask {
            key: Some(handle.key()),
            name: name.to_string(),
            bytes,
        });

        Ok(local_artifact(name, asset))
    }

    /// Drop the in-flight entry for `name` if it is still `cell`.
    async fn release(&self, name: &str, cell: &Arc<OnceCell<StoredArtifact>>) {
        let mut in_flight = self.in_flight.lock().await;
        if in_flight.get(name).is_some_and(|current| Arc::ptr_eq(current, cell)) {
            in_flight.remove(name);
        }
    }
}

fn local_artifact(name: &str, asset: &AssetDescriptor) -> StoredArtifact {
    StoredArtifact {
        url: local_url(name),
        source: ArtifactSource::Local,
        name: name.to_string(),
        remote_ref: None,
        metadata: asset.metadata.clone(),
    }
}
