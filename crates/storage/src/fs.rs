//! Filesystem-backed durable store.
//!
//! Used when no object storage bucket is configured, and in tests. The
//! remote reference of an object is its file name.

use std::path::PathBuf;

use async_trait::async_trait;
use atelier_core::asset::RemoteRef;
use atelier_core::naming::validate_artifact_name;
use bytes::Bytes;
use tokio_util::io::ReaderStream;

use crate::durable::{ByteStream, DurableStore, StoredObject};
use crate::error::StoreError;
use crate::local::{not_found_or_io, write_atomic};

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl DurableStore for FsStore {
    fn provider_type(&self) -> &str {
        "fs"
    }

    async fn find(&self, name: &str) -> Result<Option<StoredObject>, StoreError> {
        let name = validate_artifact_name(name)?;
        if tokio::fs::try_exists(self.root.join(name)).await? {
            Ok(Some(StoredObject {
                remote_ref: RemoteRef(name.to_string()),
                sha256: None,
            }))
        } else {
            Ok(None)
        }
    }

    async fn upload(&self, bytes: Bytes, name: &str) -> Result<RemoteRef, StoreError> {
        let name = validate_artifact_name(name)?;
        write_atomic(&self.root, name, &bytes).await?;
        tracing::debug!(name, size = bytes.len(), "Stored object on filesystem");
        Ok(RemoteRef(name.to_string()))
    }

    async fn get(&self, remote: &RemoteRef) -> Result<ByteStream, StoreError> {
        let name = validate_artifact_name(remote.as_str())?;
        let file = tokio::fs::File::open(self.root.join(name))
            .await
            .map_err(|e| not_found_or_io(e, name))?;
        Ok(Box::pin(ReaderStream::new(file)))
    }
}
