//! Local artifact directory.
//!
//! Artifacts are written here synchronously during materialization and
//! served from here by name. Writes go to a hidden temp file first and
//! are renamed into place, so readers never observe partial files and
//! concurrent writers of different names never interfere.

use std::path::{Path, PathBuf};

use atelier_core::naming::validate_artifact_name;
use bytes::Bytes;
use tokio_util::io::ReaderStream;

use crate::durable::ByteStream;
use crate::error::StoreError;

/// A single fixed directory holding persisted artifacts.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    dir: PathBuf,
}

/// Write `bytes` to `dir/name` via a temp file and rename.
pub(crate) async fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf, StoreError> {
    tokio::fs::create_dir_all(dir).await?;

    let target = dir.join(name);
    let temp = dir.join(format!(".{name}.{}.tmp", uuid::Uuid::new_v4()));

    if let Err(e) = tokio::fs::write(&temp, bytes).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(&temp, &target).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e.into());
    }
    Ok(target)
}

/// Map a missing file to [`StoreError::NotFound`].
pub(crate) fn not_found_or_io(err: std::io::Error, name: &str) -> StoreError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StoreError::NotFound(name.to_string())
    } else {
        StoreError::Io(err)
    }
}

impl LocalArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolve a caller-supplied name to a path inside the directory.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, StoreError> {
        let name = validate_artifact_name(name)?;
        Ok(self.dir.join(name))
    }

    /// Persist `bytes` under `name`, replacing any previous file.
    pub async fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, StoreError> {
        let name = validate_artifact_name(name)?;
        write_atomic(&self.dir, name, bytes).await
    }

    /// Read a whole artifact into memory.
    pub async fn read(&self, name: &str) -> Result<Bytes, StoreError> {
        let path = self.path_for(name)?;
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| not_found_or_io(e, name))?;
        Ok(Bytes::from(data))
    }

    /// Open an artifact as a byte stream.
    pub async fn open(&self, name: &str) -> Result<ByteStream, StoreError> {
        let path = self.path_for(name)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| not_found_or_io(e, name))?;
        Ok(Box::pin(ReaderStream::new(file)))
    }

    pub async fn exists(&self, name: &str) -> Result<bool, StoreError> {
        let path = self.path_for(name)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }
}
