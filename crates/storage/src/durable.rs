//! Durable store adapter trait.
//!
//! A durable store keeps artifacts after the local directory is gone.
//! Objects are addressed by name inside one namespace; `put` skips the
//! upload when an object with the same name already exists and hands
//! back the existing reference.

use std::pin::Pin;

use async_trait::async_trait;
use atelier_core::asset::RemoteRef;
use atelier_core::hashing::sha256_hex;
use atelier_core::naming::validate_artifact_name;
use bytes::Bytes;
use futures::Stream;

use crate::error::StoreError;

/// A byte stream type used for reading object contents.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// An object found in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub remote_ref: RemoteRef,
    /// SHA-256 of the stored content, when the provider records it.
    pub sha256: Option<String>,
}

/// Trait for durable artifact stores.
#[async_trait]
pub trait DurableStore: Send + Sync + std::fmt::Debug + 'static {
    /// Return the provider type name (e.g. "s3", "fs").
    fn provider_type(&self) -> &str;

    /// Look up an object by name.
    async fn find(&self, name: &str) -> Result<Option<StoredObject>, StoreError>;

    /// Unconditionally store `bytes` under `name`.
    async fn upload(&self, bytes: Bytes, name: &str) -> Result<RemoteRef, StoreError>;

    /// Stream an object's bytes back.
    async fn get(&self, remote: &RemoteRef) -> Result<ByteStream, StoreError>;

    /// Store `bytes` under `name` unless an object with that name exists.
    ///
    /// Deduplication is by name, not content. A collision with different
    /// content is logged and still answered with the existing reference.
    /// If the existence check itself fails the upload proceeds.
    async fn put(&self, bytes: Bytes, name: &str) -> Result<RemoteRef, StoreError> {
        validate_artifact_name(name)?;

        match self.find(name).await {
            Ok(Some(existing)) => {
                if let Some(stored_hash) = &existing.sha256 {
                    let new_hash = sha256_hex(&bytes);
                    if *stored_hash != new_hash {
                        tracing::warn!(
                            name,
                            stored_hash = %stored_hash,
                            new_hash = %new_hash,
                            "Object name already exists with different content, keeping existing",
                        );
                    }
                }
                tracing::debug!(
                    name,
                    provider = self.provider_type(),
                    "Object already exists, returning existing reference",
                );
                return Ok(existing.remote_ref);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(name, error = %e, "Failed to check for existing object");
            }
        }

        self.upload(bytes, name).await
    }
}
