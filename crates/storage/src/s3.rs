//! S3-compatible durable store.
//!
//! Objects live under `{prefix}/{name}` in a single bucket. The remote
//! reference is the bare name, so references never contain `/` and can
//! be embedded in a URL path segment. The SHA-256 of each upload is kept
//! as object metadata to detect same-name collisions.

use async_trait::async_trait;
use atelier_core::asset::RemoteRef;
use atelier_core::hashing::sha256_hex;
use atelier_core::naming::{content_type_for, validate_artifact_name};
use aws_sdk_s3::error::DisplayErrorContext;
use bytes::Bytes;
use tokio_util::io::ReaderStream;

use crate::durable::{ByteStream, DurableStore, StoredObject};
use crate::error::StoreError;

/// Object metadata key holding the content digest.
const SHA256_METADATA_KEY: &str = "sha256";

#[derive(Debug, Clone)]
pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl S3Store {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into().trim_matches('/').to_string(),
        }
    }

    /// Build a client from the standard AWS environment (credentials,
    /// region, optional custom endpoint).
    pub async fn from_env(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(aws_sdk_s3::Client::new(&config), bucket, prefix)
    }

    fn key(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.prefix, name)
        }
    }
}

#[async_trait]
impl DurableStore for S3Store {
    fn provider_type(&self) -> &str {
        "s3"
    }

    async fn find(&self, name: &str) -> Result<Option<StoredObject>, StoreError> {
        let name = validate_artifact_name(name)?;
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.key(name))
            .send()
            .await;

        match result {
            Ok(output) => Ok(Some(StoredObject {
                remote_ref: RemoteRef(name.to_string()),
                sha256: output
                    .metadata()
                    .and_then(|m| m.get(SHA256_METADATA_KEY))
                    .cloned(),
            })),
            Err(err) => {
                if err.as_service_error().is_some_and(|e| e.is_not_found()) {
                    Ok(None)
                } else {
                    Err(StoreError::Backend(format!("{}", DisplayErrorContext(&err))))
                }
            }
        }
    }

    async fn upload(&self, bytes: Bytes, name: &str) -> Result<RemoteRef, StoreError> {
        let name = validate_artifact_name(name)?;
        let size = bytes.len();
        let digest = sha256_hex(&bytes);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(name))
            .content_type(content_type_for(name))
            .metadata(SHA256_METADATA_KEY, digest)
            .body(aws_sdk_s3::primitives::ByteStream::from(bytes))
            .send()
            .await
            .map_err(|err| StoreError::Backend(format!("{}", DisplayErrorContext(&err))))?;

        tracing::debug!(bucket = %self.bucket, name, size, "Uploaded object to S3");
        Ok(RemoteRef(name.to_string()))
    }

    async fn get(&self, remote: &RemoteRef) -> Result<ByteStream, StoreError> {
        let name = validate_artifact_name(remote.as_str())?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.key(name))
            .send()
            .await
            .map_err(|err| {
                if err.as_service_error().is_some_and(|e| e.is_no_such_key()) {
                    StoreError::NotFound(name.to_string())
                } else {
                    StoreError::Backend(format!("{}", DisplayErrorContext(&err)))
                }
            })?;

        Ok(Box::pin(ReaderStream::new(output.body.into_async_read())))
    }
}
