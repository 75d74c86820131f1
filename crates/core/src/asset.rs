//! Asset descriptors, generation metadata and stored artifacts.

use serde::{Deserialize, Serialize};

/// Generation parameters echoed back by a backend for a finished job.
///
/// Fields the backend did not report stay at their zero value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub prompt: String,
    pub negative_prompt: String,
    pub seed: u64,
    pub steps: u32,
    pub cfg: f64,
    pub width: u32,
    pub height: u32,
}

/// Backend-relative coordinates of one produced file plus its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_asset_kind")]
    pub kind: String,
    pub metadata: ImageMetadata,
}

fn default_asset_kind() -> String {
    "output".to_string()
}

/// Opaque reference to an object in the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteRef(pub String);

impl RemoteRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RemoteRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the URL of a [`StoredArtifact`] points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactSource {
    /// Served from the local artifact directory.
    Local,
    /// Direct link to the originating backend (degraded path).
    Backend,
}

/// Result of materializing one asset.
///
/// `url` is usable immediately. `remote_ref` is filled in later, once
/// background replication to the durable store succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredArtifact {
    pub url: String,
    pub source: ArtifactSource,
    /// Unique name in the local directory (and the durable store).
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_ref: Option<RemoteRef>,
    pub metadata: ImageMetadata,
}
