//! Artifact naming and served-path rules.
//!
//! Every persisted artifact is named `{job_id}_{filename}`, which is
//! unique across backends because backend job ids are UUIDs. Names
//! received from HTTP callers are checked with [`validate_artifact_name`]
//! before touching the filesystem or the durable store.

use crate::error::CoreError;

/// Route prefix under which locally persisted artifacts are served.
pub const LOCAL_ROUTE_PREFIX: &str = "/local";

/// Route prefix under which durable store objects are served.
pub const REMOTE_ROUTE_PREFIX: &str = "/remote";

/// Maximum accepted length of an artifact name.
const MAX_NAME_LEN: usize = 255;

/// Strip any directory components a backend may have put into a filename.
fn base_name(filename: &str) -> &str {
    filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
}

/// Build the globally unique artifact name for a job's output file.
pub fn unique_artifact_name(job_id: &str, filename: &str) -> String {
    format!("{job_id}_{}", base_name(filename))
}

/// Reject names that could escape the artifact directory.
///
/// Rules:
/// - Must not be empty or longer than 255 bytes.
/// - Must not contain `/`, `\` or NUL.
/// - Must not be `.` or `..` or start with `.`.
pub fn validate_artifact_name(name: &str) -> Result<&str, CoreError> {
    if name.is_empty() {
        return Err(CoreError::Validation("Artifact name is required".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "Artifact name exceeds {MAX_NAME_LEN} bytes"
        )));
    }
    if name.contains(['/', '\\', '\0']) || name.starts_with('.') {
        return Err(CoreError::Validation(format!(
            "Artifact name '{name}' contains a path component"
        )));
    }
    Ok(name)
}

/// MIME type served for an artifact, chosen by extension.
pub fn content_type_for(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "image/webp",
    }
}

/// URL under which a locally persisted artifact is served.
pub fn local_url(name: &str) -> String {
    format!("{LOCAL_ROUTE_PREFIX}/{name}")
}

/// URL under which a durable store object is served.
pub fn remote_url(id: &str) -> String {
    format!("{REMOTE_ROUTE_PREFIX}/{id}")
}
