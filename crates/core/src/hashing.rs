//! SHA-256 hex digest of artifact bytes.
//!
//! Stored alongside replicated objects so a name collision with
//! different content can be detected and reported.

use sha2::{Digest, Sha256};

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}
