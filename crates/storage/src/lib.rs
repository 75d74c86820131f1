//! Artifact persistence: the local artifact directory and the durable
//! (remote) store adapter.
//!
//! [`durable::DurableStore`] is implemented by [`s3::S3Store`] for
//! production and by [`fs::FsStore`] when no bucket is configured.

pub mod durable;
pub mod error;
pub mod fs;
pub mod local;
pub mod s3;

pub use durable::{ByteStream, DurableStore, StoredObject};
pub use error::StoreError;
