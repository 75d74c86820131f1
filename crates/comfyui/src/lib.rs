//! ComfyUI render backend client library.
//!
//! Provides the HTTP API wrapper, the static backend registry, the job
//! graph template, typed history parsing, and the exponential backoff
//! helper used when a backend stops answering.

pub mod api;
pub mod backoff;
pub mod history;
pub mod registry;
pub mod workflow;
