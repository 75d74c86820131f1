//! Job dispatch and reconciliation.
//!
//! Data flows `JobRequest` → [`submission`] (one job per backend, in
//! parallel) → [`reconciler`] (timer-driven concurrent polling) → on
//! ready → [`materializer`] (fetch, local write, background
//! [`replication`] to the durable store). [`service::Pipeline`] wires
//! the pieces together for the HTTP layer.

pub mod error;
pub mod events;
pub mod materializer;
pub mod reconciler;
pub mod replication;
pub mod service;
pub mod status;
pub mod store;
pub mod submission;

pub use error::PipelineError;
pub use events::JobEvent;
pub use status::{JobStatus, StatusAction};
