//! Request handlers.
//!
//! Each submodule serves one surface and delegates to the pipeline or the
//! stores held in [`AppState`](crate::state::AppState).

pub mod artifacts;
pub mod generate;
pub mod jobs;
pub mod status;
