//! Domain types shared by every atelier crate.
//!
//! Pure data and validation only: job requests, handles, states, asset
//! descriptors, stored artifacts, naming rules and hashing. Nothing in
//! this crate performs I/O.

pub mod asset;
pub mod error;
pub mod hashing;
pub mod job;
pub mod naming;
pub mod types;
