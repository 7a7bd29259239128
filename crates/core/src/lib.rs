//! Shared presence vocabulary: location descriptors, key naming and timing
//! defaults.
//!
//! This crate has no I/O. The store, event and presence crates all build on
//! the same [`Location`] canonical form so that keys derived in one process
//! are found by scans in every other.

pub mod error;
pub mod keys;
pub mod location;
pub mod timing;
pub mod types;

pub use error::CoreError;
pub use location::{Location, LocationValue};
