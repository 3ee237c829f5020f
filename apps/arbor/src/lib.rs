//! # arbor
//!
//! Library half of the Arbor binary: command implementations, the cleanup
//! daemon and settings loading, exposed for the integration tests.

pub mod cli;
pub mod daemon;
pub mod settings;
