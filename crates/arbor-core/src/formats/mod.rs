//! # Formats
//!
//! Byte-level encodings of the repository that leave the engine: the
//! snapshot format used by export and import.

pub mod snapshot;

pub use snapshot::{SnapshotHeader, rows_from_bytes, rows_to_bytes, snapshot_checksum};
