//! # Snapshot Format
//!
//! Binary serialization of a full repository row set.
//!
//! File I/O happens in the app layer; this module only transforms bytes.
//!
//! Format: Header (5 bytes) + postcard-serialized [`GraphRows`].
//! - 4 bytes: Magic ("ARBR")
//! - 1 byte: Version
//!
//! Size and header are validated before the payload is decoded.

use crate::graph::GraphRows;
use crate::primitives::{FORMAT_VERSION, MAGIC_BYTES, MAX_SNAPSHOT_BYTES};
use crate::ArborError;

const HEADER_LEN: usize = 5;

/// The header that precedes every snapshot payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl SnapshotHeader {
    /// Header for the current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *MAGIC_BYTES,
            version: FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<(), ArborError> {
        if &self.magic != MAGIC_BYTES {
            return Err(ArborError::Serialization(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != FORMAT_VERSION {
            return Err(ArborError::Serialization(format!(
                "Unsupported version: {} (expected {})",
                self.version, FORMAT_VERSION
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ArborError> {
        if bytes.len() < HEADER_LEN {
            return Err(ArborError::Serialization("Header too short".to_string()));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        Ok(Self {
            magic,
            version: bytes[4],
        })
    }
}

impl Default for SnapshotHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize a row set (header + payload).
pub fn rows_to_bytes(rows: &GraphRows) -> Result<Vec<u8>, ArborError> {
    let payload = postcard::to_stdvec(rows).map_err(ArborError::serialization)?;
    let mut result = Vec::with_capacity(HEADER_LEN.saturating_add(payload.len()));
    result.extend_from_slice(&SnapshotHeader::new().to_bytes());
    result.extend_from_slice(&payload);
    Ok(result)
}

/// Deserialize a row set, validating size and header first.
pub fn rows_from_bytes(bytes: &[u8]) -> Result<GraphRows, ArborError> {
    if bytes.len() < HEADER_LEN {
        return Err(ArborError::Serialization(format!(
            "Data too short: minimum {} bytes required",
            HEADER_LEN
        )));
    }
    if bytes.len() > MAX_SNAPSHOT_BYTES {
        return Err(ArborError::Serialization(format!(
            "Data size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_SNAPSHOT_BYTES
        )));
    }
    SnapshotHeader::from_bytes(bytes)?.validate()?;
    postcard::from_bytes(&bytes[HEADER_LEN..]).map_err(|e| {
        ArborError::Serialization(format!("Failed to deserialize snapshot: {}", e))
    })
}

/// BLAKE3 hex digest of a serialized snapshot.
#[must_use]
pub fn snapshot_checksum(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}
