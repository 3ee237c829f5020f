//! # Engine Primitives
//!
//! Hardcoded runtime constants for the Arbor engine.
//!
//! Tunables that operators change live in [`crate::config`]; the values here
//! are structural bounds and format constants that never change at runtime.

/// Magic bytes for the Arbor snapshot format header.
///
/// - File Header = Magic Bytes ("ARBR") + Version (u8) before payload.
pub const MAGIC_BYTES: &[u8; 4] = b"ARBR";

/// Current snapshot format version.
///
/// Increment this when making breaking changes to the snapshot format.
pub const FORMAT_VERSION: u8 = 1;

/// Default sibling index for new child associations.
///
/// Children with equal indexes are ordered by association id, so an
/// unindexed child lands after all explicitly indexed siblings with index -1.
pub const DEFAULT_CHILD_INDEX: i32 = -1;

/// Maximum length of a node UUID supplied by a caller.
pub const MAX_UUID_LENGTH: usize = 50;

/// Maximum number of parent hops followed by ancestor checks and path walks.
///
/// Bounds every upward traversal even if stored data were corrupt.
pub const MAX_HIERARCHY_DEPTH: usize = 10_000;

/// Maximum snapshot payload accepted by the importer (512 MiB).
pub const MAX_SNAPSHOT_BYTES: usize = 512 * 1024 * 1024;

/// Number of recent commit write-sets kept for conflict detection.
///
/// A transaction that started before the oldest retained commit cannot be
/// validated and fails with a concurrency conflict.
pub const COMMIT_LOG_CAPACITY: usize = 4096;

/// User recorded on changes made without an explicit user.
pub const SYSTEM_USER: &str = "system";

/// Lock key used by the deleted-node purge worker.
pub const NODE_PURGE_LOCK: &str = "arbor.cleanup.deleted-nodes";

/// Lock key used by the empty-transaction purge worker.
pub const TXN_PURGE_LOCK: &str = "arbor.cleanup.unused-transactions";
