//! # arbor-core
//!
//! The hierarchical node graph engine for Arbor - THE ENGINE.
//!
//! Nodes live in stores, are addressed by `(store, uuid)`, carry a type, a
//! set of aspects and a property map, and are linked by child associations
//! (exactly one primary parent per non-root node) and peer associations.
//! Deleting a node cascades over its primary children and either archives
//! the hierarchy into the store's archive store or marks it deleted for the
//! cleanup workers to purge later.
//!
//! ## Layout
//!
//! - [`graph`]: committed rows, indexes and the copy-on-write working graph
//! - [`walker`]: hierarchy snapshots taken before a cascade
//! - [`service`]: the mutation engine, as methods on [`Transaction`]
//! - [`txn`]: repositories, optimistic transactions and retry
//! - [`cleanup`]: deleted-node and unused-transaction purge
//! - [`timestamps`]: parent modification-time propagation
//! - [`model`], [`permissions`], [`policy`], [`lock`], [`clock`]: the
//!   collaborators the engine consults, with in-memory implementations
//!
//! ## Architectural Constraints
//!
//! - No async, no network dependencies (pure Rust)
//! - Every type-driven behaviour goes through [`model::Dictionary`]
//! - Listings are deterministic: everything iterated is a `BTreeMap`

// =============================================================================
// MODULES
// =============================================================================

pub mod cleanup;
pub mod clock;
pub mod config;
pub mod formats;
pub mod graph;
pub mod lock;
pub mod model;
pub mod permissions;
pub mod policy;
pub mod primitives;
pub mod service;
pub mod storage;
pub mod timestamps;
pub mod txn;
pub mod types;
pub mod walker;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    AclId, ArborError, AssocId, ChildAssoc, ChildAssocRef, NodeId, NodeRecord, NodeRef,
    NodeStatus, PeerAssoc, PeerAssocId, PeerAssocRef, PropertyMap, PropertyValue, QName,
    StoreId, StoreRecord, StoreRef, TxnId, TxnRecord,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use cleanup::{DeletedNodeCleanup, NodePurgeSummary, TxnPurgeSummary, UnusedTransactionCleanup};
pub use config::ArborConfig;
pub use graph::associations::AssocFilter;
pub use graph::{GraphRows, GraphState};
pub use service::NodePath;
pub use txn::{
    CommitOutcome, Repository, RepositoryBuilder, RepositoryStats, RetryingTransactionHelper,
    Transaction,
};
pub use walker::{NodeHierarchy, walk_hierarchy};

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{SnapshotHeader, rows_from_bytes, rows_to_bytes, snapshot_checksum};
