//! # Core Type Definitions
//!
//! This module contains all core types for the Arbor node graph:
//! - Internal identifiers (`NodeId`, `AssocId`, `PeerAssocId`, `TxnId`, `StoreId`, `AclId`)
//! - Stable external references (`StoreRef`, `NodeRef`, `QName`)
//! - Persisted rows (`NodeRecord`, `ChildAssoc`, `PeerAssoc`, `StoreRecord`, `TxnRecord`)
//! - Reference views handed to callers (`ChildAssocRef`, `PeerAssocRef`, `NodeStatus`)
//! - Property values (`PropertyValue`) and errors (`ArborError`)
//!
//! ## Determinism Guarantees
//!
//! All identifier and row types implement `Ord` so they can key `BTreeMap`/`BTreeSet`
//! and every listing the engine returns has a stable order.

mod error;
mod value;

pub use error::ArborError;
pub use value::PropertyValue;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Property map keyed by qualified property name.
pub type PropertyMap = BTreeMap<QName, PropertyValue>;

// =============================================================================
// INTERNAL IDENTIFIERS
// =============================================================================

/// Internal node identifier. Dense, monotonic, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

/// Identifier of a parent/child association row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssocId(pub u64);

/// Identifier of a peer association row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerAssocId(pub u64);

/// Identifier of a committed write transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxnId(pub u64);

/// Internal store identifier. A store keeps its id when it is renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StoreId(pub u64);

/// Reference to an access control list shared down a hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AclId(pub u64);

// =============================================================================
// QUALIFIED NAMES
// =============================================================================

/// A schema-qualified name in prefix form, e.g. `cm:name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QName {
    prefix: String,
    local: String,
}

impl QName {
    /// Create a qualified name from a namespace prefix and a local name.
    #[must_use]
    pub fn new(prefix: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            local: local.into(),
        }
    }

    /// Namespace prefix (`cm` in `cm:name`).
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Local part (`name` in `cm:name`).
    #[must_use]
    pub fn local_name(&self) -> &str {
        &self.local
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.prefix, self.local)
    }
}

impl FromStr for QName {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((prefix, local)) if !prefix.is_empty() && !local.is_empty() => {
                Ok(Self::new(prefix, local))
            }
            _ => Err(ArborError::InvalidArgument(format!(
                "qualified name must look like 'prefix:local': {s}"
            ))),
        }
    }
}

impl TryFrom<String> for QName {
    type Error = ArborError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<QName> for String {
    fn from(value: QName) -> Self {
        value.to_string()
    }
}

// =============================================================================
// STABLE REFERENCES
// =============================================================================

/// Stable reference to a store: `protocol://identifier`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoreRef {
    pub protocol: String,
    pub identifier: String,
}

impl StoreRef {
    /// Protocol that stores are renamed into when they are deleted.
    pub const PROTOCOL_DELETED: &'static str = "deleted";

    /// Create a store reference.
    #[must_use]
    pub fn new(protocol: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            identifier: identifier.into(),
        }
    }
}

impl fmt::Display for StoreRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.identifier)
    }
}

impl FromStr for StoreRef {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once("://") {
            Some((protocol, identifier)) if !protocol.is_empty() && !identifier.is_empty() => {
                Ok(Self::new(protocol, identifier))
            }
            _ => Err(ArborError::InvalidArgument(format!(
                "store reference must look like 'protocol://identifier': {s}"
            ))),
        }
    }
}

impl TryFrom<String> for StoreRef {
    type Error = ArborError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StoreRef> for String {
    fn from(value: StoreRef) -> Self {
        value.to_string()
    }
}

/// Stable reference to a node: store plus UUID.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub store: StoreRef,
    pub uuid: String,
}

impl NodeRef {
    /// Create a node reference.
    #[must_use]
    pub fn new(store: StoreRef, uuid: impl Into<String>) -> Self {
        Self {
            store,
            uuid: uuid.into(),
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.store, self.uuid)
    }
}

impl FromStr for NodeRef {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (store, uuid) = s.rsplit_once('/').ok_or_else(|| {
            ArborError::InvalidArgument(format!("node reference must end in '/uuid': {s}"))
        })?;
        if uuid.is_empty() {
            return Err(ArborError::InvalidArgument(format!(
                "node reference has an empty uuid: {s}"
            )));
        }
        Ok(Self::new(store.parse()?, uuid))
    }
}

/// Caller-facing view of a parent/child association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildAssocRef {
    pub id: AssocId,
    pub assoc_type: QName,
    pub parent: NodeRef,
    pub qname: QName,
    pub child: NodeRef,
    pub is_primary: bool,
    pub index: i32,
}

/// Caller-facing view of a peer association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAssocRef {
    pub id: PeerAssocId,
    pub source: NodeRef,
    pub target: NodeRef,
    pub assoc_type: QName,
    pub index: i32,
}

/// Status of a node row, available for deleted rows as well.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub node_ref: NodeRef,
    pub node_id: NodeId,
    pub txn_id: TxnId,
    pub deleted: bool,
}

// =============================================================================
// PERSISTED ROWS
// =============================================================================

/// A node row.
///
/// Deleted nodes keep their row (with `deleted = true`, no aspects and no
/// properties) until the deleted-node purge removes it; the row keeps the
/// UUID occupied inside its store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub store: StoreId,
    pub uuid: String,
    pub type_qname: QName,
    pub aspects: BTreeSet<QName>,
    pub properties: PropertyMap,
    pub acl: Option<AclId>,
    pub txn: TxnId,
    pub deleted: bool,
}

/// A parent/child association row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildAssoc {
    pub id: AssocId,
    pub parent: NodeId,
    pub child: NodeId,
    pub assoc_type: QName,
    pub qname: QName,
    pub index: i32,
    pub is_primary: bool,
    /// Effective child name (the `cm:name` value or the child's UUID).
    pub child_name: String,
    /// Lower-cased name when the association type enforces unique names.
    pub unique_name: Option<String>,
    /// Hash of the lower-cased name, used as a cheap pre-check.
    pub child_name_crc: u64,
}

/// A peer association row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAssoc {
    pub id: PeerAssocId,
    pub source: NodeId,
    pub target: NodeId,
    pub assoc_type: QName,
    pub index: i32,
}

/// A store row. Stores are renamed, never removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreRecord {
    pub id: StoreId,
    pub store_ref: StoreRef,
    pub root: NodeId,
}

/// A committed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnRecord {
    pub id: TxnId,
    /// Commit time in milliseconds since the Unix epoch.
    pub commit_time_ms: i64,
}

// =============================================================================
// TESTS
// =============================================================================
