//! # redb-backed Row Storage
//!
//! Write-through persistence for the node graph using the redb embedded
//! database:
//! - ACID write transactions, one per committed graph transaction
//! - crash safety (copy-on-write B-trees)
//! - rows encoded with postcard
//!
//! ## Layout
//!
//! | table           | key                   | value                          |
//! |-----------------|-----------------------|--------------------------------|
//! | `nodes`         | node id               | store, uuid, type, acl, txn    |
//! | `properties`    | (node id, qname)      | property value                 |
//! | `aspects`       | (node id, qname)      | -                              |
//! | `child_assocs`  | assoc id              | full association row           |
//! | `peer_assocs`   | peer assoc id         | full association row           |
//! | `stores`        | store id              | store row                      |
//! | `transactions`  | txn id                | commit time (ms)               |
//! | `metadata`      | counter name          | next id                        |
//!
//! The full row set is loaded at open; the engine serves reads from memory.

use crate::graph::{Counters, GraphRows, GraphState, RowKey};
use crate::{
    AclId, ArborError, NodeId, NodeRecord, PropertyValue, QName, StoreId, TxnId, TxnRecord,
};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;

/// Table for nodes: NodeId(u64) -> serialized `NodeRow`
const NODES: TableDefinition<u64, &[u8]> = TableDefinition::new("nodes");

/// Table for properties: (node_id, qname) -> serialized `PropertyValue`
const PROPERTIES: TableDefinition<(u64, &str), &[u8]> = TableDefinition::new("properties");

/// Table for aspect membership: (node_id, qname) -> ()
const ASPECTS: TableDefinition<(u64, &str), ()> = TableDefinition::new("aspects");

/// Table for child associations: AssocId(u64) -> serialized `ChildAssoc`
const CHILD_ASSOCS: TableDefinition<u64, &[u8]> = TableDefinition::new("child_assocs");

/// Table for peer associations: PeerAssocId(u64) -> serialized `PeerAssoc`
const PEER_ASSOCS: TableDefinition<u64, &[u8]> = TableDefinition::new("peer_assocs");

/// Table for stores: StoreId(u64) -> serialized `StoreRecord`
const STORES: TableDefinition<u64, &[u8]> = TableDefinition::new("stores");

/// Table for transactions: TxnId(u64) -> commit time in ms
const TRANSACTIONS: TableDefinition<u64, i64> = TableDefinition::new("transactions");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

/// The node columns that live in the `nodes` table.
#[derive(Debug, Serialize, Deserialize)]
struct NodeRow {
    store: StoreId,
    uuid: String,
    type_qname: QName,
    acl: Option<AclId>,
    txn: TxnId,
    deleted: bool,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ArborError> {
    postcard::to_allocvec(value).map_err(ArborError::serialization)
}

fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, ArborError> {
    postcard::from_bytes(bytes).map_err(ArborError::serialization)
}

/// A redb database holding one repository.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a repository database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ArborError> {
        let db = Database::create(path.as_ref()).map_err(ArborError::storage)?;

        // Initialize tables if they don't exist
        let write_txn = db.begin_write().map_err(ArborError::storage)?;
        {
            write_txn.open_table(NODES).map_err(ArborError::storage)?;
            write_txn.open_table(PROPERTIES).map_err(ArborError::storage)?;
            write_txn.open_table(ASPECTS).map_err(ArborError::storage)?;
            write_txn.open_table(CHILD_ASSOCS).map_err(ArborError::storage)?;
            write_txn.open_table(PEER_ASSOCS).map_err(ArborError::storage)?;
            write_txn.open_table(STORES).map_err(ArborError::storage)?;
            write_txn.open_table(TRANSACTIONS).map_err(ArborError::storage)?;
            write_txn.open_table(METADATA).map_err(ArborError::storage)?;
        }
        write_txn.commit().map_err(ArborError::storage)?;

        Ok(Self { db })
    }

    /// Load every row.
    pub fn load(&self) -> Result<GraphRows, ArborError> {
        let read_txn = self.db.begin_read().map_err(ArborError::storage)?;
        let mut rows = GraphRows::default();

        // Properties and aspects first, grouped by node.
        let mut properties: BTreeMap<u64, BTreeMap<QName, PropertyValue>> = BTreeMap::new();
        {
            let table = read_txn.open_table(PROPERTIES).map_err(ArborError::storage)?;
            for entry in table.iter().map_err(ArborError::storage)? {
                let (key, value) = entry.map_err(ArborError::storage)?;
                let (node, name) = key.value();
                let name: QName = name.parse()?;
                let value: PropertyValue = decode(value.value())?;
                properties.entry(node).or_default().insert(name, value);
            }
        }
        let mut aspects: BTreeMap<u64, BTreeSet<QName>> = BTreeMap::new();
        {
            let table = read_txn.open_table(ASPECTS).map_err(ArborError::storage)?;
            for entry in table.iter().map_err(ArborError::storage)? {
                let (key, _) = entry.map_err(ArborError::storage)?;
                let (node, name) = key.value();
                aspects.entry(node).or_default().insert(name.parse()?);
            }
        }
        {
            let table = read_txn.open_table(NODES).map_err(ArborError::storage)?;
            for entry in table.iter().map_err(ArborError::storage)? {
                let (key, value) = entry.map_err(ArborError::storage)?;
                let id = key.value();
                let row: NodeRow = decode(value.value())?;
                rows.nodes.push(NodeRecord {
                    id: NodeId(id),
                    store: row.store,
                    uuid: row.uuid,
                    type_qname: row.type_qname,
                    aspects: aspects.remove(&id).unwrap_or_default(),
                    properties: properties.remove(&id).unwrap_or_default(),
                    acl: row.acl,
                    txn: row.txn,
                    deleted: row.deleted,
                });
            }
        }
        {
            let table = read_txn.open_table(CHILD_ASSOCS).map_err(ArborError::storage)?;
            for entry in table.iter().map_err(ArborError::storage)? {
                let (_, value) = entry.map_err(ArborError::storage)?;
                rows.child_assocs.push(decode(value.value())?);
            }
        }
        {
            let table = read_txn.open_table(PEER_ASSOCS).map_err(ArborError::storage)?;
            for entry in table.iter().map_err(ArborError::storage)? {
                let (_, value) = entry.map_err(ArborError::storage)?;
                rows.peer_assocs.push(decode(value.value())?);
            }
        }
        {
            let table = read_txn.open_table(STORES).map_err(ArborError::storage)?;
            for entry in table.iter().map_err(ArborError::storage)? {
                let (_, value) = entry.map_err(ArborError::storage)?;
                rows.stores.push(decode(value.value())?);
            }
        }
        {
            let table = read_txn.open_table(TRANSACTIONS).map_err(ArborError::storage)?;
            for entry in table.iter().map_err(ArborError::storage)? {
                let (key, value) = entry.map_err(ArborError::storage)?;
                rows.txns.push(TxnRecord {
                    id: TxnId(key.value()),
                    commit_time_ms: value.value(),
                });
            }
        }
        {
            let table = read_txn.open_table(METADATA).map_err(ArborError::storage)?;
            let get = |name: &str| -> Result<u64, ArborError> {
                Ok(table
                    .get(name)
                    .map_err(ArborError::storage)?
                    .map(|v| v.value())
                    .unwrap_or(0))
            };
            rows.counters = Counters {
                next_node: get("next_node_id")?,
                next_assoc: get("next_assoc_id")?,
                next_peer: get("next_peer_id")?,
                next_txn: get("next_txn_id")?,
                next_store: get("next_store_id")?,
            };
        }

        debug!(
            nodes = rows.nodes.len(),
            child_assocs = rows.child_assocs.len(),
            txns = rows.txns.len(),
            "loaded repository rows"
        );
        Ok(rows)
    }

    /// Persist the rows named by `keys`, as they are in `state`, in one
    /// redb transaction.
    pub fn write(
        &self,
        state: &GraphState,
        keys: &BTreeSet<RowKey>,
        counters: Counters,
    ) -> Result<(), ArborError> {
        let write_txn = self.db.begin_write().map_err(ArborError::storage)?;
        for key in keys {
            match key {
                RowKey::Node(id) => write_node(&write_txn, *id, state.node_row(*id))?,
                RowKey::ChildAssoc(id) => {
                    let mut table = write_txn.open_table(CHILD_ASSOCS).map_err(ArborError::storage)?;
                    match state.child_assoc(*id) {
                        Some(row) => {
                            let bytes = encode(row)?;
                            table
                                .insert(id.0, bytes.as_slice())
                                .map_err(ArborError::storage)?;
                        }
                        None => {
                            table.remove(id.0).map_err(ArborError::storage)?;
                        }
                    }
                }
                RowKey::PeerAssoc(id) => {
                    let mut table = write_txn.open_table(PEER_ASSOCS).map_err(ArborError::storage)?;
                    match state.peer_assoc(*id) {
                        Some(row) => {
                            let bytes = encode(row)?;
                            table
                                .insert(id.0, bytes.as_slice())
                                .map_err(ArborError::storage)?;
                        }
                        None => {
                            table.remove(id.0).map_err(ArborError::storage)?;
                        }
                    }
                }
                RowKey::Store(id) => {
                    let mut table = write_txn.open_table(STORES).map_err(ArborError::storage)?;
                    match state.store(*id) {
                        Some(row) => {
                            let bytes = encode(row)?;
                            table
                                .insert(id.0, bytes.as_slice())
                                .map_err(ArborError::storage)?;
                        }
                        None => {
                            table.remove(id.0).map_err(ArborError::storage)?;
                        }
                    }
                }
                RowKey::Txn(id) => {
                    let mut table = write_txn.open_table(TRANSACTIONS).map_err(ArborError::storage)?;
                    match state.txn(*id) {
                        Some(row) => {
                            table
                                .insert(id.0, row.commit_time_ms)
                                .map_err(ArborError::storage)?;
                        }
                        None => {
                            table.remove(id.0).map_err(ArborError::storage)?;
                        }
                    }
                }
                RowKey::Identity(..)
                | RowKey::ChildName(..)
                | RowKey::StoreName(..)
                | RowKey::Links(..)
                | RowKey::Parents(..) => {}
            }
        }
        write_counters(&write_txn, counters)?;
        write_txn.commit().map_err(ArborError::storage)?;
        Ok(())
    }

    /// Replace the whole database content with `state` (snapshot import).
    pub fn replace_all(&self, state: &GraphState, counters: Counters) -> Result<(), ArborError> {
        let write_txn = self.db.begin_write().map_err(ArborError::storage)?;
        for table in [NODES, CHILD_ASSOCS, PEER_ASSOCS, STORES] {
            write_txn.delete_table(table).map_err(ArborError::storage)?;
        }
        write_txn.delete_table(PROPERTIES).map_err(ArborError::storage)?;
        write_txn.delete_table(ASPECTS).map_err(ArborError::storage)?;
        write_txn.delete_table(TRANSACTIONS).map_err(ArborError::storage)?;
        write_txn.commit().map_err(ArborError::storage)?;

        let keys: BTreeSet<RowKey> = state
            .stores()
            .map(|s| RowKey::Store(s.id))
            .chain(state.nodes().map(|n| RowKey::Node(n.id)))
            .chain(state.child_assocs().map(|a| RowKey::ChildAssoc(a.id)))
            .chain(state.peer_assocs().map(|a| RowKey::PeerAssoc(a.id)))
            .chain(state.txns().map(|t| RowKey::Txn(t.id)))
            .collect();
        self.write(state, &keys, counters)
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<bool, ArborError> {
        self.db.compact().map_err(ArborError::storage)
    }
}

fn write_node(
    write_txn: &WriteTransaction,
    id: NodeId,
    row: Option<&NodeRecord>,
) -> Result<(), ArborError> {
    let mut nodes = write_txn.open_table(NODES).map_err(ArborError::storage)?;
    let mut props = write_txn.open_table(PROPERTIES).map_err(ArborError::storage)?;
    let mut aspects = write_txn.open_table(ASPECTS).map_err(ArborError::storage)?;

    // Drop the old property and aspect rows of this node.
    let upper = id.0.saturating_add(1);
    let old_props: Vec<String> = props
        .range((id.0, "")..(upper, ""))
        .map_err(ArborError::storage)?
        .map(|entry| entry.map(|(k, _)| k.value().1.to_string()))
        .collect::<Result<_, _>>()
        .map_err(ArborError::storage)?;
    for name in &old_props {
        props
            .remove((id.0, name.as_str()))
            .map_err(ArborError::storage)?;
    }
    let old_aspects: Vec<String> = aspects
        .range((id.0, "")..(upper, ""))
        .map_err(ArborError::storage)?
        .map(|entry| entry.map(|(k, _)| k.value().1.to_string()))
        .collect::<Result<_, _>>()
        .map_err(ArborError::storage)?;
    for name in &old_aspects {
        aspects
            .remove((id.0, name.as_str()))
            .map_err(ArborError::storage)?;
    }

    let Some(node) = row else {
        nodes.remove(id.0).map_err(ArborError::storage)?;
        return Ok(());
    };
    let bytes = encode(&NodeRow {
        store: node.store,
        uuid: node.uuid.clone(),
        type_qname: node.type_qname.clone(),
        acl: node.acl,
        txn: node.txn,
        deleted: node.deleted,
    })?;
    nodes
        .insert(id.0, bytes.as_slice())
        .map_err(ArborError::storage)?;
    for (name, value) in &node.properties {
        let key = name.to_string();
        let bytes = encode(value)?;
        props
            .insert((id.0, key.as_str()), bytes.as_slice())
            .map_err(ArborError::storage)?;
    }
    for aspect in &node.aspects {
        let key = aspect.to_string();
        aspects
            .insert((id.0, key.as_str()), ())
            .map_err(ArborError::storage)?;
    }
    Ok(())
}

fn write_counters(write_txn: &WriteTransaction, counters: Counters) -> Result<(), ArborError> {
    let mut table = write_txn.open_table(METADATA).map_err(ArborError::storage)?;
    for (name, value) in [
        ("next_node_id", counters.next_node),
        ("next_assoc_id", counters.next_assoc),
        ("next_peer_id", counters.next_peer),
        ("next_txn_id", counters.next_txn),
        ("next_store_id", counters.next_store),
    ] {
        table.insert(name, value).map_err(ArborError::storage)?;
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
