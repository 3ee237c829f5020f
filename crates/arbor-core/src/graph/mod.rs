//! # Node Graph
//!
//! The committed graph state and the copy-on-write working graph used by a
//! transaction.
//!
//! [`GraphState`] holds the persisted rows (nodes, child associations, peer
//! associations, stores, transactions) together with derived indexes. Every
//! row write goes through a `put_*` method so the indexes never drift from
//! the rows. [`WorkingGraph`] wraps a shared `Arc<GraphState>`, copies it on
//! first write and records the key of every row it dirties; the dirty set is
//! what the repository uses for conflict detection, merging and persistence.
//!
//! - [`identity`]: `(store, uuid) -> NodeId` resolution
//! - [`properties`]: property and aspect store
//! - [`associations`]: child and peer association graph

pub mod associations;
pub mod identity;
pub mod properties;

pub use identity::IdentityIndex;

use crate::{
    ArborError, AssocId, ChildAssoc, NodeId, NodeRecord, NodeRef, PeerAssoc, PeerAssocId, QName,
    StoreId, StoreRecord, StoreRef, TxnId, TxnRecord,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// ROW KEYS
// =============================================================================

/// Key of a row (or derived unique entry) written by a transaction.
///
/// `Identity`, `ChildName`, `StoreName`, `Links` and `Parents` are never
/// persisted; they exist so that two transactions claiming the same UUID,
/// unique child name or store reference conflict, so that an association
/// change under a node conflicts with a concurrent cascade over that node,
/// and so that a cycle check conflicts with a concurrent change to any
/// parent set it walked.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RowKey {
    Node(NodeId),
    ChildAssoc(AssocId),
    PeerAssoc(PeerAssocId),
    Store(StoreId),
    Txn(TxnId),
    Identity(StoreId, String),
    ChildName(NodeId, QName, String),
    StoreName(StoreRef),
    Links(NodeId),
    /// The parent associations of a node.
    Parents(NodeId),
}

// =============================================================================
// ID ALLOCATION
// =============================================================================

/// Persisted high-water marks of the id allocators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub next_node: u64,
    pub next_assoc: u64,
    pub next_peer: u64,
    pub next_txn: u64,
    pub next_store: u64,
}

impl Counters {
    /// Raise every counter to at least the other's value.
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        Self {
            next_node: self.next_node.max(other.next_node),
            next_assoc: self.next_assoc.max(other.next_assoc),
            next_peer: self.next_peer.max(other.next_peer),
            next_txn: self.next_txn.max(other.next_txn),
            next_store: self.next_store.max(other.next_store),
        }
    }
}

/// Monotonic id allocators shared by every transaction of a repository.
///
/// Ids taken by a transaction that later rolls back are simply skipped.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_node: AtomicU64,
    next_assoc: AtomicU64,
    next_peer: AtomicU64,
    next_txn: AtomicU64,
    next_store: AtomicU64,
}

impl IdAllocator {
    #[must_use]
    pub fn new(counters: Counters) -> Self {
        Self {
            next_node: AtomicU64::new(counters.next_node.max(1)),
            next_assoc: AtomicU64::new(counters.next_assoc.max(1)),
            next_peer: AtomicU64::new(counters.next_peer.max(1)),
            next_txn: AtomicU64::new(counters.next_txn.max(1)),
            next_store: AtomicU64::new(counters.next_store.max(1)),
        }
    }

    pub fn node(&self) -> NodeId {
        NodeId(self.next_node.fetch_add(1, Ordering::SeqCst))
    }

    pub fn assoc(&self) -> AssocId {
        AssocId(self.next_assoc.fetch_add(1, Ordering::SeqCst))
    }

    pub fn peer(&self) -> PeerAssocId {
        PeerAssocId(self.next_peer.fetch_add(1, Ordering::SeqCst))
    }

    pub fn txn(&self) -> TxnId {
        TxnId(self.next_txn.fetch_add(1, Ordering::SeqCst))
    }

    pub fn store(&self) -> StoreId {
        StoreId(self.next_store.fetch_add(1, Ordering::SeqCst))
    }

    /// Move every allocator up to at least `counters`.
    pub fn raise_to(&self, counters: Counters) {
        self.next_node.fetch_max(counters.next_node, Ordering::SeqCst);
        self.next_assoc.fetch_max(counters.next_assoc, Ordering::SeqCst);
        self.next_peer.fetch_max(counters.next_peer, Ordering::SeqCst);
        self.next_txn.fetch_max(counters.next_txn, Ordering::SeqCst);
        self.next_store.fetch_max(counters.next_store, Ordering::SeqCst);
    }

    /// Current high-water marks.
    #[must_use]
    pub fn counters(&self) -> Counters {
        Counters {
            next_node: self.next_node.load(Ordering::SeqCst),
            next_assoc: self.next_assoc.load(Ordering::SeqCst),
            next_peer: self.next_peer.load(Ordering::SeqCst),
            next_txn: self.next_txn.load(Ordering::SeqCst),
            next_store: self.next_store.load(Ordering::SeqCst),
        }
    }
}

// =============================================================================
// ROWS
// =============================================================================

/// The full row set of a graph, in id order.
///
/// This is what persistence loads and what snapshots serialize; indexes are
/// rebuilt from it by [`GraphState::from_rows`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphRows {
    pub stores: Vec<StoreRecord>,
    pub nodes: Vec<NodeRecord>,
    pub child_assocs: Vec<ChildAssoc>,
    pub peer_assocs: Vec<PeerAssoc>,
    pub txns: Vec<TxnRecord>,
    pub counters: Counters,
}

// =============================================================================
// GRAPH STATE
// =============================================================================

/// Rows plus derived indexes.
///
/// Uses `BTreeMap` for everything that is iterated so listings are
/// deterministic; the two lookup-only indexes are hash maps.
#[derive(Debug, Clone, Default)]
pub struct GraphState {
    stores: BTreeMap<StoreId, StoreRecord>,
    store_index: HashMap<StoreRef, StoreId>,

    nodes: BTreeMap<NodeId, NodeRecord>,
    identity: IdentityIndex,

    child_assocs: BTreeMap<AssocId, ChildAssoc>,
    children_of: BTreeMap<NodeId, BTreeSet<AssocId>>,
    parents_of: BTreeMap<NodeId, BTreeSet<AssocId>>,
    unique_names: HashMap<(NodeId, QName, String), AssocId>,

    peer_assocs: BTreeMap<PeerAssocId, PeerAssoc>,
    outgoing: BTreeMap<NodeId, BTreeSet<PeerAssocId>>,
    incoming: BTreeMap<NodeId, BTreeSet<PeerAssocId>>,

    txns: BTreeMap<TxnId, TxnRecord>,
    /// Number of node rows (deleted or not) that reference each transaction.
    txn_usage: BTreeMap<TxnId, usize>,
}

impl GraphState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a state, indexes included, from raw rows.
    pub fn from_rows(rows: GraphRows) -> Result<Self, ArborError> {
        let mut state = Self::new();
        for store in rows.stores {
            state.put_store(store.id, Some(store));
        }
        for txn in rows.txns {
            state.put_txn(txn.id, Some(txn));
        }
        for node in rows.nodes {
            state.put_node(node.id, Some(node));
        }
        for assoc in rows.child_assocs {
            if !state.nodes.contains_key(&assoc.parent) || !state.nodes.contains_key(&assoc.child)
            {
                return Err(ArborError::Serialization(format!(
                    "child association {} references a missing node",
                    assoc.id.0
                )));
            }
            state.put_child_assoc(assoc.id, Some(assoc));
        }
        for assoc in rows.peer_assocs {
            state.put_peer_assoc(assoc.id, Some(assoc));
        }
        Ok(state)
    }

    /// Export every row.
    #[must_use]
    pub fn to_rows(&self, counters: Counters) -> GraphRows {
        GraphRows {
            stores: self.stores.values().cloned().collect(),
            nodes: self.nodes.values().cloned().collect(),
            child_assocs: self.child_assocs.values().cloned().collect(),
            peer_assocs: self.peer_assocs.values().cloned().collect(),
            txns: self.txns.values().copied().collect(),
            counters,
        }
    }

    /// Counters that are guaranteed to be above every id present.
    #[must_use]
    pub fn counters_floor(&self) -> Counters {
        fn next<K: Copy>(last: Option<K>, raw: impl Fn(K) -> u64) -> u64 {
            last.map_or(1, |k| raw(k).saturating_add(1))
        }
        Counters {
            next_node: next(self.nodes.keys().next_back().copied(), |k| k.0),
            next_assoc: next(self.child_assocs.keys().next_back().copied(), |k| k.0),
            next_peer: next(self.peer_assocs.keys().next_back().copied(), |k| k.0),
            next_txn: next(self.txns.keys().next_back().copied(), |k| k.0),
            next_store: next(self.stores.keys().next_back().copied(), |k| k.0),
        }
    }

    // -------------------------------------------------------------------------
    // Row access
    // -------------------------------------------------------------------------

    /// A node row, deleted or not.
    #[must_use]
    pub fn node_row(&self, id: NodeId) -> Option<&NodeRecord> {
        self.nodes.get(&id)
    }

    /// A node row that is not marked deleted.
    #[must_use]
    pub fn live_node(&self, id: NodeId) -> Option<&NodeRecord> {
        self.nodes.get(&id).filter(|n| !n.deleted)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.values()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn child_assoc(&self, id: AssocId) -> Option<&ChildAssoc> {
        self.child_assocs.get(&id)
    }

    pub fn child_assocs(&self) -> impl Iterator<Item = &ChildAssoc> {
        self.child_assocs.values()
    }

    #[must_use]
    pub fn peer_assoc(&self, id: PeerAssocId) -> Option<&PeerAssoc> {
        self.peer_assocs.get(&id)
    }

    pub fn peer_assocs(&self) -> impl Iterator<Item = &PeerAssoc> {
        self.peer_assocs.values()
    }

    #[must_use]
    pub fn store(&self, id: StoreId) -> Option<&StoreRecord> {
        self.stores.get(&id)
    }

    #[must_use]
    pub fn store_id(&self, store_ref: &StoreRef) -> Option<StoreId> {
        self.store_index.get(store_ref).copied()
    }

    pub fn stores(&self) -> impl Iterator<Item = &StoreRecord> {
        self.stores.values()
    }

    #[must_use]
    pub fn txn(&self, id: TxnId) -> Option<&TxnRecord> {
        self.txns.get(&id)
    }

    pub fn txns(&self) -> impl Iterator<Item = &TxnRecord> {
        self.txns.values()
    }

    /// Number of node rows referencing the transaction.
    #[must_use]
    pub fn txn_usage(&self, id: TxnId) -> usize {
        self.txn_usage.get(&id).copied().unwrap_or(0)
    }

    /// Stable reference of a node row.
    pub fn node_ref(&self, id: NodeId) -> Result<NodeRef, ArborError> {
        let node = self.nodes.get(&id).ok_or_else(|| {
            ArborError::IllegalState(format!("node row {} does not exist", id.0))
        })?;
        let store = self.stores.get(&node.store).ok_or_else(|| {
            ArborError::IllegalState(format!("store row {} does not exist", node.store.0))
        })?;
        Ok(NodeRef::new(store.store_ref.clone(), node.uuid.clone()))
    }

    // -------------------------------------------------------------------------
    // Row writes (index maintaining)
    // -------------------------------------------------------------------------

    /// Insert, replace or remove (`None`) a node row.
    pub fn put_node(&mut self, id: NodeId, row: Option<NodeRecord>) {
        if let Some(old) = self.nodes.remove(&id) {
            self.identity.remove(old.store, &old.uuid, id);
            self.release_txn(old.txn);
        }
        if let Some(row) = row {
            self.identity.insert(row.store, row.uuid.clone(), id);
            *self.txn_usage.entry(row.txn).or_insert(0) += 1;
            self.nodes.insert(id, row);
        }
    }

    fn release_txn(&mut self, txn: TxnId) {
        if let Some(count) = self.txn_usage.get_mut(&txn) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.txn_usage.remove(&txn);
            }
        }
    }

    /// Insert, replace or remove a child association row.
    pub fn put_child_assoc(&mut self, id: AssocId, row: Option<ChildAssoc>) {
        if let Some(old) = self.child_assocs.remove(&id) {
            remove_from(&mut self.children_of, old.parent, &id);
            remove_from(&mut self.parents_of, old.child, &id);
            if let Some(name) = &old.unique_name {
                let key = (old.parent, old.assoc_type.clone(), name.clone());
                if self.unique_names.get(&key) == Some(&id) {
                    self.unique_names.remove(&key);
                }
            }
        }
        if let Some(row) = row {
            self.children_of.entry(row.parent).or_default().insert(id);
            self.parents_of.entry(row.child).or_default().insert(id);
            if let Some(name) = &row.unique_name {
                self.unique_names
                    .insert((row.parent, row.assoc_type.clone(), name.clone()), id);
            }
            self.child_assocs.insert(id, row);
        }
    }

    /// Insert, replace or remove a peer association row.
    pub fn put_peer_assoc(&mut self, id: PeerAssocId, row: Option<PeerAssoc>) {
        if let Some(old) = self.peer_assocs.remove(&id) {
            remove_from(&mut self.outgoing, old.source, &id);
            remove_from(&mut self.incoming, old.target, &id);
        }
        if let Some(row) = row {
            self.outgoing.entry(row.source).or_default().insert(id);
            self.incoming.entry(row.target).or_default().insert(id);
            self.peer_assocs.insert(id, row);
        }
    }

    /// Insert, replace or remove a store row.
    pub fn put_store(&mut self, id: StoreId, row: Option<StoreRecord>) {
        if let Some(old) = self.stores.remove(&id) {
            self.store_index.remove(&old.store_ref);
        }
        if let Some(row) = row {
            self.store_index.insert(row.store_ref.clone(), id);
            self.stores.insert(id, row);
        }
    }

    /// Insert or remove a transaction row.
    pub fn put_txn(&mut self, id: TxnId, row: Option<TxnRecord>) {
        self.txns.remove(&id);
        if let Some(row) = row {
            self.txns.insert(id, row);
        }
    }

    /// Copy the rows named by `keys` from `source` into this state.
    ///
    /// Rows absent from `source` are removed here. Conflict-only keys are
    /// ignored; their effect is carried by the rows they guard.
    pub fn merge_rows(&mut self, source: &GraphState, keys: &BTreeSet<RowKey>) {
        for key in keys {
            match key {
                RowKey::Node(id) => self.put_node(*id, source.nodes.get(id).cloned()),
                RowKey::ChildAssoc(id) => {
                    self.put_child_assoc(*id, source.child_assocs.get(id).cloned());
                }
                RowKey::PeerAssoc(id) => {
                    self.put_peer_assoc(*id, source.peer_assocs.get(id).cloned());
                }
                RowKey::Store(id) => self.put_store(*id, source.stores.get(id).cloned()),
                RowKey::Txn(id) => self.put_txn(*id, source.txns.get(id).copied()),
                RowKey::Identity(..)
                | RowKey::ChildName(..)
                | RowKey::StoreName(..)
                | RowKey::Links(..)
                | RowKey::Parents(..) => {}
            }
        }
    }
}

fn remove_from<K: Ord, V: Ord>(index: &mut BTreeMap<K, BTreeSet<V>>, key: K, value: &V) {
    if let Some(set) = index.get_mut(&key) {
        set.remove(value);
        if set.is_empty() {
            index.remove(&key);
        }
    }
}

// =============================================================================
// WORKING GRAPH
// =============================================================================

/// Copy-on-write view of the graph owned by one transaction.
///
/// Besides the keys it writes, the view records conflict keys it has read
/// and relied on; a concurrent commit writing one of those also conflicts.
#[derive(Debug)]
pub struct WorkingGraph {
    state: Arc<GraphState>,
    dirty: BTreeSet<RowKey>,
    reads: BTreeSet<RowKey>,
    ids: Arc<IdAllocator>,
    txn: Option<TxnId>,
}

impl std::ops::Deref for WorkingGraph {
    type Target = GraphState;

    fn deref(&self) -> &GraphState {
        &self.state
    }
}

impl WorkingGraph {
    #[must_use]
    pub fn new(state: Arc<GraphState>, ids: Arc<IdAllocator>) -> Self {
        Self {
            state,
            dirty: BTreeSet::new(),
            reads: BTreeSet::new(),
            ids,
            txn: None,
        }
    }

    /// The read view.
    #[must_use]
    pub fn state(&self) -> &GraphState {
        &self.state
    }

    /// Keys of every row written so far.
    #[must_use]
    pub fn dirty(&self) -> &BTreeSet<RowKey> {
        &self.dirty
    }

    /// Keys read and relied on so far.
    #[must_use]
    pub fn reads(&self) -> &BTreeSet<RowKey> {
        &self.reads
    }

    #[must_use]
    pub fn is_dirty(&self, key: &RowKey) -> bool {
        self.dirty.contains(key)
    }

    #[must_use]
    pub fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    /// The transaction id, if this transaction has written anything.
    #[must_use]
    pub fn txn_id(&self) -> Option<TxnId> {
        self.txn
    }

    /// The transaction id stamped onto written node rows, allocated on demand.
    pub fn current_txn(&mut self) -> TxnId {
        match self.txn {
            Some(id) => id,
            None => {
                let id = self.ids.txn();
                self.txn = Some(id);
                id
            }
        }
    }

    fn state_mut(&mut self) -> &mut GraphState {
        Arc::make_mut(&mut self.state)
    }

    /// Record a conflict-only key without writing a row.
    pub fn claim(&mut self, key: RowKey) {
        self.dirty.insert(key);
    }

    /// Record keys whose concurrent change would invalidate this view.
    pub fn observe(&mut self, keys: impl IntoIterator<Item = RowKey>) {
        self.reads.extend(keys);
    }

    /// Write a node row, stamping it with this transaction's id.
    pub fn write_node(&mut self, mut row: NodeRecord) {
        row.txn = self.current_txn();
        self.dirty.insert(RowKey::Node(row.id));
        self.dirty
            .insert(RowKey::Identity(row.store, row.uuid.clone()));
        let id = row.id;
        self.state_mut().put_node(id, Some(row));
    }

    /// Physically remove a node row.
    pub fn remove_node_row(&mut self, id: NodeId) {
        if let Some(old) = self.state.node_row(id) {
            let identity = RowKey::Identity(old.store, old.uuid.clone());
            self.dirty.insert(identity);
        }
        self.dirty.insert(RowKey::Node(id));
        self.state_mut().put_node(id, None);
    }

    /// Re-stamp a node row with this transaction's id.
    pub fn touch_node(&mut self, id: NodeId) {
        if let Some(row) = self.state.node_row(id).cloned() {
            self.write_node(row);
        }
    }

    pub fn write_child_assoc(&mut self, row: ChildAssoc) {
        if let Some(old) = self.state.child_assoc(row.id)
            && let Some(name) = &old.unique_name
        {
            let key = RowKey::ChildName(old.parent, old.assoc_type.clone(), name.clone());
            self.dirty.insert(key);
        }
        if let Some(name) = &row.unique_name {
            let key = RowKey::ChildName(row.parent, row.assoc_type.clone(), name.clone());
            self.dirty.insert(key);
        }
        self.dirty.insert(RowKey::ChildAssoc(row.id));
        self.dirty.insert(RowKey::Links(row.parent));
        self.dirty.insert(RowKey::Parents(row.child));
        let id = row.id;
        self.state_mut().put_child_assoc(id, Some(row));
    }

    pub fn remove_child_assoc_row(&mut self, id: AssocId) {
        if let Some(old) = self.state.child_assoc(id) {
            let links = RowKey::Links(old.parent);
            let parents = RowKey::Parents(old.child);
            let name = old
                .unique_name
                .as_ref()
                .map(|n| RowKey::ChildName(old.parent, old.assoc_type.clone(), n.clone()));
            self.dirty.insert(links);
            self.dirty.insert(parents);
            self.dirty.extend(name);
        }
        self.dirty.insert(RowKey::ChildAssoc(id));
        self.state_mut().put_child_assoc(id, None);
    }

    pub fn write_peer_assoc(&mut self, row: PeerAssoc) {
        self.dirty.insert(RowKey::PeerAssoc(row.id));
        self.dirty.insert(RowKey::Links(row.source));
        self.dirty.insert(RowKey::Links(row.target));
        let id = row.id;
        self.state_mut().put_peer_assoc(id, Some(row));
    }

    pub fn remove_peer_assoc_row(&mut self, id: PeerAssocId) {
        if let Some(old) = self.state.peer_assoc(id) {
            let (source, target) = (old.source, old.target);
            self.dirty.insert(RowKey::Links(source));
            self.dirty.insert(RowKey::Links(target));
        }
        self.dirty.insert(RowKey::PeerAssoc(id));
        self.state_mut().put_peer_assoc(id, None);
    }

    pub fn write_store(&mut self, row: StoreRecord) {
        if let Some(old) = self.state.store(row.id) {
            let key = RowKey::StoreName(old.store_ref.clone());
            self.dirty.insert(key);
        }
        self.dirty.insert(RowKey::StoreName(row.store_ref.clone()));
        self.dirty.insert(RowKey::Store(row.id));
        let id = row.id;
        self.state_mut().put_store(id, Some(row));
    }

    pub fn write_txn(&mut self, row: TxnRecord) {
        self.dirty.insert(RowKey::Txn(row.id));
        let id = row.id;
        self.state_mut().put_txn(id, Some(row));
    }

    pub fn remove_txn_row(&mut self, id: TxnId) {
        self.dirty.insert(RowKey::Txn(id));
        self.state_mut().put_txn(id, None);
    }

    /// Take the final state, the dirty set and the read set.
    #[must_use]
    pub fn into_parts(self) -> (Arc<GraphState>, BTreeSet<RowKey>, BTreeSet<RowKey>) {
        (self.state, self.dirty, self.reads)
    }
}

// =============================================================================
// TESTS
// =============================================================================
