//! # Identity & Reference Layer
//!
//! Maps stable `(store, uuid)` references to internal node ids and back.
//! Lookups are O(1) amortized; deleted rows stay indexed until purged so a
//! UUID cannot be reused inside its store while the old row exists.

use super::GraphState;
use crate::{ArborError, NodeId, NodeRecord, NodeRef, StoreId};
use std::collections::HashMap;

/// Hash index from `(store, uuid)` to node id.
#[derive(Debug, Clone, Default)]
pub struct IdentityIndex {
    by_uuid: HashMap<StoreId, HashMap<String, NodeId>>,
}

impl IdentityIndex {
    #[must_use]
    pub fn get(&self, store: StoreId, uuid: &str) -> Option<NodeId> {
        self.by_uuid.get(&store).and_then(|m| m.get(uuid)).copied()
    }

    pub(crate) fn insert(&mut self, store: StoreId, uuid: String, id: NodeId) {
        self.by_uuid.entry(store).or_default().insert(uuid, id);
    }

    pub(crate) fn remove(&mut self, store: StoreId, uuid: &str, id: NodeId) {
        if let Some(map) = self.by_uuid.get_mut(&store) {
            if map.get(uuid) == Some(&id) {
                map.remove(uuid);
            }
            if map.is_empty() {
                self.by_uuid.remove(&store);
            }
        }
    }
}

impl GraphState {
    /// Resolve a reference to a node row, deleted rows included.
    #[must_use]
    pub fn lookup_row(&self, node_ref: &NodeRef) -> Option<&NodeRecord> {
        let store = self.store_id(&node_ref.store)?;
        let id = self.identity.get(store, &node_ref.uuid)?;
        self.node_row(id)
    }

    /// Resolve a reference to a live node id.
    pub fn resolve(&self, node_ref: &NodeRef) -> Result<NodeId, ArborError> {
        self.lookup_row(node_ref)
            .filter(|n| !n.deleted)
            .map(|n| n.id)
            .ok_or_else(|| ArborError::NodeNotFound(node_ref.clone()))
    }

    /// Resolve a reference to a live node row.
    pub fn resolve_node(&self, node_ref: &NodeRef) -> Result<&NodeRecord, ArborError> {
        let id = self.resolve(node_ref)?;
        self.live_node(id)
            .ok_or_else(|| ArborError::NodeNotFound(node_ref.clone()))
    }

    /// Whether the reference resolves to a live node.
    #[must_use]
    pub fn exists(&self, node_ref: &NodeRef) -> bool {
        self.resolve(node_ref).is_ok()
    }

    /// Id of the row occupying `uuid` in `store`, deleted or not.
    #[must_use]
    pub fn uuid_owner(&self, store: StoreId, uuid: &str) -> Option<NodeId> {
        self.identity.get(store, uuid)
    }

    /// Live node row by internal id, as a lookup failure if it is gone.
    pub fn require_live(&self, id: NodeId) -> Result<&NodeRecord, ArborError> {
        match self.live_node(id) {
            Some(node) => Ok(node),
            None => Err(ArborError::NodeNotFound(self.node_ref(id)?)),
        }
    }
}
