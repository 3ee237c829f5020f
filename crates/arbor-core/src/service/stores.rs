//! Stores and their roots.

use crate::model::qnames::TYPE_STORE_ROOT;
use crate::txn::Transaction;
use crate::{ArborError, NodeRecord, NodeRef, StoreRecord, StoreRef, TxnId};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

impl Transaction {
    /// Create a store with a fresh root node.
    pub fn create_store(&mut self, protocol: &str, identifier: &str) -> Result<StoreRef, ArborError> {
        self.mutate(|txn| txn.create_store_impl(protocol, identifier))
    }

    fn create_store_impl(&mut self, protocol: &str, identifier: &str) -> Result<StoreRef, ArborError> {
        if protocol.is_empty() || identifier.is_empty() {
            return Err(ArborError::InvalidArgument(format!(
                "store reference '{protocol}://{identifier}' is incomplete"
            )));
        }
        if protocol == StoreRef::PROTOCOL_DELETED {
            return Err(ArborError::InvalidArgument(format!(
                "protocol '{protocol}' is reserved for deleted stores"
            )));
        }
        let store_ref = StoreRef::new(protocol, identifier);
        if self.graph.store_id(&store_ref).is_some() {
            return Err(ArborError::StoreExists(store_ref));
        }

        let id = self.graph.ids().store();
        let root = self.graph.ids().node();
        self.graph.write_store(StoreRecord {
            id,
            store_ref: store_ref.clone(),
            root,
        });
        self.graph.write_node(NodeRecord {
            id: root,
            store: id,
            uuid: uuid::Uuid::new_v4().to_string(),
            type_qname: TYPE_STORE_ROOT.clone(),
            aspects: BTreeSet::new(),
            properties: BTreeMap::new(),
            acl: None,
            txn: TxnId(0),
            deleted: false,
        });
        let closure = self.closure_for(root, &TYPE_STORE_ROOT)?;
        self.apply_closure(root, closure)?;
        info!(store = %store_ref, "created store");
        Ok(store_ref)
    }

    /// Retire a store by renaming it into the deleted protocol.
    ///
    /// Nodes stay attached to the renamed store until they are purged.
    /// Returns the store's new reference.
    pub fn delete_store(&mut self, store_ref: &StoreRef) -> Result<StoreRef, ArborError> {
        self.mutate(|txn| txn.delete_store_impl(store_ref))
    }

    fn delete_store_impl(&mut self, store_ref: &StoreRef) -> Result<StoreRef, ArborError> {
        let id = self
            .graph
            .store_id(store_ref)
            .ok_or_else(|| ArborError::StoreNotFound(store_ref.clone()))?;
        let mut record = self
            .graph
            .store(id)
            .cloned()
            .ok_or_else(|| ArborError::StoreNotFound(store_ref.clone()))?;
        let renamed = StoreRef::new(StoreRef::PROTOCOL_DELETED, uuid::Uuid::new_v4().to_string());
        record.store_ref = renamed.clone();
        self.graph.write_store(record);
        debug!(store = %store_ref, renamed = %renamed, "deleted store");
        Ok(renamed)
    }

    /// Live stores, deleted ones excluded.
    #[must_use]
    pub fn get_stores(&self) -> Vec<StoreRef> {
        self.graph
            .stores()
            .filter(|s| s.store_ref.protocol != StoreRef::PROTOCOL_DELETED)
            .map(|s| s.store_ref.clone())
            .collect()
    }

    #[must_use]
    pub fn exists_store(&self, store_ref: &StoreRef) -> bool {
        self.graph.store_id(store_ref).is_some()
    }

    pub fn get_root_node(&self, store_ref: &StoreRef) -> Result<NodeRef, ArborError> {
        let root = self
            .graph
            .store_id(store_ref)
            .and_then(|id| self.graph.store(id))
            .map(|s| s.root)
            .ok_or_else(|| ArborError::StoreNotFound(store_ref.clone()))?;
        self.graph.node_ref(root)
    }

    /// Root of the archive store configured for `store_ref`, if that
    /// archive store exists.
    pub fn get_store_archive_node(&self, store_ref: &StoreRef) -> Result<Option<NodeRef>, ArborError> {
        if !self.exists_store(store_ref) {
            return Err(ArborError::StoreNotFound(store_ref.clone()));
        }
        match self.config().repository.archive_store_for(store_ref) {
            Some(archive) if self.exists_store(archive) => self.get_root_node(archive).map(Some),
            _ => Ok(None),
        }
    }
}
