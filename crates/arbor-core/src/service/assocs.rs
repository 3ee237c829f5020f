//! Secondary child associations and peer associations.
//!
//! Removing the association between a node and its primary parent deletes
//! the node; every path into removal goes through
//! [`Transaction::remove_child_assoc_by_id`] so that rule holds everywhere.

use crate::graph::associations::{AssocFilter, NewChildAssoc};
use crate::policy::{AfterEvent, BeforeEvent, IndexEvent};
use crate::primitives::DEFAULT_CHILD_INDEX;
use crate::txn::Transaction;
use crate::{ArborError, AssocId, ChildAssocRef, NodeRef, PeerAssocId, PeerAssocRef, QName};

impl Transaction {
    /// Link an existing node under another parent.
    pub fn add_child(
        &mut self,
        parent: &NodeRef,
        child: &NodeRef,
        assoc_type: &QName,
        qname: &QName,
    ) -> Result<ChildAssocRef, ArborError> {
        self.mutate(|txn| txn.add_child_impl(parent, child, assoc_type, qname))
    }

    fn add_child_impl(
        &mut self,
        parent: &NodeRef,
        child: &NodeRef,
        assoc_type: &QName,
        qname: &QName,
    ) -> Result<ChildAssocRef, ArborError> {
        let parent_id = self.resolve_mutable(parent)?;
        let child_id = self.resolve_mutable(child)?;
        let dictionary = self.dictionary();
        let def = dictionary
            .get_association(assoc_type)
            .filter(|d| d.is_child())
            .ok_or_else(|| ArborError::InvalidAssociation(assoc_type.clone()))?;
        self.before(BeforeEvent::CreateChildAssociation {
            parent: parent.clone(),
            child: child.clone(),
            assoc_type: assoc_type.clone(),
        })?;

        let id = self.graph.new_child_assoc(
            dictionary.as_ref(),
            NewChildAssoc {
                parent: parent_id,
                child: child_id,
                assoc_type: assoc_type.clone(),
                qname: qname.clone(),
                is_primary: false,
                index: DEFAULT_CHILD_INDEX,
            },
        )?;
        self.ensure_source_aspect(parent_id, &def.source_class)?;

        let assoc = self.assoc_ref(id)?;
        self.after(AfterEvent::CreateChildAssociation {
            assoc: assoc.clone(),
            is_new_node: false,
        });
        self.index(IndexEvent::CreateChildAssociation(assoc.clone()));
        self.propagate_timestamps(parent_id, assoc_type)?;
        Ok(assoc)
    }

    /// Unlink `child` from `parent`, deleting it if `parent` is its
    /// primary parent.
    pub fn remove_child(&mut self, parent: &NodeRef, child: &NodeRef) -> Result<(), ArborError> {
        self.mutate(|txn| txn.remove_child_impl(parent, child))
    }

    fn remove_child_impl(&mut self, parent: &NodeRef, child: &NodeRef) -> Result<(), ArborError> {
        let parent_id = self.resolve_mutable(parent)?;
        let child_id = self.resolve_mutable(child)?;
        let assocs: Vec<(AssocId, bool)> = self
            .graph
            .child_assocs_of(parent_id)
            .filter(|a| a.child == child_id)
            .map(|a| (a.id, a.is_primary))
            .collect();
        if assocs.iter().any(|(_, primary)| *primary) {
            return self.delete_node(child, true);
        }
        for (id, _) in assocs {
            self.remove_child_assoc_by_id(id)?;
        }
        Ok(())
    }

    /// Remove one child association. Returns `false` if it no longer exists.
    pub fn remove_child_association(&mut self, assoc: &ChildAssocRef) -> Result<bool, ArborError> {
        self.mutate(|txn| txn.remove_child_association_impl(assoc))
    }

    fn remove_child_association_impl(&mut self, assoc: &ChildAssocRef) -> Result<bool, ArborError> {
        if self.graph.child_assoc(assoc.id).is_none() {
            return Ok(false);
        }
        self.remove_child_assoc_by_id(assoc.id)?;
        Ok(true)
    }

    /// Remove a secondary child association; a primary one is rejected.
    pub fn remove_secondary_child_association(
        &mut self,
        assoc: &ChildAssocRef,
    ) -> Result<bool, ArborError> {
        self.mutate(|txn| txn.remove_secondary_child_association_impl(assoc))
    }

    fn remove_secondary_child_association_impl(
        &mut self,
        assoc: &ChildAssocRef,
    ) -> Result<bool, ArborError> {
        let Some(row) = self.graph.child_assoc(assoc.id) else {
            return Ok(false);
        };
        if row.is_primary {
            return Err(ArborError::InvalidArgument(format!(
                "child association {} is primary; remove the node instead",
                assoc.id.0
            )));
        }
        self.remove_child_assoc_by_id(assoc.id)?;
        Ok(true)
    }

    /// Reposition a child among its siblings.
    pub fn set_child_association_index(
        &mut self,
        assoc: &ChildAssocRef,
        index: i32,
    ) -> Result<(), ArborError> {
        self.mutate(|txn| txn.set_child_association_index_impl(assoc, index))
    }

    fn set_child_association_index_impl(
        &mut self,
        assoc: &ChildAssocRef,
        index: i32,
    ) -> Result<(), ArborError> {
        let parent = self
            .graph
            .child_assoc(assoc.id)
            .map(|a| a.parent)
            .ok_or(ArborError::InvalidChildAssociation(assoc.id))?;
        self.check_not_pending(parent)?;
        let parent_ref = self.graph.node_ref(parent)?;
        self.before(BeforeEvent::UpdateNode {
            node: parent_ref.clone(),
        })?;
        self.graph.set_child_index(assoc.id, index)?;
        self.after(AfterEvent::UpdateNode { node: parent_ref });
        Ok(())
    }

    /// Create a peer association from `source` to `target`.
    pub fn create_association(
        &mut self,
        source: &NodeRef,
        target: &NodeRef,
        assoc_type: &QName,
    ) -> Result<PeerAssocRef, ArborError> {
        self.mutate(|txn| txn.create_association_impl(source, target, assoc_type))
    }

    fn create_association_impl(
        &mut self,
        source: &NodeRef,
        target: &NodeRef,
        assoc_type: &QName,
    ) -> Result<PeerAssocRef, ArborError> {
        let source_id = self.resolve_mutable(source)?;
        let target_id = self.resolve_mutable(target)?;
        self.before(BeforeEvent::CreateAssociation {
            source: source.clone(),
            target: target.clone(),
            assoc_type: assoc_type.clone(),
        })?;
        let dictionary = self.dictionary();
        let id = self
            .graph
            .new_peer_assoc(dictionary.as_ref(), source_id, target_id, assoc_type)?;
        if let Some(def) = dictionary.get_association(assoc_type) {
            self.ensure_source_aspect(source_id, &def.source_class)?;
        }
        let assoc = self.peer_ref(id)?;
        self.after(AfterEvent::CreateAssociation {
            assoc: assoc.clone(),
        });
        self.index(IndexEvent::Update(source.clone()));
        Ok(assoc)
    }

    /// Remove every `assoc_type` association from `source` to `target`.
    /// Returns whether anything was removed.
    pub fn remove_association(
        &mut self,
        source: &NodeRef,
        target: &NodeRef,
        assoc_type: &QName,
    ) -> Result<bool, ArborError> {
        self.mutate(|txn| txn.remove_association_impl(source, target, assoc_type))
    }

    fn remove_association_impl(
        &mut self,
        source: &NodeRef,
        target: &NodeRef,
        assoc_type: &QName,
    ) -> Result<bool, ArborError> {
        let source_id = self.resolve_mutable(source)?;
        let target_id = self.graph.resolve(target)?;
        let ids: Vec<PeerAssocId> = self
            .graph
            .target_assocs(source_id, AssocFilter::of_type(assoc_type))
            .filter(|a| a.target == target_id)
            .map(|a| a.id)
            .collect();
        for id in &ids {
            self.remove_peer_by_id(*id)?;
        }
        Ok(!ids.is_empty())
    }

    /// Remove a child association; a primary one takes its child with it.
    pub(crate) fn remove_child_assoc_by_id(&mut self, id: AssocId) -> Result<(), ArborError> {
        let row = self
            .graph
            .child_assoc(id)
            .cloned()
            .ok_or(ArborError::InvalidChildAssociation(id))?;
        if row.is_primary {
            let child = self.graph.node_ref(row.child)?;
            return self.delete_node(&child, true);
        }
        self.check_not_pending(row.parent)?;
        let assoc = self.graph.child_assoc_ref(&row)?;
        self.before(BeforeEvent::DeleteChildAssociation {
            assoc: assoc.clone(),
        })?;
        self.graph.remove_child_assoc(id)?;
        self.after(AfterEvent::DeleteChildAssociation {
            assoc: assoc.clone(),
        });
        self.index(IndexEvent::DeleteChildAssociation(assoc));
        self.propagate_timestamps(row.parent, &row.assoc_type)
    }

    pub(crate) fn remove_peer_by_id(&mut self, id: PeerAssocId) -> Result<(), ArborError> {
        let assoc = self.peer_ref(id)?;
        self.before(BeforeEvent::DeleteAssociation {
            assoc: assoc.clone(),
        })?;
        self.graph.remove_peer_assoc(id)?;
        self.index(IndexEvent::Update(assoc.source.clone()));
        self.after(AfterEvent::DeleteAssociation { assoc });
        Ok(())
    }

    pub(crate) fn peer_ref(&self, id: PeerAssocId) -> Result<PeerAssocRef, ArborError> {
        let row = self.graph.peer_assoc(id).ok_or_else(|| {
            ArborError::InvalidArgument(format!("peer association {} does not exist", id.0))
        })?;
        self.graph.peer_assoc_ref(row)
    }
}
