//! Moving nodes.
//!
//! Within a store a move re-points the primary association. Node identity
//! is qualified by store, so a move into another store copies the whole
//! primary subtree under fresh ids (same UUIDs) and deletes the originals;
//! listeners see a full create/delete pair for every node. Archival uses the
//! same copy.

use crate::graph::associations::NewChildAssoc;
use crate::policy::{AfterEvent, BeforeEvent, IndexEvent};
use crate::primitives::DEFAULT_CHILD_INDEX;
use crate::txn::Transaction;
use crate::walker::{NodeHierarchy, walk_hierarchy};
use crate::{ArborError, ChildAssocRef, NodeId, NodeRecord, NodeRef, QName, StoreId, TxnId};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RelocateMode {
    /// Copy into an archive store. A live node already holding a UUID there
    /// is a stale archive and is discarded.
    Archive,
    /// Copy into another workspace store. A live UUID clash is an error.
    Move,
}

/// One node copied by [`Transaction::relocate`].
#[derive(Debug, Clone)]
pub(crate) struct Relocated {
    pub new: NodeId,
    pub node_type: QName,
    /// Primary parent association of the original.
    pub old_assoc: ChildAssocRef,
    /// Primary parent association of the copy.
    pub new_assoc: ChildAssocRef,
}

impl Transaction {
    /// Move a node under a new primary parent.
    pub fn move_node(
        &mut self,
        node: &NodeRef,
        new_parent: &NodeRef,
        assoc_type: &QName,
        qname: &QName,
    ) -> Result<ChildAssocRef, ArborError> {
        self.mutate(|txn| txn.move_node_impl(node, new_parent, assoc_type, qname))
    }

    fn move_node_impl(
        &mut self,
        node: &NodeRef,
        new_parent: &NodeRef,
        assoc_type: &QName,
        qname: &QName,
    ) -> Result<ChildAssocRef, ArborError> {
        let id = self.resolve_mutable(node)?;
        let parent_id = self.resolve_mutable(new_parent)?;
        let old = self
            .graph
            .primary_parent_assoc(id)
            .cloned()
            .ok_or_else(|| {
                ArborError::IllegalState(format!("{node} is a store root and cannot be moved"))
            })?;
        let dictionary = self.dictionary();
        let def = dictionary
            .get_association(assoc_type)
            .filter(|d| d.is_child())
            .ok_or_else(|| ArborError::InvalidAssociation(assoc_type.clone()))?;
        let old_assoc = self.graph.child_assoc_ref(&old)?;

        if node.store != new_parent.store {
            let hierarchy = walk_hierarchy(&self.graph, id)?;
            self.ctx.mark_pending(hierarchy.ids());
            let result =
                self.move_across_stores(&hierarchy, &old_assoc, parent_id, assoc_type, qname);
            self.ctx.clear_pending(hierarchy.ids());
            let new_assoc = result?;
            self.ensure_source_aspect(parent_id, &def.source_class)?;
            self.propagate_timestamps(old.parent, &old.assoc_type)?;
            self.propagate_timestamps(parent_id, assoc_type)?;
            return Ok(new_assoc);
        }

        if self.graph.is_ancestor(id, parent_id)? {
            return Err(ArborError::CyclicRelationship {
                parent: new_parent.clone(),
                child: node.clone(),
            });
        }
        let name = self.graph.effective_child_name(id)?;
        self.graph
            .check_child_name_free(dictionary.as_ref(), parent_id, assoc_type, &name, Some(id))?;
        self.before(BeforeEvent::MoveNode {
            old_assoc: old_assoc.clone(),
            new_parent: new_parent.clone(),
        })?;
        self.graph.remove_child_assoc(old.id)?;
        let new_id = self.graph.new_child_assoc(
            dictionary.as_ref(),
            NewChildAssoc {
                parent: parent_id,
                child: id,
                assoc_type: assoc_type.clone(),
                qname: qname.clone(),
                is_primary: true,
                index: DEFAULT_CHILD_INDEX,
            },
        )?;
        self.ensure_source_aspect(parent_id, &def.source_class)?;
        let new_assoc = self.assoc_ref(new_id)?;

        debug!(node = %node, from = %old_assoc.parent, to = %new_parent, "moved node");
        self.after(AfterEvent::CreateChildAssociation {
            assoc: new_assoc.clone(),
            is_new_node: false,
        });
        self.after(AfterEvent::DeleteChildAssociation {
            assoc: old_assoc.clone(),
        });
        self.after(AfterEvent::MoveNode {
            old_assoc: old_assoc.clone(),
            new_assoc: new_assoc.clone(),
        });
        self.index(IndexEvent::Move {
            from: old_assoc,
            to: new_assoc.clone(),
        });
        // A rename in place touches the parent once; the context dedups it.
        self.propagate_timestamps(old.parent, &old.assoc_type)?;
        self.propagate_timestamps(parent_id, assoc_type)?;
        Ok(new_assoc)
    }

    fn move_across_stores(
        &mut self,
        hierarchy: &NodeHierarchy,
        old_assoc: &ChildAssocRef,
        parent: NodeId,
        assoc_type: &QName,
        qname: &QName,
    ) -> Result<ChildAssocRef, ArborError> {
        let new_parent = self.graph.node_ref(parent)?;
        self.before(BeforeEvent::MoveNode {
            old_assoc: old_assoc.clone(),
            new_parent,
        })?;
        self.fire_before_delete(hierarchy)?;
        hierarchy.validate(&self.graph)?;

        let relocated = self.relocate(hierarchy, parent, assoc_type, qname, RelocateMode::Move)?;
        let new_root = relocated
            .first()
            .map(|r| r.new_assoc.clone())
            .ok_or_else(|| ArborError::IllegalState("moved an empty hierarchy".to_string()))?;

        for copy in &relocated {
            self.after(AfterEvent::CreateNode {
                assoc: copy.new_assoc.clone(),
            });
            self.after(AfterEvent::CreateChildAssociation {
                assoc: copy.new_assoc.clone(),
                is_new_node: true,
            });
            self.index(IndexEvent::Create(copy.new_assoc.clone()));
        }
        for copy in relocated.iter().rev() {
            self.after(AfterEvent::DeleteNode {
                assoc: copy.old_assoc.clone(),
                node_type: copy.node_type.clone(),
                archived: false,
            });
            self.index(IndexEvent::Delete(copy.old_assoc.clone()));
        }
        debug!(nodes = relocated.len(), to = %new_root.parent, "moved hierarchy across stores");
        self.after(AfterEvent::MoveNode {
            old_assoc: old_assoc.clone(),
            new_assoc: new_root.clone(),
        });
        Ok(new_root)
    }

    /// Copy a walked hierarchy under `parent` (which may be in another
    /// store) and delete the originals. Returns the copies parents first.
    pub(crate) fn relocate(
        &mut self,
        hierarchy: &NodeHierarchy,
        parent: NodeId,
        assoc_type: &QName,
        qname: &QName,
        mode: RelocateMode,
    ) -> Result<Vec<Relocated>, ArborError> {
        let store = self.graph.require_live(parent)?.store;
        let dictionary = self.dictionary();
        let permissions = self.permissions();
        let mut copies: BTreeMap<NodeId, NodeId> = BTreeMap::new();
        let mut relocated = Vec::with_capacity(hierarchy.len());

        for visited in hierarchy.top_down() {
            let primary = visited.primary_parent.as_ref().ok_or_else(|| {
                ArborError::IllegalState(format!("{} has no primary parent", visited.node_ref))
            })?;
            let (new_parent, new_type, new_qname, index) = if visited.id == hierarchy.root_id() {
                (parent, assoc_type.clone(), qname.clone(), DEFAULT_CHILD_INDEX)
            } else {
                let mapped = copies.get(&primary.parent).copied().ok_or_else(|| {
                    ArborError::IllegalState(format!(
                        "parent of {} was not copied first",
                        visited.node_ref
                    ))
                })?;
                (mapped, primary.assoc_type.clone(), primary.qname.clone(), primary.index)
            };
            let old_assoc = self.graph.child_assoc_ref(primary)?;
            if mode == RelocateMode::Move {
                self.before(BeforeEvent::CreateNode {
                    parent: self.graph.node_ref(new_parent)?,
                    assoc_type: new_type.clone(),
                    node_type: visited.type_qname.clone(),
                })?;
            }

            let original = self.graph.require_live(visited.id)?.clone();
            self.clear_uuid(store, &original.uuid, mode)?;
            let new = self.graph.ids().node();
            self.graph.write_node(NodeRecord {
                id: new,
                store,
                txn: TxnId(0),
                deleted: false,
                ..original
            });
            let assoc_id = self.graph.new_child_assoc(
                dictionary.as_ref(),
                NewChildAssoc {
                    parent: new_parent,
                    child: new,
                    assoc_type: new_type,
                    qname: new_qname,
                    is_primary: true,
                    index,
                },
            )?;

            let new_ref = self.graph.node_ref(new)?;
            for entry in permissions.get_all_set_permissions(&visited.node_ref) {
                permissions.set_permission(&new_ref, &entry.authority, &entry.permission, entry.allowed);
            }
            let inherit = permissions.get_inherit_parent_permissions(&visited.node_ref);
            permissions.set_inherit_parent_permissions(&new_ref, inherit);

            copies.insert(visited.id, new);
            relocated.push(Relocated {
                new,
                node_type: visited.type_qname.clone(),
                old_assoc,
                new_assoc: self.assoc_ref(assoc_id)?,
            });
        }

        // Associations with both ends inside the hierarchy come along.
        for visited in hierarchy.top_down() {
            for assoc in &visited.secondary_children {
                if let (Some(parent), Some(child)) =
                    (copies.get(&assoc.parent), copies.get(&assoc.child))
                {
                    self.graph.new_child_assoc(
                        dictionary.as_ref(),
                        NewChildAssoc {
                            parent: *parent,
                            child: *child,
                            assoc_type: assoc.assoc_type.clone(),
                            qname: assoc.qname.clone(),
                            is_primary: false,
                            index: assoc.index,
                        },
                    )?;
                }
            }
            for assoc in &visited.target_assocs {
                if let (Some(source), Some(target)) =
                    (copies.get(&assoc.source), copies.get(&assoc.target))
                {
                    self.graph
                        .new_peer_assoc(dictionary.as_ref(), *source, *target, &assoc.assoc_type)?;
                }
            }
        }

        self.detach_hierarchy(hierarchy, true)?;
        Ok(relocated)
    }

    /// Make `uuid` available in `store` for a copied node.
    ///
    /// A deleted row holding it is purged. A live holder is deleted and
    /// purged when archiving, and is an error otherwise.
    fn clear_uuid(
        &mut self,
        store: StoreId,
        uuid: &str,
        mode: RelocateMode,
    ) -> Result<(), ArborError> {
        let Some(owner) = self.graph.uuid_owner(store, uuid) else {
            return Ok(());
        };
        let owner_ref = self.graph.node_ref(owner)?;
        let live = self.graph.live_node(owner).is_some();
        match (live, mode) {
            (false, _) => self.purge_node_row(owner)?,
            (true, RelocateMode::Archive) => {
                debug!(node = %owner_ref, "discarding stale archived node");
                self.delete_node(&owner_ref, false)?;
                self.purge_node_row(owner)?;
            }
            (true, RelocateMode::Move) => return Err(ArborError::NodeExists(owner_ref)),
        }
        if self.graph.uuid_owner(store, uuid).is_some() {
            return Err(ArborError::NodeExists(owner_ref));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::model::qnames::*;
    use crate::model::system_model;
    use crate::permissions::{InMemoryPermissionService, PermissionService};
    use crate::policy::EventRecorder;
    use crate::txn::{Repository, Transaction};
    use crate::{ArborError, AssocFilter, NodeRef, PropertyMap, QName, StoreRef};
    use std::sync::Arc;

    struct Fixture {
        repo: Repository,
        recorder: Arc<EventRecorder>,
        permissions: Arc<InMemoryPermissionService>,
        root: NodeRef,
        other_root: NodeRef,
    }

    fn fixture() -> Fixture {
        let recorder = Arc::new(EventRecorder::new());
        let permissions = Arc::new(InMemoryPermissionService::new());
        let repo = Repository::builder(Arc::new(system_model().build().expect("dictionary")))
            .policy(Arc::clone(&recorder) as Arc<dyn crate::policy::NodePolicy>)
            .permissions(Arc::clone(&permissions) as Arc<dyn PermissionService>)
            .in_memory()
            .expect("repository");
        let (root, other_root) = repo
            .retrying()
            .do_in_transaction(|txn| {
                let one = txn.create_store("workspace", "one")?;
                let two = txn.create_store("workspace", "two")?;
                Ok((txn.get_root_node(&one)?, txn.get_root_node(&two)?))
            })
            .expect("stores");
        recorder.clear();
        Fixture {
            repo,
            recorder,
            permissions,
            root,
            other_root,
        }
    }

    fn folder(txn: &mut Transaction, parent: &NodeRef, name: &str) -> NodeRef {
        txn.create_node(
            parent,
            &ASSOC_CONTAINS,
            &QName::new("cm", name),
            &TYPE_FOLDER,
            PropertyMap::from([(PROP_NAME.clone(), name.into())]),
        )
        .expect("create")
        .child
    }

    #[test]
    fn same_store_move_reparents() {
        let fx = fixture();
        let mut txn = fx.repo.begin();
        let a = folder(&mut txn, &fx.root, "a");
        let b = folder(&mut txn, &fx.root, "b");
        let doc = folder(&mut txn, &a, "doc");
        fx.recorder.clear();
        let moved = txn
            .move_node(&doc, &b, &ASSOC_CONTAINS, &QName::new("cm", "doc"))
            .expect("move");
        assert_eq!(moved.parent, b);
        assert_eq!(moved.child, doc);
        assert_eq!(txn.get_path(&doc).expect("path").to_string(), "/cm:b/cm:doc");
        assert_eq!(fx.recorder.count_after("onMoveNode"), 1);
        assert_eq!(fx.recorder.count_after("onCreateNode"), 0);
    }

    #[test]
    fn moving_under_own_descendant_is_rejected() {
        let fx = fixture();
        let mut txn = fx.repo.begin();
        let a = folder(&mut txn, &fx.root, "a");
        let b = folder(&mut txn, &a, "b");
        let result = txn.move_node(&a, &b, &ASSOC_CONTAINS, &QName::new("cm", "a"));
        assert!(matches!(result, Err(ArborError::CyclicRelationship { .. })));
        assert_eq!(txn.get_primary_parent(&a).expect("parent").map(|p| p.parent), Some(fx.root.clone()));
    }

    #[test]
    fn cross_store_move_recreates_the_subtree() {
        let fx = fixture();
        let mut txn = fx.repo.begin();
        let a = folder(&mut txn, &fx.root, "a");
        let b = folder(&mut txn, &a, "b");
        let c = folder(&mut txn, &b, "c");
        let outside = folder(&mut txn, &fx.root, "outside");
        txn.add_child(&a, &c, &ASSOC_CONTAINS, &QName::new("cm", "c-link"))
            .expect("internal link");
        txn.add_child(&outside, &b, &ASSOC_CONTAINS, &QName::new("cm", "b-link"))
            .expect("crossing link");
        fx.permissions.set_permission(&b, "alice", "Read", true);
        fx.permissions.set_inherit_parent_permissions(&b, false);
        fx.recorder.clear();

        let moved = txn
            .move_node(&a, &fx.other_root, &ASSOC_CONTAINS, &QName::new("cm", "a"))
            .expect("move");
        let store_two = StoreRef::new("workspace", "two");
        assert_eq!(moved.child, NodeRef::new(store_two.clone(), a.uuid.clone()));
        for old in [&a, &b, &c] {
            assert!(!txn.exists(old));
            assert!(txn.exists(&NodeRef::new(store_two.clone(), old.uuid.clone())));
        }
        assert_eq!(fx.recorder.count_after("onCreateNode"), 3);
        assert_eq!(fx.recorder.count_after("onDeleteNode"), 3);
        assert_eq!(fx.recorder.count_before("beforeCreateNode"), 3);

        let new_a = NodeRef::new(store_two.clone(), a.uuid.clone());
        let new_b = NodeRef::new(store_two.clone(), b.uuid.clone());
        let new_c = NodeRef::new(store_two, c.uuid.clone());
        let links = txn
            .get_child_assocs(&new_a, AssocFilter::any(), None, false)
            .expect("children");
        assert!(links.iter().any(|l| l.child == new_c && !l.is_primary));
        assert!(txn
            .get_child_assocs(&outside, AssocFilter::any(), None, false)
            .expect("outside")
            .is_empty());
        assert_eq!(
            fx.permissions.get_all_set_permissions(&new_b).len(),
            1
        );
        assert!(!fx.permissions.get_inherit_parent_permissions(&new_b));
    }

    #[test]
    fn cross_store_move_refuses_live_uuid_clash() {
        let fx = fixture();
        let mut txn = fx.repo.begin();
        let a = folder(&mut txn, &fx.root, "a");
        let props = PropertyMap::from([(PROP_NODE_UUID.clone(), a.uuid.as_str().into())]);
        txn.create_node(&fx.other_root, &ASSOC_CHILDREN, &QName::new("cm", "x"), &TYPE_BASE, props)
            .expect("clash");
        let result = txn.move_node(&a, &fx.other_root, &ASSOC_CONTAINS, &QName::new("cm", "a"));
        assert!(matches!(result, Err(ArborError::NodeExists(_))));
    }
}
