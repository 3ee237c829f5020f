//! Node deletion and archival.
//!
//! `delete_node` walks the primary subtree, marks every node pending-delete
//! for the rest of the operation and fires the before-events once per node
//! and association. The subtree is then either copied into the archive store
//! (parents first) or flagged deleted in place (children first). Deleted rows
//! keep their identity until the purge worker removes them.

use crate::graph::RowKey;
use crate::graph::associations::NewChildAssoc;
use crate::model::qnames::{
    ASPECT_ARCHIVED, ASPECT_OWNABLE, ASPECT_TEMPORARY, ASSOC_ARCHIVE_USER_LINK,
    ASSOC_ARCHIVED_LINK, ASSOC_CHILDREN, PROP_ARCHIVED_BY, PROP_ARCHIVED_DATE,
    PROP_ARCHIVED_ORIGINAL_OWNER, PROP_ARCHIVED_ORIGINAL_PARENT_ASSOC, PROP_OWNER,
    QNAME_ARCHIVED_ITEM, SYSTEM_PREFIX, TYPE_ARCHIVE_USER,
};
use crate::policy::{AfterEvent, BeforeEvent, IndexEvent};
use crate::primitives::DEFAULT_CHILD_INDEX;
use crate::service::relocate::RelocateMode;
use crate::txn::{FiredKey, Transaction};
use crate::walker::{NodeHierarchy, walk_hierarchy};
use crate::{
    ArborError, AssocFilter, ChildAssoc, ChildAssocRef, NodeId, NodeRef, PeerAssoc, PropertyMap,
    PropertyValue, QName,
};
use tracing::debug;

impl Transaction {
    /// Delete a node and its primary subtree.
    ///
    /// With `allow_archival` the subtree moves to the archive store mapped to
    /// the node's store, unless the node is temporary or its classes opt out.
    pub fn delete_node(&mut self, node: &NodeRef, allow_archival: bool) -> Result<(), ArborError> {
        self.mutate(|txn| txn.delete_node_impl(node, allow_archival))
    }

    fn delete_node_impl(&mut self, node: &NodeRef, allow_archival: bool) -> Result<(), ArborError> {
        let id = self.resolve_mutable(node)?;
        let row = self.graph.require_live(id)?;
        if self.graph.store(row.store).is_some_and(|s| s.root == id) {
            return Err(ArborError::IllegalState(format!(
                "{node} is a store root and cannot be deleted"
            )));
        }
        let archive_root = if allow_archival {
            self.archive_target(id)?
        } else {
            None
        };

        let hierarchy = walk_hierarchy(&self.graph, id)?;
        self.ctx.mark_pending(hierarchy.ids());
        let result = self.delete_hierarchy(&hierarchy, archive_root);
        self.ctx.clear_pending(hierarchy.ids());
        result
    }

    fn delete_hierarchy(
        &mut self,
        hierarchy: &NodeHierarchy,
        archive_root: Option<NodeId>,
    ) -> Result<(), ArborError> {
        let root = hierarchy.root()?;
        self.fire_before_delete(hierarchy)?;
        if archive_root.is_some() {
            self.before(BeforeEvent::ArchiveNode {
                node: root.node_ref.clone(),
            })?;
        }
        hierarchy.validate(&self.graph)?;

        // Collected before any row changes.
        let mut deleted: Vec<(ChildAssocRef, QName)> = Vec::with_capacity(hierarchy.len());
        for visited in hierarchy.bottom_up() {
            if let Some(primary) = &visited.primary_parent {
                deleted.push((self.graph.child_assoc_ref(primary)?, visited.type_qname.clone()));
            }
        }
        let root_parent = root.primary_parent.clone();

        let archived = match archive_root {
            Some(archive_root) => {
                let relocated = self.relocate(
                    hierarchy,
                    archive_root,
                    &ASSOC_CHILDREN,
                    &QNAME_ARCHIVED_ITEM,
                    RelocateMode::Archive,
                )?;
                if let Some(first) = relocated.first() {
                    self.stamp_archived(first.new, &first.old_assoc)?;
                }
                for copy in &relocated {
                    self.index(IndexEvent::Create(copy.new_assoc.clone()));
                }
                true
            }
            None => {
                self.detach_hierarchy(hierarchy, false)?;
                false
            }
        };

        debug!(root = %root.node_ref, nodes = hierarchy.len(), archived, "deleted hierarchy");
        for (assoc, node_type) in deleted {
            self.index(IndexEvent::Delete(assoc.clone()));
            self.after(AfterEvent::DeleteNode {
                assoc,
                node_type,
                archived,
            });
        }
        if let Some(parent) = root_parent {
            self.propagate_timestamps(parent.parent, &parent.assoc_type)?;
        }
        Ok(())
    }

    /// Fire the before-events of a cascade, once per node and association.
    pub(crate) fn fire_before_delete(&mut self, hierarchy: &NodeHierarchy) -> Result<(), ArborError> {
        for visited in hierarchy.bottom_up() {
            if self.ctx.first_fire(FiredKey::Node(visited.id)) {
                self.before(BeforeEvent::DeleteNode {
                    node: visited.node_ref.clone(),
                })?;
            }
            for assoc in visited.secondary_parents.iter().chain(&visited.secondary_children) {
                if self.ctx.first_fire(FiredKey::ChildAssoc(assoc.id)) {
                    let assoc = self.graph.child_assoc_ref(assoc)?;
                    self.before(BeforeEvent::DeleteChildAssociation { assoc })?;
                }
            }
            for assoc in visited.target_assocs.iter().chain(&visited.source_assocs) {
                if self.ctx.first_fire(FiredKey::PeerAssoc(assoc.id)) {
                    let assoc = self.graph.peer_assoc_ref(assoc)?;
                    self.before(BeforeEvent::DeleteAssociation { assoc })?;
                }
            }
        }
        Ok(())
    }

    /// Remove every association of the walked nodes and flag them deleted,
    /// children first.
    ///
    /// With `keep_internal`, associations between two walked nodes are
    /// dropped silently because a copy of them already exists elsewhere.
    pub(crate) fn detach_hierarchy(
        &mut self,
        hierarchy: &NodeHierarchy,
        keep_internal: bool,
    ) -> Result<(), ArborError> {
        for visited in hierarchy.bottom_up() {
            let child_assocs: Vec<&ChildAssoc> = visited
                .secondary_parents
                .iter()
                .chain(&visited.secondary_children)
                .collect();
            for assoc in child_assocs {
                if self.graph.child_assoc(assoc.id).is_none() {
                    continue;
                }
                let internal =
                    hierarchy.contains(assoc.parent) && hierarchy.contains(assoc.child);
                if keep_internal && internal {
                    self.graph.remove_child_assoc(assoc.id)?;
                    continue;
                }
                let assoc_ref = self.graph.child_assoc_ref(assoc)?;
                self.graph.remove_child_assoc(assoc.id)?;
                self.after(AfterEvent::DeleteChildAssociation {
                    assoc: assoc_ref.clone(),
                });
                self.index(IndexEvent::DeleteChildAssociation(assoc_ref));
                if !hierarchy.contains(assoc.parent) {
                    self.propagate_timestamps(assoc.parent, &assoc.assoc_type)?;
                }
            }

            let peers: Vec<&PeerAssoc> = visited
                .target_assocs
                .iter()
                .chain(&visited.source_assocs)
                .collect();
            for assoc in peers {
                if self.graph.peer_assoc(assoc.id).is_none() {
                    continue;
                }
                let internal =
                    hierarchy.contains(assoc.source) && hierarchy.contains(assoc.target);
                let assoc_ref = self.graph.peer_assoc_ref(assoc)?;
                self.graph.remove_peer_assoc(assoc.id)?;
                if !(keep_internal && internal) {
                    self.after(AfterEvent::DeleteAssociation { assoc: assoc_ref });
                }
            }

            if let Some(primary) = &visited.primary_parent
                && self.graph.child_assoc(primary.id).is_some()
            {
                self.graph.remove_child_assoc(primary.id)?;
            }
            self.mark_deleted(visited.id)?;
        }
        Ok(())
    }

    /// Flag a node row deleted. Its identity stays reserved until purge.
    fn mark_deleted(&mut self, id: NodeId) -> Result<(), ArborError> {
        let mut row = self.graph.require_live(id)?.clone();
        row.deleted = true;
        row.aspects.clear();
        row.properties.clear();
        self.graph.write_node(row);
        self.graph.claim(RowKey::Links(id));
        Ok(())
    }

    /// Physically remove a node row with whatever associations still
    /// reference it, and forget its permissions.
    pub(crate) fn purge_node_row(&mut self, id: NodeId) -> Result<(), ArborError> {
        let node = self.graph.node_ref(id)?;
        let child_assocs: Vec<_> = self
            .graph
            .parent_assocs(id)
            .chain(self.graph.child_assocs_of(id))
            .map(|a| a.id)
            .collect();
        for assoc in child_assocs {
            self.graph.remove_child_assoc_row(assoc);
        }
        let peers: Vec<_> = self
            .graph
            .target_assocs(id, AssocFilter::any())
            .chain(self.graph.source_assocs(id, AssocFilter::any()))
            .map(|a| a.id)
            .collect();
        for assoc in peers {
            self.graph.remove_peer_assoc_row(assoc);
        }
        self.permissions().delete_permissions(&node);
        self.graph.claim(RowKey::Links(id));
        self.graph.remove_node_row(id);
        Ok(())
    }

    /// Root of the archive store a deleted node should go to, if any.
    ///
    /// The type's archive flag wins; otherwise the first aspect declaring one.
    /// Without any flag a node is archived whenever its store has an archive.
    fn archive_target(&self, id: NodeId) -> Result<Option<NodeId>, ArborError> {
        let row = self.graph.require_live(id)?;
        if row.aspects.contains(&*ASPECT_TEMPORARY) {
            return Ok(None);
        }
        let dictionary = self.dictionary();
        let flag = dictionary
            .get_type(&row.type_qname)
            .and_then(|t| t.archive)
            .or_else(|| {
                row.aspects
                    .iter()
                    .find_map(|a| dictionary.get_aspect(a).and_then(|def| def.archive))
            })
            .unwrap_or(true);
        if !flag {
            return Ok(None);
        }
        let Some(store) = self.graph.store(row.store) else {
            return Ok(None);
        };
        let archive = self
            .config()
            .repository
            .archive_store_for(&store.store_ref)
            .and_then(|archive| self.graph.store_id(archive))
            .and_then(|archive| self.graph.store(archive))
            .map(|archive| archive.root);
        Ok(archive)
    }

    /// Record where an archived node came from and file it under the
    /// deleting user's archive folder.
    fn stamp_archived(&mut self, id: NodeId, original: &ChildAssocRef) -> Result<(), ArborError> {
        let row = self.graph.require_live(id)?;
        let original_owner = row
            .properties
            .get(&*PROP_OWNER)
            .cloned()
            .unwrap_or(PropertyValue::Null);
        let store_root = self
            .graph
            .store(row.store)
            .map(|s| s.root)
            .ok_or_else(|| ArborError::IllegalState(format!("archived node {} has no store", id.0)))?;
        let user = self.user().to_string();

        let stamp = PropertyMap::from([
            (PROP_ARCHIVED_BY.clone(), PropertyValue::Text(user.clone())),
            (PROP_ARCHIVED_DATE.clone(), PropertyValue::Date(self.now_ms())),
            (
                PROP_ARCHIVED_ORIGINAL_PARENT_ASSOC.clone(),
                PropertyValue::ChildAssocRef(Box::new(original.clone())),
            ),
            (PROP_ARCHIVED_ORIGINAL_OWNER.clone(), original_owner),
            (PROP_OWNER.clone(), PropertyValue::Text(user.clone())),
        ]);
        self.graph.set_properties(id, stamp, false)?;
        self.graph
            .add_aspects(id, [&*ASPECT_ARCHIVED, &*ASPECT_OWNABLE])?;

        let folder = self.archive_user_folder(store_root, &user)?;
        let dictionary = self.dictionary();
        self.graph.new_child_assoc(
            dictionary.as_ref(),
            NewChildAssoc {
                parent: folder,
                child: id,
                assoc_type: ASSOC_ARCHIVED_LINK.clone(),
                qname: QNAME_ARCHIVED_ITEM.clone(),
                is_primary: false,
                index: DEFAULT_CHILD_INDEX,
            },
        )?;
        Ok(())
    }

    /// The per-user folder under an archive root, created on first use.
    fn archive_user_folder(&mut self, store_root: NodeId, user: &str) -> Result<NodeId, ArborError> {
        let qname = QName::new(SYSTEM_PREFIX, user);
        let existing = self
            .graph
            .child_assocs_of(store_root)
            .find(|a| a.assoc_type == *ASSOC_ARCHIVE_USER_LINK && a.qname == qname)
            .map(|a| a.child);
        if let Some(folder) = existing {
            return Ok(folder);
        }
        let root = self.graph.node_ref(store_root)?;
        let assoc = self.create_node(
            &root,
            &ASSOC_ARCHIVE_USER_LINK,
            &qname,
            &TYPE_ARCHIVE_USER,
            PropertyMap::new(),
        )?;
        self.graph.resolve(&assoc.child)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{ArborConfig, ArchiveMapping};
    use crate::model::qnames::*;
    use crate::model::{ClassSpec, system_model};
    use crate::policy::EventRecorder;
    use crate::txn::{Repository, Transaction};
    use crate::{ArborError, AssocFilter, NodeRef, PropertyMap, QName, StoreRef};
    use std::sync::Arc;

    struct Fixture {
        repo: Repository,
        recorder: Arc<EventRecorder>,
        root: NodeRef,
        archive: StoreRef,
    }

    fn fixture() -> Fixture {
        let dictionary = system_model()
            .add_type(
                ClassSpec::new(QName::new("app", "scratch"))
                    .parent(TYPE_FOLDER.clone())
                    .archive(false),
            )
            .build()
            .expect("dictionary");
        let workspace = StoreRef::new("workspace", "SpacesStore");
        let archive = StoreRef::new("archive", "SpacesStore");
        let mut config = ArborConfig::default();
        config.repository.archive_stores = vec![ArchiveMapping {
            store: workspace.clone(),
            archive: archive.clone(),
        }];
        let recorder = Arc::new(EventRecorder::new());
        let repo = Repository::builder(Arc::new(dictionary))
            .config(config)
            .policy(Arc::clone(&recorder) as Arc<dyn crate::policy::NodePolicy>)
            .in_memory()
            .expect("repository");
        let root = repo
            .retrying()
            .do_in_transaction(|txn| {
                let store = txn.create_store(&workspace.protocol, &workspace.identifier)?;
                txn.create_store(&archive.protocol, &archive.identifier)?;
                txn.get_root_node(&store)
            })
            .expect("stores");
        recorder.clear();
        Fixture {
            repo,
            recorder,
            root,
            archive,
        }
    }

    fn folder(txn: &mut Transaction, parent: &NodeRef, name: &str, node_type: &QName) -> NodeRef {
        txn.create_node(
            parent,
            &ASSOC_CONTAINS,
            &QName::new("cm", name),
            node_type,
            PropertyMap::from([(PROP_NAME.clone(), name.into())]),
        )
        .expect("create")
        .child
    }

    #[test]
    fn straight_delete_removes_the_subtree() {
        let fx = fixture();
        let mut txn = fx.repo.begin();
        let a = folder(&mut txn, &fx.root, "a", &TYPE_FOLDER);
        let b = folder(&mut txn, &a, "b", &TYPE_FOLDER);
        let c = folder(&mut txn, &b, "c", &TYPE_FOLDER);
        fx.recorder.clear();
        txn.delete_node(&a, false).expect("delete");
        for node in [&a, &b, &c] {
            assert!(!txn.exists(node));
            assert!(txn.get_node_status(node).expect("status").deleted);
        }
        assert_eq!(fx.recorder.count_before("beforeDeleteNode"), 3);
        assert_eq!(fx.recorder.count_after("onDeleteNode"), 3);
    }

    #[test]
    fn archive_moves_the_subtree_and_records_origin() {
        let fx = fixture();
        let mut txn = fx.repo.begin_as("alice");
        let a = folder(&mut txn, &fx.root, "a", &TYPE_FOLDER);
        let b = folder(&mut txn, &a, "b", &TYPE_FOLDER);
        let original = txn.get_primary_parent(&a).expect("parent").expect("primary");
        txn.delete_node(&a, true).expect("archive");

        assert!(!txn.exists(&a));
        let archived_a = NodeRef::new(fx.archive.clone(), a.uuid.clone());
        let archived_b = NodeRef::new(fx.archive.clone(), b.uuid.clone());
        assert!(txn.exists(&archived_a));
        assert!(txn.exists(&archived_b));
        assert!(txn.has_aspect(&archived_a, &ASPECT_ARCHIVED).expect("aspect"));
        assert!(!txn.has_aspect(&archived_b, &ASPECT_ARCHIVED).expect("aspect"));
        let recorded = txn
            .get_property(&archived_a, &PROP_ARCHIVED_ORIGINAL_PARENT_ASSOC)
            .expect("origin")
            .and_then(|v| v.as_child_assoc_ref().cloned());
        assert_eq!(recorded, Some(original));
        assert_eq!(
            txn.get_property(&archived_a, &PROP_ARCHIVED_BY).expect("by"),
            Some("alice".into())
        );

        let archive_root = txn.get_root_node(&fx.archive).expect("archive root");
        let users = txn
            .get_child_assocs(&archive_root, AssocFilter::of_type(&ASSOC_ARCHIVE_USER_LINK), None, false)
            .expect("users");
        assert_eq!(users.len(), 1);
        let items = txn
            .get_child_assocs(&users[0].child, AssocFilter::any(), None, false)
            .expect("items");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].child, archived_a);
        assert_eq!(fx.recorder.count_before("beforeArchiveNode"), 1);
    }

    #[test]
    fn opted_out_types_and_temporary_nodes_are_not_archived() {
        let fx = fixture();
        let mut txn = fx.repo.begin();
        let scratch = folder(&mut txn, &fx.root, "s", &QName::new("app", "scratch"));
        txn.delete_node(&scratch, true).expect("delete");
        assert!(!txn.exists(&NodeRef::new(fx.archive.clone(), scratch.uuid.clone())));

        let temp = folder(&mut txn, &fx.root, "t", &TYPE_FOLDER);
        txn.add_aspect(&temp, &ASPECT_TEMPORARY, PropertyMap::new())
            .expect("temporary");
        txn.delete_node(&temp, true).expect("delete");
        assert!(!txn.exists(&NodeRef::new(fx.archive.clone(), temp.uuid.clone())));
    }

    #[test]
    fn secondary_children_outside_survive() {
        let fx = fixture();
        let mut txn = fx.repo.begin();
        let a = folder(&mut txn, &fx.root, "a", &TYPE_FOLDER);
        let outside = folder(&mut txn, &fx.root, "outside", &TYPE_FOLDER);
        txn.add_child(&a, &outside, &ASSOC_CONTAINS, &QName::new("cm", "link"))
            .expect("link");
        txn.delete_node(&a, false).expect("delete");
        assert!(txn.exists(&outside));
        assert_eq!(
            txn.get_parent_assocs(&outside, AssocFilter::any()).expect("parents").len(),
            1
        );
    }

    #[test]
    fn store_root_cannot_be_deleted() {
        let fx = fixture();
        let mut txn = fx.repo.begin();
        let result = txn.delete_node(&fx.root, false);
        assert!(matches!(result, Err(ArborError::IllegalState(_))));
    }

    #[test]
    fn vetoed_delete_leaves_nothing_pending() {
        let fx = fixture();
        let mut txn = fx.repo.begin();
        let a = folder(&mut txn, &fx.root, "a", &TYPE_FOLDER);
        txn.commit().expect("commit");

        let vetoing = Arc::new(EventRecorder::vetoing(|event| {
            matches!(event, crate::policy::BeforeEvent::DeleteNode { .. })
                .then(|| "keep it".to_string())
        }));
        let dictionary = Arc::clone(fx.repo.dictionary());
        let repo = Repository::builder(dictionary)
            .policy(vetoing as Arc<dyn crate::policy::NodePolicy>)
            .in_memory()
            .expect("repository");
        repo.import_rows(fx.repo.export_rows()).expect("import");
        let mut txn = repo.begin();
        let result = txn.delete_node(&a, false);
        assert!(matches!(result, Err(ArborError::Vetoed(_))));
        let id = txn.state().resolve(&a).expect("still live");
        assert!(!txn.context().is_pending(id));
    }
}
