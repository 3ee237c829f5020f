//! Restoring archived nodes.

use crate::model::qnames::{
    ASPECT_ARCHIVED, ASPECT_OWNABLE, ASSOC_ARCHIVED_LINK, PROP_ARCHIVED_BY, PROP_ARCHIVED_DATE,
    PROP_ARCHIVED_ORIGINAL_OWNER, PROP_ARCHIVED_ORIGINAL_PARENT_ASSOC, PROP_OWNER,
};
use crate::policy::{AfterEvent, BeforeEvent};
use crate::txn::Transaction;
use crate::walker::walk_hierarchy;
use crate::{ArborError, AssocId, NodeId, NodeRef, PropertyMap, PropertyValue, QName};
use tracing::debug;

impl Transaction {
    /// Bring an archived node back into a live store.
    ///
    /// The destination parent, association type and name default to where
    /// the node was archived from. Archive bookkeeping is removed and the
    /// node's original owner (or lack of one) is put back.
    pub fn restore_node(
        &mut self,
        archived: &NodeRef,
        dest_parent: Option<&NodeRef>,
        assoc_type: Option<&QName>,
        qname: Option<&QName>,
    ) -> Result<NodeRef, ArborError> {
        self.mutate(|txn| txn.restore_node_impl(archived, dest_parent, assoc_type, qname))
    }

    fn restore_node_impl(
        &mut self,
        archived: &NodeRef,
        dest_parent: Option<&NodeRef>,
        assoc_type: Option<&QName>,
        qname: Option<&QName>,
    ) -> Result<NodeRef, ArborError> {
        let id = self.resolve_mutable(archived)?;
        let row = self.graph.require_live(id)?;
        if !row.aspects.contains(&*ASPECT_ARCHIVED) {
            return Err(ArborError::IllegalState(format!("{archived} is not an archived node")));
        }
        let original = row
            .properties
            .get(&*PROP_ARCHIVED_ORIGINAL_PARENT_ASSOC)
            .and_then(PropertyValue::as_child_assoc_ref)
            .cloned();
        let original_owner = row
            .properties
            .get(&*PROP_ARCHIVED_ORIGINAL_OWNER)
            .cloned()
            .unwrap_or(PropertyValue::Null);

        let missing = |what: &str| {
            ArborError::InvalidArgument(format!(
                "{archived} has no recorded original {what}; give one explicitly"
            ))
        };
        let dest = match (dest_parent, &original) {
            (Some(dest), _) => dest.clone(),
            (None, Some(original)) => original.parent.clone(),
            (None, None) => return Err(missing("parent")),
        };
        let assoc_type = match (assoc_type, &original) {
            (Some(t), _) => t.clone(),
            (None, Some(original)) => original.assoc_type.clone(),
            (None, None) => return Err(missing("association type")),
        };
        let qname = match (qname, &original) {
            (Some(q), _) => q.clone(),
            (None, Some(original)) => original.qname.clone(),
            (None, None) => return Err(missing("association name")),
        };
        self.check_restore_target(id, archived, &dest, &assoc_type)?;

        self.before(BeforeEvent::RestoreNode {
            node: archived.clone(),
        })?;

        self.graph.remove_properties(
            id,
            [
                &*PROP_ARCHIVED_BY,
                &*PROP_ARCHIVED_DATE,
                &*PROP_ARCHIVED_ORIGINAL_PARENT_ASSOC,
                &*PROP_ARCHIVED_ORIGINAL_OWNER,
            ],
        )?;
        self.graph.remove_aspects(id, [&*ASPECT_ARCHIVED])?;
        match original_owner {
            PropertyValue::Text(owner) => {
                let owner = PropertyMap::from([(PROP_OWNER.clone(), PropertyValue::Text(owner))]);
                self.graph.set_properties(id, owner, false)?;
            }
            _ => {
                self.graph.remove_properties(id, [&*PROP_OWNER])?;
                self.graph.remove_aspects(id, [&*ASPECT_OWNABLE])?;
            }
        }
        let links: Vec<AssocId> = self
            .graph
            .parent_assocs(id)
            .filter(|a| a.assoc_type == *ASSOC_ARCHIVED_LINK)
            .map(|a| a.id)
            .collect();
        for link in links {
            self.graph.remove_child_assoc(link)?;
        }

        let assoc = self.move_node(archived, &dest, &assoc_type, &qname)?;
        debug!(node = %assoc.child, parent = %assoc.parent, "restored archived node");
        self.after(AfterEvent::RestoreNode {
            assoc: assoc.clone(),
        });
        Ok(assoc.child)
    }

    /// The checks the move back would make, done before any bookkeeping is
    /// stripped.
    fn check_restore_target(
        &self,
        id: NodeId,
        archived: &NodeRef,
        dest: &NodeRef,
        assoc_type: &QName,
    ) -> Result<(), ArborError> {
        let dest_id = self.resolve_mutable(dest)?;
        let dictionary = self.dictionary();
        let name = self.graph.effective_child_name(id)?;
        self.graph
            .check_child_name_free(dictionary.as_ref(), dest_id, assoc_type, &name, Some(id))?;

        if dest.store == archived.store {
            if self.graph.is_ancestor(id, dest_id)? {
                return Err(ArborError::CyclicRelationship {
                    parent: dest.clone(),
                    child: archived.clone(),
                });
            }
            return Ok(());
        }
        let dest_store = self.graph.require_live(dest_id)?.store;
        let hierarchy = walk_hierarchy(&self.graph, id)?;
        for visited in hierarchy.top_down() {
            if let Some(owner) = self.graph.uuid_owner(dest_store, &visited.node_ref.uuid)
                && self.graph.live_node(owner).is_some()
            {
                return Err(ArborError::NodeExists(self.graph.node_ref(owner)?));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{ArborConfig, ArchiveMapping};
    use crate::model::qnames::*;
    use crate::model::system_model;
    use crate::policy::EventRecorder;
    use crate::txn::Repository;
    use crate::{ArborError, AssocFilter, NodeRef, PropertyMap, QName, StoreRef};
    use std::sync::Arc;

    fn setup() -> (Repository, Arc<EventRecorder>, NodeRef, NodeRef) {
        let workspace = StoreRef::new("workspace", "SpacesStore");
        let archive = StoreRef::new("archive", "SpacesStore");
        let mut config = ArborConfig::default();
        config.repository.archive_stores = vec![ArchiveMapping {
            store: workspace.clone(),
            archive: archive.clone(),
        }];
        let recorder = Arc::new(EventRecorder::new());
        let repo = Repository::builder(Arc::new(system_model().build().expect("dictionary")))
            .config(config)
            .policy(Arc::clone(&recorder) as Arc<dyn crate::policy::NodePolicy>)
            .in_memory()
            .expect("repository");
        let (root, folder) = repo
            .retrying()
            .do_in_transaction(|txn| {
                let store = txn.create_store(&workspace.protocol, &workspace.identifier)?;
                txn.create_store(&archive.protocol, &archive.identifier)?;
                let root = txn.get_root_node(&store)?;
                let folder = txn
                    .create_node(
                        &root,
                        &ASSOC_CHILDREN,
                        &QName::new("cm", "f"),
                        &TYPE_FOLDER,
                        PropertyMap::from([(PROP_NAME.clone(), "f".into())]),
                    )?
                    .child;
                Ok((root, folder))
            })
            .expect("setup");
        (repo, recorder, root, folder)
    }

    #[test]
    fn restore_returns_node_to_original_parent() {
        let (repo, recorder, _, folder) = setup();
        let mut txn = repo.begin();
        let doc = txn
            .create_node(
                &folder,
                &ASSOC_CONTAINS,
                &QName::new("cm", "doc"),
                &TYPE_CONTENT,
                PropertyMap::from([(PROP_NAME.clone(), "doc.txt".into())]),
            )
            .expect("create")
            .child;
        // The internal id changes when the node moves between stores.
        let stored = |txn: &crate::Transaction| {
            let mut props = txn.get_properties(&doc).expect("props");
            props.remove(&*PROP_NODE_DBID);
            props
        };
        let before_props = stored(&txn);
        let before_aspects = txn.get_aspects(&doc).expect("aspects");
        txn.delete_node(&doc, true).expect("archive");
        txn.commit().expect("commit");

        let mut txn = repo.begin();
        let archived = NodeRef::new(StoreRef::new("archive", "SpacesStore"), doc.uuid.clone());
        let restored = txn
            .restore_node(&archived, None, None, None)
            .expect("restore");
        assert_eq!(restored, doc);
        assert!(!txn.exists(&archived));
        assert_eq!(stored(&txn), before_props);
        assert_eq!(txn.get_aspects(&doc).expect("aspects"), before_aspects);
        let parent = txn.get_primary_parent(&doc).expect("parent").expect("primary");
        assert_eq!(parent.parent, folder);
        assert_eq!(parent.assoc_type, *ASSOC_CONTAINS);
        assert_eq!(recorder.count_after("onRestoreNode"), 1);
    }

    #[test]
    fn restore_to_explicit_destination() {
        let (repo, _, root, folder) = setup();
        let mut txn = repo.begin();
        let doc = txn
            .create_node(&folder, &ASSOC_CONTAINS, &QName::new("cm", "doc"), &TYPE_CONTENT, PropertyMap::new())
            .expect("create")
            .child;
        txn.delete_node(&doc, true).expect("archive");
        let archived = NodeRef::new(StoreRef::new("archive", "SpacesStore"), doc.uuid.clone());
        txn.restore_node(&archived, Some(&root), Some(&ASSOC_CHILDREN), None)
            .expect("restore");
        let parent = txn.get_primary_parent(&doc).expect("parent").expect("primary");
        assert_eq!(parent.parent, root);
        assert_eq!(parent.qname, QName::new("cm", "doc"));
    }

    #[test]
    fn restore_keeps_an_original_owner() {
        let (repo, _, _, folder) = setup();
        let mut txn = repo.begin_as("bob");
        let doc = txn
            .create_node(&folder, &ASSOC_CONTAINS, &QName::new("cm", "doc"), &TYPE_CONTENT, PropertyMap::new())
            .expect("create")
            .child;
        txn.add_aspect(&doc, &ASPECT_OWNABLE, PropertyMap::from([(PROP_OWNER.clone(), "carol".into())]))
            .expect("owner");
        txn.delete_node(&doc, true).expect("archive");
        let archived = NodeRef::new(StoreRef::new("archive", "SpacesStore"), doc.uuid.clone());
        assert_eq!(txn.get_property(&archived, &PROP_OWNER).expect("owner"), Some("bob".into()));
        txn.restore_node(&archived, None, None, None).expect("restore");
        assert_eq!(txn.get_property(&doc, &PROP_OWNER).expect("owner"), Some("carol".into()));
        assert!(txn.has_aspect(&doc, &ASPECT_OWNABLE).expect("ownable"));
    }

    #[test]
    fn restore_clears_the_user_archive_link() {
        let (repo, _, _, folder) = setup();
        let mut txn = repo.begin();
        let doc = txn
            .create_node(&folder, &ASSOC_CONTAINS, &QName::new("cm", "doc"), &TYPE_CONTENT, PropertyMap::new())
            .expect("create")
            .child;
        txn.delete_node(&doc, true).expect("archive");
        let archived = NodeRef::new(StoreRef::new("archive", "SpacesStore"), doc.uuid.clone());
        txn.restore_node(&archived, None, None, None).expect("restore");
        let parents = txn.get_parent_assocs(&doc, AssocFilter::any()).expect("parents");
        assert_eq!(parents.len(), 1);
        assert!(parents[0].is_primary);
    }

    fn archive_doc(repo: &Repository, folder: &NodeRef) -> NodeRef {
        let mut txn = repo.begin();
        let doc = txn
            .create_node(
                folder,
                &ASSOC_CONTAINS,
                &QName::new("cm", "doc"),
                &TYPE_CONTENT,
                PropertyMap::from([(PROP_NAME.clone(), "doc.txt".into())]),
            )
            .expect("create")
            .child;
        txn.delete_node(&doc, true).expect("archive");
        txn.commit().expect("commit");
        NodeRef::new(StoreRef::new("archive", "SpacesStore"), doc.uuid)
    }

    #[test]
    fn name_clash_at_destination_leaves_archive_untouched() {
        let (repo, _, _, folder) = setup();
        let archived = archive_doc(&repo, &folder);
        repo.retrying()
            .do_in_transaction(|txn| {
                txn.create_node(
                    &folder,
                    &ASSOC_CONTAINS,
                    &QName::new("cm", "other"),
                    &TYPE_CONTENT,
                    PropertyMap::from([(PROP_NAME.clone(), "Doc.txt".into())]),
                )
            })
            .expect("sibling");

        let mut txn = repo.begin();
        let result = txn.restore_node(&archived, None, None, None);
        assert!(matches!(result, Err(ArborError::DuplicateChildName { .. })));
        assert!(txn.has_aspect(&archived, &ASPECT_ARCHIVED).expect("aspect"));
        assert!(
            txn.get_property(&archived, &PROP_ARCHIVED_ORIGINAL_PARENT_ASSOC)
                .expect("property")
                .is_some()
        );
        assert!(txn.is_rollback_only());
        assert!(matches!(txn.commit(), Err(ArborError::RollbackOnly(_))));

        let txn = repo.begin();
        assert!(txn.has_aspect(&archived, &ASPECT_ARCHIVED).expect("aspect"));
    }

    #[test]
    fn deleted_destination_is_rejected_before_any_write() {
        let (repo, recorder, _, folder) = setup();
        let archived = archive_doc(&repo, &folder);
        repo.retrying()
            .do_in_transaction(|txn| txn.delete_node(&folder, false))
            .expect("delete folder");
        recorder.clear();

        let mut txn = repo.begin();
        let result = txn.restore_node(&archived, None, None, None);
        assert!(matches!(result, Err(ArborError::NodeNotFound(_))));
        assert!(txn.has_aspect(&archived, &ASPECT_ARCHIVED).expect("aspect"));
        assert_eq!(recorder.count_before("beforeRestoreNode"), 0);
    }

    #[test]
    fn only_archived_nodes_can_be_restored() {
        let (repo, _, _, folder) = setup();
        let mut txn = repo.begin();
        let result = txn.restore_node(&folder, None, None, None);
        assert!(matches!(result, Err(ArborError::IllegalState(_))));
    }
}
