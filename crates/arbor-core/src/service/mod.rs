//! # Node Service
//!
//! The mutation engine: every public node operation, implemented on
//! [`Transaction`] so it sees the transaction's own writes and its
//! [`MutationContext`](crate::txn::MutationContext).
//!
//! | module       | operations                                                   |
//! |--------------|--------------------------------------------------------------|
//! | `stores`     | create/delete stores, roots, archive roots                   |
//! | `create`     | `create_node`                                                |
//! | `properties` | property writes                                              |
//! | `aspects`    | `add_aspect`, `remove_aspect`, `set_type`                    |
//! | `assocs`     | secondary child and peer associations                        |
//! | `delete`     | `delete_node`, archival, physical purge                      |
//! | `relocate`   | `move_node`, subtree copy between stores                     |
//! | `restore`    | `restore_node`                                               |
//!
//! Reads live here. Every read resolves the stable reference first and fails
//! with [`ArborError::NodeNotFound`] if it does not name a live node.

mod aspects;
mod assocs;
mod create;
mod delete;
mod properties;
mod relocate;
mod restore;
mod stores;

use crate::graph::associations::AssocFilter;
use crate::model::qnames::{ASPECT_AUDITABLE, PROP_NAME};
use crate::model::{AspectClosure, resolve_missing_aspects};
use crate::policy::{AfterEvent, IndexEvent};
use crate::primitives::MAX_HIERARCHY_DEPTH;
use crate::timestamps::modified_stamp;
use crate::txn::Transaction;
use crate::{
    ArborError, ChildAssocRef, NodeId, NodeRef, NodeStatus, PeerAssocRef, PropertyMap,
    PropertyValue, QName,
};
use std::collections::BTreeSet;
use std::fmt;

// =============================================================================
// PATHS
// =============================================================================

/// A path from a store root down to a node, one association per step.
///
/// The root itself has the empty path, displayed as `/`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodePath(pub Vec<ChildAssocRef>);

impl NodePath {
    #[must_use]
    pub fn elements(&self) -> &[ChildAssocRef] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        for element in &self.0 {
            write!(f, "/{}", element.qname)?;
        }
        Ok(())
    }
}

// =============================================================================
// READS
// =============================================================================

impl Transaction {
    /// Whether the reference names a live node.
    #[must_use]
    pub fn exists(&self, node: &NodeRef) -> bool {
        self.graph.exists(node)
    }

    /// Row status, available for deleted rows until they are purged.
    #[must_use]
    pub fn get_node_status(&self, node: &NodeRef) -> Option<NodeStatus> {
        self.graph.lookup_row(node).map(|row| NodeStatus {
            node_ref: node.clone(),
            node_id: row.id,
            txn_id: row.txn,
            deleted: row.deleted,
        })
    }

    pub fn get_type(&self, node: &NodeRef) -> Result<QName, ArborError> {
        Ok(self.graph.resolve_node(node)?.type_qname.clone())
    }

    pub fn get_aspects(&self, node: &NodeRef) -> Result<BTreeSet<QName>, ArborError> {
        Ok(self.graph.resolve_node(node)?.aspects.clone())
    }

    pub fn has_aspect(&self, node: &NodeRef, aspect: &QName) -> Result<bool, ArborError> {
        Ok(self.graph.resolve_node(node)?.aspects.contains(aspect))
    }

    /// Stored properties plus the referenceable properties.
    pub fn get_properties(&self, node: &NodeRef) -> Result<PropertyMap, ArborError> {
        let id = self.graph.resolve(node)?;
        self.graph.get_properties(id)
    }

    pub fn get_property(
        &self,
        node: &NodeRef,
        key: &QName,
    ) -> Result<Option<PropertyValue>, ArborError> {
        let id = self.graph.resolve(node)?;
        self.graph.get_property(id, key)
    }

    /// The primary parent association; `None` for a store root.
    pub fn get_primary_parent(&self, node: &NodeRef) -> Result<Option<ChildAssocRef>, ArborError> {
        let id = self.graph.resolve(node)?;
        self.graph
            .primary_parent_assoc(id)
            .map(|a| self.graph.child_assoc_ref(a))
            .transpose()
    }

    pub fn get_parent_assocs(
        &self,
        node: &NodeRef,
        filter: AssocFilter<'_>,
    ) -> Result<Vec<ChildAssocRef>, ArborError> {
        let id = self.graph.resolve(node)?;
        self.graph
            .parent_assocs(id)
            .filter(|a| filter.assoc_type.is_none_or(|t| t == &a.assoc_type))
            .filter(|a| filter.qname.is_none_or(|q| q == &a.qname))
            .map(|a| self.graph.child_assoc_ref(a))
            .collect()
    }

    /// Child associations, optionally sorted by sibling index.
    pub fn get_child_assocs(
        &self,
        node: &NodeRef,
        filter: AssocFilter<'_>,
        max_results: Option<usize>,
        ordered: bool,
    ) -> Result<Vec<ChildAssocRef>, ArborError> {
        let id = self.graph.resolve(node)?;
        self.graph
            .children(id, filter, max_results, ordered)
            .into_iter()
            .map(|a| self.graph.child_assoc_ref(a))
            .collect()
    }

    /// Case-insensitive lookup of a child by its effective name.
    pub fn get_child_by_name(
        &self,
        parent: &NodeRef,
        assoc_type: &QName,
        name: &str,
    ) -> Result<Option<NodeRef>, ArborError> {
        let id = self.graph.resolve(parent)?;
        self.graph
            .child_by_name(id, assoc_type, name)
            .map(|a| self.graph.node_ref(a.child))
            .transpose()
    }

    pub fn get_target_assocs(
        &self,
        node: &NodeRef,
        filter: AssocFilter<'_>,
    ) -> Result<Vec<PeerAssocRef>, ArborError> {
        let id = self.graph.resolve(node)?;
        self.graph
            .target_assocs(id, filter)
            .map(|a| self.graph.peer_assoc_ref(a))
            .collect()
    }

    pub fn get_source_assocs(
        &self,
        node: &NodeRef,
        filter: AssocFilter<'_>,
    ) -> Result<Vec<PeerAssocRef>, ArborError> {
        let id = self.graph.resolve(node)?;
        self.graph
            .source_assocs(id, filter)
            .map(|a| self.graph.peer_assoc_ref(a))
            .collect()
    }

    /// The path along primary parents from the store root.
    pub fn get_path(&self, node: &NodeRef) -> Result<NodePath, ArborError> {
        let mut current = self.graph.resolve(node)?;
        let mut elements = Vec::new();
        while let Some(assoc) = self.graph.primary_parent_assoc(current) {
            if elements.len() >= MAX_HIERARCHY_DEPTH {
                return Err(ArborError::IllegalState(format!(
                    "primary path of {node} exceeds {MAX_HIERARCHY_DEPTH} levels"
                )));
            }
            elements.push(self.graph.child_assoc_ref(assoc)?);
            current = assoc.parent;
        }
        elements.reverse();
        Ok(NodePath(elements))
    }

    /// Every path to the node through any parent association.
    ///
    /// Paths that would revisit a node are cut off, so secondary links that
    /// form loops still yield a finite result.
    pub fn get_paths(&self, node: &NodeRef, primary_only: bool) -> Result<Vec<NodePath>, ArborError> {
        let id = self.graph.resolve(node)?;
        let mut paths = Vec::new();
        // (node, path so far bottom-up, nodes on the path)
        let mut stack = vec![(id, Vec::new(), BTreeSet::from([id]))];
        while let Some((current, path, on_path)) = stack.pop() {
            let parents: Vec<_> = self
                .graph
                .parent_assocs(current)
                .filter(|a| !primary_only || a.is_primary)
                .collect();
            if parents.is_empty() || path.len() >= MAX_HIERARCHY_DEPTH {
                let mut elements: Vec<ChildAssocRef> = path;
                elements.reverse();
                paths.push(NodePath(elements));
                continue;
            }
            for assoc in parents {
                if on_path.contains(&assoc.parent) {
                    continue;
                }
                let mut next_path = path.clone();
                next_path.push(self.graph.child_assoc_ref(assoc)?);
                let mut next_on_path = on_path.clone();
                next_on_path.insert(assoc.parent);
                stack.push((assoc.parent, next_path, next_on_path));
            }
        }
        paths.sort_by_key(ToString::to_string);
        Ok(paths)
    }
}

// =============================================================================
// SHARED HELPERS
// =============================================================================

impl Transaction {
    /// Resolve a reference to a live node that is not being deleted.
    pub(crate) fn resolve_mutable(&self, node: &NodeRef) -> Result<NodeId, ArborError> {
        let id = self.graph.resolve(node)?;
        self.check_not_pending(id)?;
        Ok(id)
    }

    pub(crate) fn check_not_pending(&self, id: NodeId) -> Result<(), ArborError> {
        if self.ctx.is_pending(id) {
            return Err(ArborError::PendingDelete(self.graph.node_ref(id)?));
        }
        Ok(())
    }

    /// Add the closure's missing aspects and any default values the node
    /// does not carry yet. Returns the aspects that were added.
    pub(crate) fn apply_closure(
        &mut self,
        id: NodeId,
        closure: AspectClosure,
    ) -> Result<Vec<QName>, ArborError> {
        let row = self.graph.require_live(id)?;
        let added: Vec<QName> = closure
            .missing
            .iter()
            .filter(|a| !row.aspects.contains(*a))
            .cloned()
            .collect();
        let defaults: PropertyMap = closure
            .defaults
            .into_iter()
            .filter(|(k, _)| !row.properties.contains_key(k))
            .collect();
        self.graph.add_aspects(id, added.iter())?;
        if !defaults.is_empty() {
            self.graph.set_properties(id, defaults, false)?;
        }
        Ok(added)
    }

    /// Missing-aspect closure for the node's current state seen as `class`.
    pub(crate) fn closure_for(&self, id: NodeId, class: &QName) -> Result<AspectClosure, ArborError> {
        let row = self.graph.require_live(id)?;
        Ok(resolve_missing_aspects(
            self.dictionary().as_ref(),
            class,
            &row.aspects,
            row.properties.keys(),
        ))
    }

    /// Finish a node update: keep child names in sync, stamp the auditable
    /// properties and fire the update events.
    ///
    /// `structural` marks changes other than property values (aspects,
    /// type) that still count as a modification.
    pub(crate) fn finish_update(
        &mut self,
        id: NodeId,
        before: PropertyMap,
        structural: bool,
    ) -> Result<(), ArborError> {
        let row = self.graph.require_live(id)?;
        let changed = structural || row.properties != before;
        if !changed {
            return Ok(());
        }
        if row.properties.get(&*PROP_NAME) != before.get(&*PROP_NAME) {
            let dictionary = self.dictionary();
            self.graph.refresh_child_names(dictionary.as_ref(), id)?;
        }
        if self.graph.require_live(id)?.aspects.contains(&*ASPECT_AUDITABLE) {
            let stamp = modified_stamp(self.now_ms(), self.user());
            self.graph.set_properties(id, stamp, false)?;
        }

        let node = self.graph.node_ref(id)?;
        let after = self.graph.require_live(id)?.properties.clone();
        if after != before {
            self.after(AfterEvent::UpdateProperties {
                node: node.clone(),
                before,
                after,
            });
        }
        self.after(AfterEvent::UpdateNode { node: node.clone() });
        self.index(IndexEvent::Update(node));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::qnames::{ASSOC_CHILDREN, ASSOC_CONTAINS, TYPE_BASE, TYPE_FOLDER};
    use crate::model::system_model;
    use crate::txn::Repository;
    use crate::StoreRef;
    use std::sync::Arc;

    fn setup() -> (Repository, NodeRef) {
        let dictionary = Arc::new(system_model().build().expect("dictionary"));
        let repo = Repository::builder(dictionary)
            .in_memory()
            .expect("repository");
        let root = repo
            .retrying()
            .do_in_transaction(|txn| {
                let store = txn.create_store("workspace", "SpacesStore")?;
                txn.get_root_node(&store)
            })
            .expect("store");
        (repo, root)
    }

    fn named(name: &str) -> PropertyMap {
        PropertyMap::from([(PROP_NAME.clone(), name.into())])
    }

    #[test]
    fn path_follows_primary_parents() {
        let (repo, root) = setup();
        let mut txn = repo.begin();
        let a = txn
            .create_node(&root, &ASSOC_CHILDREN, &QName::new("cm", "a"), &TYPE_FOLDER, named("a"))
            .expect("a")
            .child;
        let b = txn
            .create_node(&a, &ASSOC_CONTAINS, &QName::new("cm", "b"), &TYPE_FOLDER, named("b"))
            .expect("b")
            .child;
        assert_eq!(txn.get_path(&b).expect("path").to_string(), "/cm:a/cm:b");
        assert_eq!(txn.get_path(&root).expect("root path").to_string(), "/");
    }

    #[test]
    fn paths_include_secondary_parents() {
        let (repo, root) = setup();
        let mut txn = repo.begin();
        let a = txn
            .create_node(&root, &ASSOC_CHILDREN, &QName::new("cm", "a"), &TYPE_FOLDER, named("a"))
            .expect("a")
            .child;
        let b = txn
            .create_node(&root, &ASSOC_CHILDREN, &QName::new("cm", "b"), &TYPE_BASE, PropertyMap::new())
            .expect("b")
            .child;
        txn.add_child(&a, &b, &ASSOC_CONTAINS, &QName::new("cm", "link"))
            .expect("link");
        let paths: Vec<String> = txn
            .get_paths(&b, false)
            .expect("paths")
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(paths, vec!["/cm:a/cm:link".to_string(), "/cm:b".to_string()]);
        assert_eq!(txn.get_paths(&b, true).expect("primary").len(), 1);
    }

    #[test]
    fn child_lookup_is_case_insensitive() {
        let (repo, root) = setup();
        let mut txn = repo.begin();
        let a = txn
            .create_node(&root, &ASSOC_CHILDREN, &QName::new("cm", "a"), &TYPE_FOLDER, named("a"))
            .expect("a")
            .child;
        let doc = txn
            .create_node(&a, &ASSOC_CONTAINS, &QName::new("cm", "doc"), &TYPE_FOLDER, named("Report.TXT"))
            .expect("doc")
            .child;
        assert_eq!(
            txn.get_child_by_name(&a, &ASSOC_CONTAINS, "report.txt")
                .expect("lookup"),
            Some(doc)
        );
    }

    #[test]
    fn status_survives_deletion() {
        let (repo, root) = setup();
        let mut txn = repo.begin();
        let node = txn
            .create_node(&root, &ASSOC_CHILDREN, &QName::new("cm", "n"), &TYPE_BASE, PropertyMap::new())
            .expect("create")
            .child;
        txn.delete_node(&node, false).expect("delete");
        let status = txn.get_node_status(&node).expect("status");
        assert!(status.deleted);
        assert!(!txn.exists(&node));
        assert!(matches!(txn.get_type(&node), Err(ArborError::NodeNotFound(_))));
        let missing = NodeRef::new(StoreRef::new("workspace", "SpacesStore"), "nope");
        assert!(txn.get_node_status(&missing).is_none());
    }
}
