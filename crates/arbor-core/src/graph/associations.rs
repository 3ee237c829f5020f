//! # Association Graph
//!
//! Typed parent/child (primary or secondary) and peer associations.
//!
//! Invariants enforced on every write:
//! - a node has at most one primary parent association
//! - no association may make a node its own ancestor
//! - under an association type that forbids duplicate child names, the
//!   lower-cased effective child name is unique per parent
//! - peer associations are unique per `(source, target, type)` unless the
//!   type allows duplicates

use super::{GraphState, RowKey, WorkingGraph};
use crate::model::Dictionary;
use crate::model::qnames::PROP_NAME;
use crate::primitives::MAX_HIERARCHY_DEPTH;
use crate::{
    ArborError, AssocId, ChildAssoc, ChildAssocRef, NodeId, PeerAssoc, PeerAssocId, PeerAssocRef,
    QName,
};
use std::collections::{BTreeSet, VecDeque};

/// Filter for association listings. `None` matches everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssocFilter<'a> {
    pub assoc_type: Option<&'a QName>,
    pub qname: Option<&'a QName>,
}

impl<'a> AssocFilter<'a> {
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn of_type(assoc_type: &'a QName) -> Self {
        Self {
            assoc_type: Some(assoc_type),
            qname: None,
        }
    }

    fn matches(&self, assoc_type: &QName, qname: Option<&QName>) -> bool {
        self.assoc_type.is_none_or(|t| t == assoc_type)
            && match (self.qname, qname) {
                (Some(wanted), Some(actual)) => wanted == actual,
                (Some(_), None) => false,
                (None, _) => true,
            }
    }
}

/// Hash of a lower-cased child name, stored next to the name as a pre-check.
#[must_use]
pub fn child_name_crc(name: &str) -> u64 {
    let hash = blake3::hash(name.to_lowercase().as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

// =============================================================================
// READS
// =============================================================================

impl GraphState {
    /// All parent associations of a node, in id order.
    pub fn parent_assocs(&self, child: NodeId) -> impl Iterator<Item = &ChildAssoc> {
        self.parents_of
            .get(&child)
            .into_iter()
            .flatten()
            .filter_map(|id| self.child_assocs.get(id))
    }

    /// All child associations of a node, in id order.
    pub fn child_assocs_of(&self, parent: NodeId) -> impl Iterator<Item = &ChildAssoc> {
        self.children_of
            .get(&parent)
            .into_iter()
            .flatten()
            .filter_map(|id| self.child_assocs.get(id))
    }

    #[must_use]
    pub fn primary_parent_assoc(&self, child: NodeId) -> Option<&ChildAssoc> {
        self.parent_assocs(child).find(|a| a.is_primary)
    }

    /// Filtered child associations.
    ///
    /// With `ordered` the result is sorted by sibling index, ties broken by
    /// association id; otherwise it is in association id order.
    #[must_use]
    pub fn children(
        &self,
        parent: NodeId,
        filter: AssocFilter<'_>,
        max_results: Option<usize>,
        ordered: bool,
    ) -> Vec<&ChildAssoc> {
        let mut assocs: Vec<&ChildAssoc> = self
            .child_assocs_of(parent)
            .filter(|a| filter.matches(&a.assoc_type, Some(&a.qname)))
            .collect();
        if ordered {
            assocs.sort_by_key(|a| (a.index, a.id));
        }
        if let Some(max) = max_results {
            assocs.truncate(max);
        }
        assocs
    }

    /// Child with the given name under the association type, case-insensitive.
    #[must_use]
    pub fn child_by_name(&self, parent: NodeId, assoc_type: &QName, name: &str) -> Option<&ChildAssoc> {
        let lower = name.to_lowercase();
        if let Some(id) = self
            .unique_names
            .get(&(parent, assoc_type.clone(), lower.clone()))
        {
            return self.child_assocs.get(id);
        }
        let crc = child_name_crc(name);
        self.child_assocs_of(parent).find(|a| {
            &a.assoc_type == assoc_type
                && a.child_name_crc == crc
                && a.child_name.to_lowercase() == lower
        })
    }

    /// Outgoing peer associations, in id order.
    pub fn target_assocs<'a>(
        &'a self,
        source: NodeId,
        filter: AssocFilter<'a>,
    ) -> impl Iterator<Item = &'a PeerAssoc> {
        self.outgoing
            .get(&source)
            .into_iter()
            .flatten()
            .filter_map(|id| self.peer_assocs.get(id))
            .filter(move |a| filter.matches(&a.assoc_type, None))
    }

    /// Incoming peer associations, in id order.
    pub fn source_assocs<'a>(
        &'a self,
        target: NodeId,
        filter: AssocFilter<'a>,
    ) -> impl Iterator<Item = &'a PeerAssoc> {
        self.incoming
            .get(&target)
            .into_iter()
            .flatten()
            .filter_map(|id| self.peer_assocs.get(id))
            .filter(move |a| filter.matches(&a.assoc_type, None))
    }

    /// The `cm:name` of a node, or its UUID when it has none.
    pub fn effective_child_name(&self, node: NodeId) -> Result<String, ArborError> {
        let row = self.node_row(node).ok_or_else(|| {
            ArborError::IllegalState(format!("node row {} does not exist", node.0))
        })?;
        Ok(row
            .properties
            .get(&*PROP_NAME)
            .and_then(|v| v.as_text())
            .map_or_else(|| row.uuid.clone(), str::to_string))
    }

    /// Whether `ancestor` can be reached from `node` by walking parent
    /// associations of any kind. A node is its own ancestor.
    ///
    /// Fails when the ancestry is deeper than [`MAX_HIERARCHY_DEPTH`].
    pub fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> Result<bool, ArborError> {
        self.walk_ancestors(ancestor, node, |_| {})
    }

    /// Breadth-first search for `ancestor` above `node`. `visit` sees every
    /// node whose parent associations were read.
    pub fn walk_ancestors(
        &self,
        ancestor: NodeId,
        node: NodeId,
        mut visit: impl FnMut(NodeId),
    ) -> Result<bool, ArborError> {
        let mut queue = VecDeque::from([(node, 0usize)]);
        let mut visited = BTreeSet::from([node]);
        while let Some((current, depth)) = queue.pop_front() {
            if current == ancestor {
                return Ok(true);
            }
            visit(current);
            let mut parents = self.parent_assocs(current).peekable();
            if depth >= MAX_HIERARCHY_DEPTH && parents.peek().is_some() {
                return Err(ArborError::IllegalState(format!(
                    "ancestry of node {} exceeds {MAX_HIERARCHY_DEPTH} levels",
                    node.0
                )));
            }
            for assoc in parents {
                if visited.insert(assoc.parent) {
                    queue.push_back((assoc.parent, depth.saturating_add(1)));
                }
            }
        }
        Ok(false)
    }

    pub fn child_assoc_ref(&self, assoc: &ChildAssoc) -> Result<ChildAssocRef, ArborError> {
        Ok(ChildAssocRef {
            id: assoc.id,
            assoc_type: assoc.assoc_type.clone(),
            parent: self.node_ref(assoc.parent)?,
            qname: assoc.qname.clone(),
            child: self.node_ref(assoc.child)?,
            is_primary: assoc.is_primary,
            index: assoc.index,
        })
    }

    pub fn peer_assoc_ref(&self, assoc: &PeerAssoc) -> Result<PeerAssocRef, ArborError> {
        Ok(PeerAssocRef {
            id: assoc.id,
            source: self.node_ref(assoc.source)?,
            target: self.node_ref(assoc.target)?,
            assoc_type: assoc.assoc_type.clone(),
            index: assoc.index,
        })
    }
}

// =============================================================================
// WRITES
// =============================================================================

/// Arguments of a new child association.
#[derive(Debug, Clone)]
pub struct NewChildAssoc {
    pub parent: NodeId,
    pub child: NodeId,
    pub assoc_type: QName,
    pub qname: QName,
    pub is_primary: bool,
    pub index: i32,
}

impl WorkingGraph {
    fn unique_name_for(
        &self,
        dictionary: &dyn Dictionary,
        assoc_type: &QName,
        name: &str,
    ) -> Result<Option<String>, ArborError> {
        let def = dictionary
            .get_association(assoc_type)
            .filter(|d| d.is_child())
            .ok_or_else(|| ArborError::InvalidAssociation(assoc_type.clone()))?;
        Ok((!def.duplicate_child_names).then(|| name.to_lowercase()))
    }

    fn check_unique(&self, assoc: &ChildAssoc) -> Result<(), ArborError> {
        let Some(name) = &assoc.unique_name else {
            return Ok(());
        };
        let key = (assoc.parent, assoc.assoc_type.clone(), name.clone());
        match self.unique_names.get(&key) {
            Some(existing) if *existing != assoc.id => Err(ArborError::DuplicateChildName {
                parent: self.node_ref(assoc.parent)?,
                name: assoc.child_name.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Fail with `DuplicateChildName` if a child other than `child` already
    /// uses `name` under `parent` and `assoc_type`.
    pub fn check_child_name_free(
        &self,
        dictionary: &dyn Dictionary,
        parent: NodeId,
        assoc_type: &QName,
        name: &str,
        child: Option<NodeId>,
    ) -> Result<(), ArborError> {
        let Some(unique) = self.unique_name_for(dictionary, assoc_type, name)? else {
            return Ok(());
        };
        let holder = self
            .unique_names
            .get(&(parent, assoc_type.clone(), unique))
            .and_then(|id| self.child_assocs.get(id))
            .map(|a| a.child);
        match holder {
            Some(holder) if Some(holder) != child => Err(ArborError::DuplicateChildName {
                parent: self.node_ref(parent)?,
                name: name.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Create a parent/child association.
    ///
    /// Rejects store roots as children, a second primary parent and any
    /// association that would make a node its own ancestor; nothing is
    /// written when a check fails. Every node the cycle check walked past is
    /// observed, so a concurrent reparenting above `parent` conflicts.
    pub fn new_child_assoc(
        &mut self,
        dictionary: &dyn Dictionary,
        spec: NewChildAssoc,
    ) -> Result<AssocId, ArborError> {
        self.require_live(spec.parent)?;
        let child_store = self.require_live(spec.child)?.store;
        if self.store(child_store).is_some_and(|s| s.root == spec.child) {
            return Err(ArborError::IllegalState(format!(
                "store root {} cannot become a child",
                self.node_ref(spec.child)?
            )));
        }

        if spec.is_primary
            && let Some(existing) = self.primary_parent_assoc(spec.child)
        {
            return Err(ArborError::AssociationCardinality(format!(
                "{} already has a primary parent through association {}",
                self.node_ref(spec.child)?,
                existing.id.0
            )));
        }
        let mut walked = Vec::new();
        let cyclic = self.walk_ancestors(spec.child, spec.parent, |id| walked.push(id))?;
        self.observe(walked.into_iter().map(RowKey::Parents));
        if cyclic {
            return Err(ArborError::CyclicRelationship {
                parent: self.node_ref(spec.parent)?,
                child: self.node_ref(spec.child)?,
            });
        }

        let child_name = self.effective_child_name(spec.child)?;
        let unique_name = self.unique_name_for(dictionary, &spec.assoc_type, &child_name)?;
        let row = ChildAssoc {
            id: self.ids().assoc(),
            parent: spec.parent,
            child: spec.child,
            assoc_type: spec.assoc_type,
            qname: spec.qname,
            index: spec.index,
            is_primary: spec.is_primary,
            child_name_crc: child_name_crc(&child_name),
            child_name,
            unique_name,
        };
        self.check_unique(&row)?;

        let id = row.id;
        self.write_child_assoc(row);
        self.touch_node(spec.child);
        Ok(id)
    }

    /// Recompute the cached name of every parent association of `child`.
    ///
    /// Fails with `DuplicateChildName` (leaving earlier associations updated;
    /// the transaction is expected to roll back) if a sibling uses the name.
    pub fn refresh_child_names(
        &mut self,
        dictionary: &dyn Dictionary,
        child: NodeId,
    ) -> Result<(), ArborError> {
        let child_name = self.effective_child_name(child)?;
        let crc = child_name_crc(&child_name);
        let assocs: Vec<ChildAssoc> = self.parent_assocs(child).cloned().collect();
        for mut assoc in assocs {
            let unique_name = self.unique_name_for(dictionary, &assoc.assoc_type, &child_name)?;
            if assoc.child_name == child_name && assoc.unique_name == unique_name {
                continue;
            }
            assoc.child_name = child_name.clone();
            assoc.child_name_crc = crc;
            assoc.unique_name = unique_name;
            self.check_unique(&assoc)?;
            self.write_child_assoc(assoc);
        }
        Ok(())
    }

    /// Remove a child association row and re-stamp the child.
    pub fn remove_child_assoc(&mut self, id: AssocId) -> Result<ChildAssoc, ArborError> {
        let assoc = self
            .child_assoc(id)
            .cloned()
            .ok_or(ArborError::InvalidChildAssociation(id))?;
        self.remove_child_assoc_row(id);
        if self.live_node(assoc.child).is_some() {
            self.touch_node(assoc.child);
        }
        Ok(assoc)
    }

    pub fn set_child_index(&mut self, id: AssocId, index: i32) -> Result<(), ArborError> {
        let mut assoc = self
            .child_assoc(id)
            .cloned()
            .ok_or(ArborError::InvalidChildAssociation(id))?;
        if assoc.index != index {
            assoc.index = index;
            self.write_child_assoc(assoc);
        }
        Ok(())
    }

    /// Create a peer association.
    pub fn new_peer_assoc(
        &mut self,
        dictionary: &dyn Dictionary,
        source: NodeId,
        target: NodeId,
        assoc_type: &QName,
    ) -> Result<PeerAssocId, ArborError> {
        self.require_live(source)?;
        self.require_live(target)?;
        let def = dictionary
            .get_association(assoc_type)
            .filter(|d| !d.is_child())
            .ok_or_else(|| ArborError::InvalidAssociation(assoc_type.clone()))?;

        let existing: Vec<&PeerAssoc> = self
            .target_assocs(source, AssocFilter::of_type(assoc_type))
            .collect();
        if !def.allow_duplicates && existing.iter().any(|a| a.target == target) {
            return Err(ArborError::DuplicatePeerAssociation {
                source_ref: self.node_ref(source)?,
                target: self.node_ref(target)?,
                assoc_type: assoc_type.clone(),
            });
        }
        let index = existing
            .iter()
            .map(|a| a.index)
            .max()
            .map_or(1, |max| max.saturating_add(1));

        let row = PeerAssoc {
            id: self.ids().peer(),
            source,
            target,
            assoc_type: assoc_type.clone(),
            index,
        };
        let id = row.id;
        self.write_peer_assoc(row);
        self.touch_node(source);
        Ok(id)
    }

    pub fn remove_peer_assoc(&mut self, id: PeerAssocId) -> Result<PeerAssoc, ArborError> {
        let assoc = self.peer_assoc(id).cloned().ok_or_else(|| {
            ArborError::InvalidArgument(format!("peer association {} does not exist", id.0))
        })?;
        self.remove_peer_assoc_row(id);
        if self.live_node(assoc.source).is_some() {
            self.touch_node(assoc.source);
        }
        Ok(assoc)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Counters, IdAllocator};
    use crate::model::{AssociationSpec, ClassSpec, DictionaryBuilder, InMemoryDictionary};
    use crate::primitives::DEFAULT_CHILD_INDEX;
    use crate::{NodeRecord, PropertyValue, StoreId, StoreRecord, StoreRef, TxnId};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn q(s: &str) -> QName {
        s.parse().expect("qname")
    }

    fn dictionary() -> InMemoryDictionary {
        DictionaryBuilder::new()
            .add_type(ClassSpec::new(q("t:node")))
            .add_association(AssociationSpec::child(q("t:contains"), q("t:node")))
            .add_association(AssociationSpec::child(q("t:links"), q("t:node")).duplicate_names())
            .add_association(AssociationSpec::peer(q("t:refs"), q("t:node")))
            .build()
            .expect("dictionary")
    }

    fn graph(nodes: &[(u64, Option<&str>)]) -> WorkingGraph {
        let mut state = GraphState::new();
        state.put_store(
            StoreId(1),
            Some(StoreRecord {
                id: StoreId(1),
                store_ref: StoreRef::new("workspace", "test"),
                root: NodeId(100),
            }),
        );
        for (id, name) in nodes {
            let mut properties = BTreeMap::new();
            if let Some(name) = name {
                properties.insert(PROP_NAME.clone(), PropertyValue::from(*name));
            }
            state.put_node(
                NodeId(*id),
                Some(NodeRecord {
                    id: NodeId(*id),
                    store: StoreId(1),
                    uuid: format!("n{id}"),
                    type_qname: q("t:node"),
                    aspects: BTreeSet::new(),
                    properties,
                    acl: None,
                    txn: TxnId(1),
                    deleted: false,
                }),
            );
        }
        WorkingGraph::new(Arc::new(state), Arc::new(IdAllocator::new(Counters::default())))
    }

    fn link(parent: u64, child: u64, assoc_type: &str, is_primary: bool) -> NewChildAssoc {
        NewChildAssoc {
            parent: NodeId(parent),
            child: NodeId(child),
            assoc_type: q(assoc_type),
            qname: q("t:item"),
            is_primary,
            index: DEFAULT_CHILD_INDEX,
        }
    }

    #[test]
    fn reverse_primary_association_is_cyclic_and_leaves_graph_unchanged() {
        let dict = dictionary();
        let mut g = graph(&[(1, None), (2, None)]);
        g.new_child_assoc(&dict, link(1, 2, "t:contains", true))
            .expect("first");
        let before = g.dirty().len();

        let result = g.new_child_assoc(&dict, link(2, 1, "t:contains", true));
        assert!(matches!(result, Err(ArborError::CyclicRelationship { .. })));
        assert!(g.primary_parent_assoc(NodeId(1)).is_none());
        assert_eq!(g.dirty().len(), before);
    }

    /// Nodes `1..=len` where each node is the primary parent of the next.
    fn chain(len: u64) -> WorkingGraph {
        let nodes: Vec<(u64, Option<&str>)> = (1..=len).map(|id| (id, None)).collect();
        let mut g = graph(&nodes);
        for id in 1..len {
            let assoc = AssocId(1_000_000 + id);
            g.state_mut().put_child_assoc(
                assoc,
                Some(ChildAssoc {
                    id: assoc,
                    parent: NodeId(id),
                    child: NodeId(id + 1),
                    assoc_type: q("t:links"),
                    qname: q("t:item"),
                    index: DEFAULT_CHILD_INDEX,
                    is_primary: true,
                    child_name: format!("n{}", id + 1),
                    unique_name: None,
                    child_name_crc: 0,
                }),
            );
        }
        g
    }

    #[test]
    fn ancestry_beyond_depth_bound_is_an_error() {
        let dict = dictionary();
        let len = MAX_HIERARCHY_DEPTH as u64 + 2;
        let mut g = chain(len);

        let result = g.is_ancestor(NodeId(1), NodeId(len));
        assert!(matches!(result, Err(ArborError::IllegalState(_))));

        let linked = g.new_child_assoc(&dict, link(len, 1, "t:links", false));
        assert!(matches!(linked, Err(ArborError::IllegalState(_))));
        assert_eq!(g.parent_assocs(NodeId(1)).count(), 0);
        assert!(g.dirty().is_empty());
    }

    #[test]
    fn ancestry_within_depth_bound_is_found() {
        let len = MAX_HIERARCHY_DEPTH as u64;
        let g = chain(len);
        assert!(g.is_ancestor(NodeId(1), NodeId(len)).expect("ancestry"));
        assert!(!g.is_ancestor(NodeId(len), NodeId(1)).expect("ancestry"));
    }

    #[test]
    fn cycle_check_observes_walked_parents() {
        let dict = dictionary();
        let mut g = chain(3);
        let result = g.new_child_assoc(&dict, link(3, 1, "t:links", false));
        assert!(matches!(result, Err(ArborError::CyclicRelationship { .. })));
        assert!(g.reads().contains(&RowKey::Parents(NodeId(3))));
        assert!(g.reads().contains(&RowKey::Parents(NodeId(2))));

        g.new_child_assoc(&dict, link(1, 3, "t:links", false))
            .expect("secondary");
        assert!(g.reads().contains(&RowKey::Parents(NodeId(1))));
        assert!(g.is_dirty(&RowKey::Parents(NodeId(3))));
    }

    #[test]
    fn store_root_cannot_become_a_child() {
        let dict = dictionary();
        let mut g = graph(&[(1, None), (100, None)]);
        let result = g.new_child_assoc(&dict, link(1, 100, "t:links", false));
        assert!(matches!(result, Err(ArborError::IllegalState(_))));
        assert_eq!(g.parent_assocs(NodeId(100)).count(), 0);
    }

    #[test]
    fn self_association_is_cyclic() {
        let dict = dictionary();
        let mut g = graph(&[(1, None)]);
        let result = g.new_child_assoc(&dict, link(1, 1, "t:links", false));
        assert!(matches!(result, Err(ArborError::CyclicRelationship { .. })));
    }

    #[test]
    fn second_primary_parent_is_rejected() {
        let dict = dictionary();
        let mut g = graph(&[(1, None), (2, None), (3, None)]);
        g.new_child_assoc(&dict, link(1, 3, "t:contains", true))
            .expect("primary");
        let result = g.new_child_assoc(&dict, link(2, 3, "t:contains", true));
        assert!(matches!(result, Err(ArborError::AssociationCardinality(_))));
        g.new_child_assoc(&dict, link(2, 3, "t:contains", false))
            .expect("secondary is fine");
    }

    #[test]
    fn duplicate_names_rejected_case_insensitively() {
        let dict = dictionary();
        let mut g = graph(&[(1, None), (2, Some("a.txt")), (3, Some("A.TXT"))]);
        g.new_child_assoc(&dict, link(1, 2, "t:contains", true))
            .expect("first");
        let result = g.new_child_assoc(&dict, link(1, 3, "t:contains", true));
        assert!(matches!(result, Err(ArborError::DuplicateChildName { .. })));

        g.new_child_assoc(&dict, link(1, 3, "t:links", false))
            .expect("duplicates allowed");
        let found = g
            .child_by_name(NodeId(1), &q("t:contains"), "A.txt")
            .expect("lookup");
        assert_eq!(found.child, NodeId(2));
    }

    #[test]
    fn ordered_children_sort_by_index_then_id() {
        let dict = dictionary();
        let mut g = graph(&[(1, None), (2, None), (3, None), (4, None)]);
        let a = g
            .new_child_assoc(&dict, link(1, 2, "t:contains", true))
            .expect("a");
        g.new_child_assoc(&dict, link(1, 3, "t:contains", true))
            .expect("b");
        g.new_child_assoc(&dict, link(1, 4, "t:contains", true))
            .expect("c");
        g.set_child_index(a, 5).expect("index");

        let ordered: Vec<NodeId> = g
            .children(NodeId(1), AssocFilter::any(), None, true)
            .iter()
            .map(|a| a.child)
            .collect();
        assert_eq!(ordered, vec![NodeId(3), NodeId(4), NodeId(2)]);

        let limited = g.children(NodeId(1), AssocFilter::any(), Some(1), true);
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn set_index_on_missing_assoc_fails() {
        let mut g = graph(&[(1, None)]);
        assert!(matches!(
            g.set_child_index(AssocId(99), 1),
            Err(ArborError::InvalidChildAssociation(_))
        ));
    }

    #[test]
    fn peer_duplicates_rejected_and_indexes_increase() {
        let dict = dictionary();
        let mut g = graph(&[(1, None), (2, None), (3, None)]);
        g.new_peer_assoc(&dict, NodeId(1), NodeId(2), &q("t:refs"))
            .expect("first");
        let second = g
            .new_peer_assoc(&dict, NodeId(1), NodeId(3), &q("t:refs"))
            .expect("second");
        assert_eq!(g.peer_assoc(second).map(|a| a.index), Some(2));
        assert!(matches!(
            g.new_peer_assoc(&dict, NodeId(1), NodeId(2), &q("t:refs")),
            Err(ArborError::DuplicatePeerAssociation { .. })
        ));
        assert_eq!(g.source_assocs(NodeId(2), AssocFilter::any()).count(), 1);
    }

    #[test]
    fn null_name_falls_back_to_uuid() {
        let dict = dictionary();
        let mut g = graph(&[(1, None), (2, None)]);
        let id = g
            .new_child_assoc(&dict, link(1, 2, "t:contains", true))
            .expect("assoc");
        assert_eq!(
            g.child_assoc(id).and_then(|a| a.unique_name.clone()),
            Some("n2".to_string())
        );
    }

    #[test]
    fn crc_is_case_insensitive() {
        assert_eq!(child_name_crc("Hello.TXT"), child_name_crc("hello.txt"));
        assert_ne!(child_name_crc("a"), child_name_crc("b"));
    }
}
