//! # Hierarchy Walker
//!
//! Point-in-time snapshot of the primary subtree under a node, consumed by
//! the delete, archive and cross-store move cascades.
//!
//! The walk descends along primary child associations only. For every
//! visited node it records the associations that touch the node but are not
//! part of the primary tree (secondary parents and children, outgoing and
//! incoming peers) so the cascade can decide what to recreate and what to
//! drop. Two orderings are produced: parents before children (top-down, for
//! re-creation) and children before parents (bottom-up, for removal).
//!
//! The walk uses an explicit stack; deep hierarchies never grow the call
//! stack.

use crate::graph::GraphState;
use crate::graph::associations::AssocFilter;
use crate::{AclId, ArborError, ChildAssoc, NodeId, NodeRef, PeerAssoc, QName};
use std::collections::{BTreeMap, BTreeSet};

/// What the walker recorded about one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitedNode {
    pub id: NodeId,
    pub node_ref: NodeRef,
    pub type_qname: QName,
    pub acl: Option<AclId>,
    /// `None` only for a store root.
    pub primary_parent: Option<ChildAssoc>,
    pub secondary_parents: Vec<ChildAssoc>,
    pub secondary_children: Vec<ChildAssoc>,
    pub target_assocs: Vec<PeerAssoc>,
    pub source_assocs: Vec<PeerAssoc>,
}

/// A walked hierarchy.
#[derive(Debug, Clone)]
pub struct NodeHierarchy {
    root: NodeId,
    visited: BTreeMap<NodeId, VisitedNode>,
    top_down: Vec<NodeId>,
    bottom_up: Vec<NodeId>,
}

impl NodeHierarchy {
    #[must_use]
    pub fn root_id(&self) -> NodeId {
        self.root
    }

    pub fn root(&self) -> Result<&VisitedNode, ArborError> {
        self.visited.get(&self.root).ok_or_else(|| {
            ArborError::IllegalState(format!("hierarchy lost its root {}", self.root.0))
        })
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&VisitedNode> {
        self.visited.get(&id)
    }

    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.visited.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.visited.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.visited.is_empty()
    }

    /// Node ids, parents before children.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.top_down.iter().copied()
    }

    /// Parents before children.
    pub fn top_down(&self) -> impl Iterator<Item = &VisitedNode> {
        self.top_down.iter().filter_map(|id| self.visited.get(id))
    }

    /// Children before parents.
    pub fn bottom_up(&self) -> impl Iterator<Item = &VisitedNode> {
        self.bottom_up.iter().filter_map(|id| self.visited.get(id))
    }

    /// Confirm every recorded primary parent still matches `state`.
    ///
    /// A mismatch means the subtree changed under the walk; the enclosing
    /// transaction must start over.
    pub fn validate(&self, state: &GraphState) -> Result<(), ArborError> {
        for node in self.visited.values() {
            let current = state.primary_parent_assoc(node.id);
            if current != node.primary_parent.as_ref() {
                return Err(ArborError::ConcurrencyConflict(format!(
                    "primary parent of {} changed during hierarchy walk",
                    node.node_ref
                )));
            }
        }
        Ok(())
    }
}

/// Walk the primary subtree rooted at `root`.
pub fn walk_hierarchy(state: &GraphState, root: NodeId) -> Result<NodeHierarchy, ArborError> {
    state.require_live(root)?;

    let mut visited = BTreeMap::new();
    let mut seen = BTreeSet::from([root]);
    let mut top_down = Vec::new();
    let mut bottom_up = Vec::new();
    // (node, children already pushed)
    let mut stack = vec![(root, false)];

    while let Some((id, expanded)) = stack.pop() {
        if expanded {
            bottom_up.push(id);
            continue;
        }
        let node = visit(state, id)?;
        top_down.push(id);
        stack.push((id, true));

        let mut children: Vec<&ChildAssoc> = state
            .child_assocs_of(id)
            .filter(|a| a.is_primary)
            .collect();
        children.sort_by_key(|a| (a.index, a.id));
        // Reverse so the first child is expanded first.
        for assoc in children.into_iter().rev() {
            if !seen.insert(assoc.child) {
                return Err(ArborError::IllegalState(format!(
                    "node {} is reachable twice through primary associations",
                    assoc.child.0
                )));
            }
            stack.push((assoc.child, false));
        }
        visited.insert(id, node);
    }

    let hierarchy = NodeHierarchy {
        root,
        visited,
        top_down,
        bottom_up,
    };
    hierarchy.validate(state)?;
    Ok(hierarchy)
}

fn visit(state: &GraphState, id: NodeId) -> Result<VisitedNode, ArborError> {
    let row = state.require_live(id)?;
    let mut primary_parent = None;
    let mut secondary_parents = Vec::new();
    for assoc in state.parent_assocs(id) {
        if assoc.is_primary {
            primary_parent = Some(assoc.clone());
        } else {
            secondary_parents.push(assoc.clone());
        }
    }
    Ok(VisitedNode {
        id,
        node_ref: state.node_ref(id)?,
        type_qname: row.type_qname.clone(),
        acl: row.acl,
        primary_parent,
        secondary_parents,
        secondary_children: state
            .child_assocs_of(id)
            .filter(|a| !a.is_primary)
            .cloned()
            .collect(),
        target_assocs: state
            .target_assocs(id, AssocFilter::any())
            .cloned()
            .collect(),
        source_assocs: state
            .source_assocs(id, AssocFilter::any())
            .cloned()
            .collect(),
    })
}
