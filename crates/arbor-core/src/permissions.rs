//! # Permission Service
//!
//! The engine only consults permissions when a node is copied into another
//! store (archive, restore, cross-store move): explicitly set entries and the
//! inherit flag travel with the node. Evaluating permissions is out of scope.

use crate::NodeRef;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

/// An explicitly set permission entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccessPermission {
    pub authority: String,
    pub permission: String,
    pub allowed: bool,
}

/// Narrow permission interface used during node relocation.
pub trait PermissionService: Send + Sync {
    /// Entries set directly on the node (not inherited).
    fn get_all_set_permissions(&self, node: &NodeRef) -> BTreeSet<AccessPermission>;

    fn set_permission(&self, node: &NodeRef, authority: &str, permission: &str, allow: bool);

    fn get_inherit_parent_permissions(&self, node: &NodeRef) -> bool;

    fn set_inherit_parent_permissions(&self, node: &NodeRef, inherit: bool);

    /// Forget everything set on the node.
    fn delete_permissions(&self, node: &NodeRef);
}

#[derive(Debug, Clone)]
struct NodeAcl {
    entries: BTreeSet<AccessPermission>,
    inherit: bool,
}

impl Default for NodeAcl {
    fn default() -> Self {
        Self {
            entries: BTreeSet::new(),
            inherit: true,
        }
    }
}

/// Permission service keeping entries in memory.
#[derive(Debug, Default)]
pub struct InMemoryPermissionService {
    acls: Mutex<HashMap<NodeRef, NodeAcl>>,
}

impl InMemoryPermissionService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_acls<T>(&self, f: impl FnOnce(&mut HashMap<NodeRef, NodeAcl>) -> T) -> T {
        match self.acls.lock() {
            Ok(mut acls) => f(&mut acls),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl PermissionService for InMemoryPermissionService {
    fn get_all_set_permissions(&self, node: &NodeRef) -> BTreeSet<AccessPermission> {
        self.with_acls(|acls| {
            acls.get(node)
                .map(|acl| acl.entries.clone())
                .unwrap_or_default()
        })
    }

    fn set_permission(&self, node: &NodeRef, authority: &str, permission: &str, allow: bool) {
        self.with_acls(|acls| {
            let acl = acls.entry(node.clone()).or_default();
            // One entry per (authority, permission); the latest setting wins.
            acl.entries
                .retain(|e| !(e.authority == authority && e.permission == permission));
            acl.entries.insert(AccessPermission {
                authority: authority.to_string(),
                permission: permission.to_string(),
                allowed: allow,
            });
        });
    }

    fn get_inherit_parent_permissions(&self, node: &NodeRef) -> bool {
        self.with_acls(|acls| acls.get(node).is_none_or(|acl| acl.inherit))
    }

    fn set_inherit_parent_permissions(&self, node: &NodeRef, inherit: bool) {
        self.with_acls(|acls| acls.entry(node.clone()).or_default().inherit = inherit);
    }

    fn delete_permissions(&self, node: &NodeRef) {
        self.with_acls(|acls| {
            acls.remove(node);
        });
    }
}
