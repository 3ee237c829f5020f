//! # Timestamp Propagation
//!
//! Child association changes under a propagating association type touch the
//! parent's `cm:modified` / `cm:modifier`, provided the parent is auditable
//! and propagation is enabled in the repository configuration.
//!
//! Each parent is touched at most once per transaction. A parent already in
//! the transaction's write set is stamped immediately; any other parent is
//! stamped after commit in a separate best-effort transaction, so unrelated
//! transactions do not all end up writing the same folder row. A deferred
//! touch never moves a newer modification stamp backwards.

use crate::graph::RowKey;
use crate::model::qnames::{ASPECT_AUDITABLE, PROP_MODIFIED, PROP_MODIFIER};
use crate::txn::{Repository, Transaction};
use crate::{ArborError, NodeId, PropertyMap, PropertyValue, QName};
use tracing::{debug, warn};

/// A parent touch postponed until after commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredTouch {
    pub parent: NodeId,
    pub modified_ms: i64,
    pub user: String,
}

impl Transaction {
    /// Request a modification stamp on `parent` after a change to one of its
    /// child associations of type `assoc_type`.
    pub(crate) fn propagate_timestamps(
        &mut self,
        parent: NodeId,
        assoc_type: &QName,
    ) -> Result<(), ArborError> {
        if !self.config().repository.propagate_timestamps {
            return Ok(());
        }
        let propagating = self
            .dictionary()
            .get_association(assoc_type)
            .is_some_and(|def| def.propagate_timestamps);
        if !propagating || !self.ctx.first_touch(parent) {
            return Ok(());
        }
        let Some(row) = self.graph.live_node(parent) else {
            return Ok(());
        };
        if !row.aspects.contains(&*ASPECT_AUDITABLE) {
            return Ok(());
        }

        let modified_ms = self.now_ms();
        if self.graph.is_dirty(&RowKey::Node(parent)) {
            let user = self.user().to_string();
            self.graph
                .set_properties(parent, modified_stamp(modified_ms, &user), false)?;
        } else {
            let touch = DeferredTouch {
                parent,
                modified_ms,
                user: self.user().to_string(),
            };
            self.defer_touch(touch);
        }
        Ok(())
    }

    /// Apply a deferred touch. Returns whether the parent was stamped.
    fn apply_touch(&mut self, touch: &DeferredTouch) -> Result<bool, ArborError> {
        let Some(row) = self.graph.live_node(touch.parent) else {
            return Ok(false);
        };
        if !row.aspects.contains(&*ASPECT_AUDITABLE) {
            return Ok(false);
        }
        let current = row
            .properties
            .get(&*PROP_MODIFIED)
            .and_then(PropertyValue::as_millis);
        if current.is_some_and(|ms| ms >= touch.modified_ms) {
            return Ok(false);
        }
        self.graph.set_properties(
            touch.parent,
            modified_stamp(touch.modified_ms, &touch.user),
            false,
        )
    }
}

pub(crate) fn modified_stamp(modified_ms: i64, user: &str) -> PropertyMap {
    PropertyMap::from([
        (PROP_MODIFIED.clone(), PropertyValue::Date(modified_ms)),
        (PROP_MODIFIER.clone(), PropertyValue::Text(user.to_string())),
    ])
}

/// Run deferred touches after a commit. Failures are logged, never raised.
pub(crate) fn apply_deferred(repo: &Repository, touches: Vec<DeferredTouch>) -> usize {
    if touches.is_empty() {
        return 0;
    }
    let result = repo.retrying().do_in_transaction(|txn| {
        let mut applied = 0usize;
        for touch in &touches {
            if txn.apply_touch(touch)? {
                applied = applied.saturating_add(1);
            }
        }
        Ok(applied)
    });
    match result {
        Ok(applied) => {
            debug!(requested = touches.len(), applied, "applied deferred parent touches");
            applied
        }
        Err(e) => {
            warn!(error = %e, parents = touches.len(), "deferred timestamp propagation failed");
            0
        }
    }
}
