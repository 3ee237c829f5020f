//! Deleted-node purge.

use crate::lock::{HeldLock, JobLockService};
use crate::primitives::NODE_PURGE_LOCK;
use crate::txn::{Repository, Transaction};
use crate::{ArborError, NodeId};
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

/// Outcome of one purge run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodePurgeSummary {
    /// `None` when the purge is disabled.
    pub cutoff_ms: Option<i64>,
    pub purged: usize,
    /// Eligible rows left for a later run.
    pub remaining: usize,
    pub error: Option<String>,
}

impl fmt::Display for NodePurgeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(cutoff) = self.cutoff_ms else {
            return write!(f, "deleted-node purge disabled");
        };
        write!(
            f,
            "purged {} deleted nodes changed before {cutoff}, {} remaining",
            self.purged, self.remaining
        )?;
        if let Some(error) = &self.error {
            write!(f, " (failed: {error})")?;
        }
        Ok(())
    }
}

/// Removes deleted node rows older than `cleanup.node_min_purge_age_ms`.
///
/// A run purges at most `cleanup.max_nodes_per_run` rows in one retrying
/// transaction; the rest wait for the next scheduled run.
pub struct DeletedNodeCleanup<'a> {
    repo: &'a Repository,
    locks: &'a dyn JobLockService,
}

impl fmt::Debug for DeletedNodeCleanup<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeletedNodeCleanup")
            .field("repo", self.repo)
            .finish_non_exhaustive()
    }
}

impl<'a> DeletedNodeCleanup<'a> {
    #[must_use]
    pub fn new(repo: &'a Repository, locks: &'a dyn JobLockService) -> Self {
        Self { repo, locks }
    }

    pub fn run(&self) -> NodePurgeSummary {
        let config = &self.repo.config().cleanup;
        if config.node_min_purge_age_ms < 0 {
            info!("deleted-node purge is disabled");
            return NodePurgeSummary::default();
        }
        let cutoff = self
            .repo
            .clock()
            .now_ms()
            .saturating_sub(config.node_min_purge_age_ms);
        let mut summary = NodePurgeSummary {
            cutoff_ms: Some(cutoff),
            ..NodePurgeSummary::default()
        };

        let lock = match HeldLock::acquire(self.locks, NODE_PURGE_LOCK, config.lock_ttl_ms) {
            Ok(lock) => lock,
            Err(e) => {
                info!(error = %e, "deleted-node purge skipped");
                summary.error = Some(e.to_string());
                return summary;
            }
        };

        let limit = config.max_nodes_per_run;
        match self
            .repo
            .retrying()
            .do_in_transaction(|txn| txn.purge_deleted_nodes(cutoff, limit))
        {
            Ok(purged) => summary.purged = purged,
            Err(e) => {
                warn!(error = %e, "deleted-node purge failed");
                summary.error = Some(e.to_string());
            }
        }
        drop(lock);

        summary.remaining = eligible(&self.repo.begin(), cutoff).len();
        info!(%summary, "deleted-node purge finished");
        summary
    }
}

/// Deleted rows whose last change committed before `cutoff`, in id order.
fn eligible(txn: &Transaction, cutoff: i64) -> Vec<NodeId> {
    let state = txn.state();
    state
        .nodes()
        .filter(|n| n.deleted)
        .filter(|n| state.txn(n.txn).is_some_and(|t| t.commit_time_ms < cutoff))
        .map(|n| n.id)
        .collect()
}

impl Transaction {
    /// Physically remove up to `limit` deleted node rows whose last change
    /// committed before `cutoff_ms`. Returns how many were removed.
    pub fn purge_deleted_nodes(&mut self, cutoff_ms: i64, limit: usize) -> Result<usize, ArborError> {
        self.mutate(|txn| txn.purge_deleted_nodes_impl(cutoff_ms, limit))
    }

    fn purge_deleted_nodes_impl(&mut self, cutoff_ms: i64, limit: usize) -> Result<usize, ArborError> {
        let ids: Vec<NodeId> = eligible(self, cutoff_ms).into_iter().take(limit).collect();
        for id in &ids {
            self.purge_node_row(*id)?;
        }
        Ok(ids.len())
    }
}
