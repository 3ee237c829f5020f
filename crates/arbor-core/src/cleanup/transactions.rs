//! Unused-transaction purge.

use crate::graph::GraphState;
use crate::lock::{HeldLock, JobLockService};
use crate::primitives::TXN_PURGE_LOCK;
use crate::txn::{Repository, Transaction};
use crate::{ArborError, TxnId};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TxnPurgeSummary {
    pub cutoff_ms: i64,
    /// Windows that committed.
    pub windows: usize,
    pub purged: usize,
    /// Why the sweep stopped before reaching the cutoff.
    pub halted: Option<String>,
}

impl fmt::Display for TxnPurgeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "purged {} unused transactions committed before {} in {} windows",
            self.purged, self.cutoff_ms, self.windows
        )?;
        if let Some(reason) = &self.halted {
            write!(f, " (halted: {reason})")?;
        }
        Ok(())
    }
}

/// Removes transaction records that no node row references.
///
/// Commit-time space is swept in windows of `cleanup.txn_purge_window_ms`,
/// oldest first, each in its own retrying transaction. The job lock is
/// refreshed between windows. A failed window stops the sweep so the range
/// is retried on the next run instead of being skipped.
pub struct UnusedTransactionCleanup<'a> {
    repo: &'a Repository,
    locks: &'a dyn JobLockService,
}

impl fmt::Debug for UnusedTransactionCleanup<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnusedTransactionCleanup")
            .field("repo", self.repo)
            .finish_non_exhaustive()
    }
}

impl<'a> UnusedTransactionCleanup<'a> {
    #[must_use]
    pub fn new(repo: &'a Repository, locks: &'a dyn JobLockService) -> Self {
        Self { repo, locks }
    }

    pub fn run(&self) -> TxnPurgeSummary {
        let config = &self.repo.config().cleanup;
        let cutoff = self
            .repo
            .clock()
            .now_ms()
            .saturating_sub(config.txn_min_purge_age_ms);
        let mut summary = TxnPurgeSummary {
            cutoff_ms: cutoff,
            ..TxnPurgeSummary::default()
        };

        let lock = match HeldLock::acquire(self.locks, TXN_PURGE_LOCK, config.lock_ttl_ms) {
            Ok(lock) => lock,
            Err(e) => {
                info!(error = %e, "transaction purge skipped");
                summary.halted = Some(e.to_string());
                return summary;
            }
        };

        let window = config.txn_purge_window_ms;
        let mut next = next_unused(&self.repo.snapshot(), i64::MIN, cutoff);
        while let Some(from) = next {
            if summary.windows > 0
                && let Err(e) = lock.refresh()
            {
                warn!(error = %e, from, "transaction purge lost its lock");
                summary.halted = Some(e.to_string());
                break;
            }
            let to = from.saturating_add(window).min(cutoff);
            match self
                .repo
                .retrying()
                .do_in_transaction(|txn| txn.purge_unused_txns(from, to))
            {
                Ok(purged) => {
                    debug!(from, to, purged, "purged transaction window");
                    summary.windows = summary.windows.saturating_add(1);
                    summary.purged = summary.purged.saturating_add(purged);
                }
                Err(e) => {
                    warn!(error = %e, from, to, "transaction purge window failed");
                    summary.halted = Some(e.to_string());
                    break;
                }
            }
            // Empty stretches between unused transactions are not swept.
            next = next_unused(&self.repo.snapshot(), to, cutoff);
        }
        drop(lock);
        info!(%summary, "transaction purge finished");
        summary
    }
}

/// Commit time of the oldest unused transaction in `[from, cutoff)`.
fn next_unused(state: &GraphState, from: i64, cutoff: i64) -> Option<i64> {
    state
        .txns()
        .filter(|t| t.commit_time_ms >= from && t.commit_time_ms < cutoff)
        .filter(|t| state.txn_usage(t.id) == 0)
        .map(|t| t.commit_time_ms)
        .min()
}

impl Transaction {
    /// Remove every unreferenced transaction record committed in
    /// `[from_ms, to_ms)`. Returns how many were removed.
    pub fn purge_unused_txns(&mut self, from_ms: i64, to_ms: i64) -> Result<usize, ArborError> {
        self.mutate(|txn| txn.purge_unused_txns_impl(from_ms, to_ms))
    }

    fn purge_unused_txns_impl(&mut self, from_ms: i64, to_ms: i64) -> Result<usize, ArborError> {
        let state = self.state();
        let ids: Vec<TxnId> = state
            .txns()
            .filter(|t| t.commit_time_ms >= from_ms && t.commit_time_ms < to_ms)
            .filter(|t| state.txn_usage(t.id) == 0)
            .map(|t| t.id)
            .collect();
        for id in &ids {
            self.graph.remove_txn_row(*id);
        }
        Ok(ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::ArborConfig;
    use crate::lock::{InMemoryJobLockService, LockToken};
    use crate::model::qnames::*;
    use crate::model::system_model;
    use crate::{NodeRef, PropertyMap, QName};
    use std::sync::Arc;

    const HOUR: i64 = 3_600_000;

    fn setup() -> (Repository, Arc<ManualClock>, Vec<NodeRef>) {
        let clock = Arc::new(ManualClock::new(24 * HOUR));
        let mut config = ArborConfig::default();
        config.cleanup.txn_min_purge_age_ms = HOUR;
        config.cleanup.txn_purge_window_ms = 2 * HOUR;
        let repo = Repository::builder(Arc::new(system_model().build().expect("dictionary")))
            .clock(Arc::clone(&clock) as Arc<dyn Clock>)
            .config(config)
            .in_memory()
            .expect("repository");
        let root = repo
            .retrying()
            .do_in_transaction(|txn| {
                let store = txn.create_store("workspace", "SpacesStore")?;
                txn.get_root_node(&store)
            })
            .expect("store");

        // Three nodes created three hours apart, each in its own transaction.
        let mut nodes = Vec::new();
        for i in 0..3 {
            clock.advance(3 * HOUR);
            let node = repo
                .retrying()
                .do_in_transaction(|txn| {
                    txn.create_node(
                        &root,
                        &ASSOC_CHILDREN,
                        &QName::new("cm", &format!("n{i}")),
                        &TYPE_FOLDER,
                        PropertyMap::new(),
                    )
                })
                .expect("create")
                .child;
            nodes.push(node);
        }
        // Rewriting every node leaves the three creating transactions unused.
        clock.advance(HOUR);
        repo.retrying()
            .do_in_transaction(|txn| {
                for node in &nodes {
                    txn.set_property(node, &PROP_TITLE, "t".into())?;
                }
                Ok(())
            })
            .expect("rewrite");
        clock.advance(2 * HOUR);
        (repo, clock, nodes)
    }

    /// Unused transactions a run with the current clock would consider.
    fn stale(repo: &Repository) -> usize {
        let cutoff = repo.clock().now_ms() - repo.config().cleanup.txn_min_purge_age_ms;
        let state = repo.snapshot();
        state
            .txns()
            .filter(|t| t.commit_time_ms < cutoff && state.txn_usage(t.id) == 0)
            .count()
    }

    #[test]
    fn sweeps_unused_transactions_window_by_window() {
        let (repo, clock, _) = setup();
        let locks = InMemoryJobLockService::new(Arc::clone(&clock) as Arc<dyn Clock>);
        assert_eq!(stale(&repo), 3);

        let summary = UnusedTransactionCleanup::new(&repo, &locks).run();
        assert_eq!(summary.purged, 3);
        assert_eq!(summary.windows, 3);
        assert_eq!(summary.halted, None);
        assert_eq!(stale(&repo), 0);
        // The store and rewrite transactions still back node rows.
        let state = repo.snapshot();
        assert_eq!(state.txns().filter(|t| state.txn_usage(t.id) > 0).count(), 2);
    }

    #[test]
    fn recent_transactions_survive() {
        let (repo, clock, _) = setup();
        let locks = InMemoryJobLockService::new(Arc::clone(&clock) as Arc<dyn Clock>);
        // Only the first creating transaction is older than the cutoff.
        clock.set(24 * HOUR + 3 * HOUR + HOUR + 1);
        let summary = UnusedTransactionCleanup::new(&repo, &locks).run();
        assert_eq!(summary.purged, 1);
        let state = repo.snapshot();
        let kept: Vec<i64> = state.txns().map(|t| t.commit_time_ms).collect();
        assert!(!kept.contains(&(27 * HOUR)));
        assert!(kept.contains(&(30 * HOUR)));
        assert!(kept.contains(&(33 * HOUR)));
    }

    struct ForgetfulLocks(InMemoryJobLockService);

    impl JobLockService for ForgetfulLocks {
        fn acquire(&self, key: &str, ttl_ms: u64) -> Result<LockToken, ArborError> {
            self.0.acquire(key, ttl_ms)
        }

        fn refresh(&self, _token: &LockToken, key: &str, _ttl_ms: u64) -> Result<(), ArborError> {
            Err(ArborError::LockLost(key.to_string()))
        }

        fn release(&self, token: &LockToken, key: &str) -> Result<(), ArborError> {
            self.0.release(token, key)
        }
    }

    #[test]
    fn lost_lock_halts_the_sweep() {
        let (repo, clock, _) = setup();
        let locks = ForgetfulLocks(InMemoryJobLockService::new(
            Arc::clone(&clock) as Arc<dyn Clock>
        ));
        let summary = UnusedTransactionCleanup::new(&repo, &locks).run();
        assert_eq!(summary.windows, 1);
        assert_eq!(summary.purged, 1);
        assert!(matches!(summary.halted.as_deref(), Some(reason) if reason.contains("lock")));
        assert_eq!(stale(&repo), 2);
    }

    #[test]
    fn nothing_to_do_commits_nothing() {
        let (repo, clock, _) = setup();
        let locks = InMemoryJobLockService::new(Arc::clone(&clock) as Arc<dyn Clock>);
        UnusedTransactionCleanup::new(&repo, &locks).run();
        let txns = repo.stats().txns;
        let summary = UnusedTransactionCleanup::new(&repo, &locks).run();
        assert_eq!(summary.windows, 0);
        assert_eq!(repo.stats().txns, txns);
    }
}
