//! # Cleanup Daemon
//!
//! Runs the two purge workers on their own tokio intervals until shutdown.
//! The workers are synchronous, so every run goes to the blocking pool.

use arbor_core::lock::{InMemoryJobLockService, JobLockService};
use arbor_core::{
    ArborError, DeletedNodeCleanup, NodePurgeSummary, Repository, TxnPurgeSummary,
    UnusedTransactionCleanup,
};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

/// Which cleanup worker to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Worker {
    /// Purge old deleted node rows.
    Nodes,
    /// Purge transaction records no node references.
    Txns,
}

/// What one worker run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "worker", rename_all = "snake_case")]
pub enum PurgeReport {
    DeletedNodes(NodePurgeSummary),
    UnusedTransactions(TxnPurgeSummary),
}

impl fmt::Display for PurgeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeletedNodes(summary) => write!(f, "{summary}"),
            Self::UnusedTransactions(summary) => write!(f, "{summary}"),
        }
    }
}

/// Run `worker` once on the blocking pool.
pub async fn run_worker(
    repo: Repository,
    locks: Arc<dyn JobLockService>,
    worker: Worker,
) -> Result<PurgeReport, ArborError> {
    tokio::task::spawn_blocking(move || match worker {
        Worker::Nodes => PurgeReport::DeletedNodes(DeletedNodeCleanup::new(&repo, &*locks).run()),
        Worker::Txns => {
            PurgeReport::UnusedTransactions(UnusedTransactionCleanup::new(&repo, &*locks).run())
        }
    })
    .await
    .map_err(|e| ArborError::IllegalState(format!("cleanup task failed: {e}")))
}

/// Both workers on their configured schedules.
pub struct CleanupDaemon {
    repo: Repository,
    locks: Arc<dyn JobLockService>,
    node_interval: Duration,
    txn_interval: Duration,
}

impl fmt::Debug for CleanupDaemon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupDaemon")
            .field("node_interval", &self.node_interval)
            .field("txn_interval", &self.txn_interval)
            .finish_non_exhaustive()
    }
}

impl CleanupDaemon {
    /// A daemon using the repository's schedule and an in-process lock service.
    #[must_use]
    pub fn new(repo: Repository) -> Self {
        let cleanup = &repo.config().cleanup;
        // tokio intervals reject a zero period.
        let node_interval = Duration::from_secs(cleanup.node_purge_interval_secs.max(1));
        let txn_interval = Duration::from_secs(cleanup.txn_purge_interval_secs.max(1));
        let locks: Arc<dyn JobLockService> =
            Arc::new(InMemoryJobLockService::new(Arc::clone(repo.clock())));
        Self {
            repo,
            locks,
            node_interval,
            txn_interval,
        }
    }

    #[must_use]
    pub fn with_intervals(mut self, node_interval: Duration, txn_interval: Duration) -> Self {
        self.node_interval = node_interval;
        self.txn_interval = txn_interval;
        self
    }

    async fn tick(&self, worker: Worker) {
        match run_worker(self.repo.clone(), Arc::clone(&self.locks), worker).await {
            Ok(report) => tracing::debug!(%report, "cleanup run complete"),
            Err(e) => tracing::error!(error = %e, ?worker, "cleanup run failed"),
        }
    }

    /// Run until a shutdown signal arrives. Both workers fire once at start.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        tracing::info!(
            node_interval_secs = self.node_interval.as_secs(),
            txn_interval_secs = self.txn_interval.as_secs(),
            "cleanup daemon started"
        );
        let mut node_timer = tokio::time::interval(self.node_interval);
        let mut txn_timer = tokio::time::interval(self.txn_interval);
        node_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        txn_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("cleanup daemon shutting down");
                    break;
                }
                _ = node_timer.tick() => self.tick(Worker::Nodes).await,
                _ = txn_timer.tick() => self.tick(Worker::Txns).await,
            }
        }
    }
}
