//! # Transactions
//!
//! Every mutation runs inside a [`Transaction`]: an optimistic, copy-on-write
//! view of the committed graph.
//!
//! ## Commit protocol
//!
//! 1. The transaction starts from the committed `Arc<GraphState>` and the
//!    commit sequence number at that moment.
//! 2. Writes copy the state once and record the key of every dirtied row.
//!    Cycle checks also record the parent sets they read.
//! 3. On commit, under the repository write lock, the dirty and read keys
//!    are checked against the write-sets of every commit made after the
//!    start sequence. Any overlap fails with
//!    [`ArborError::ConcurrencyConflict`].
//! 4. The dirty rows are written to redb (if persistent) and then published:
//!    when nothing committed in between, the transaction's state simply
//!    becomes the committed state; otherwise its rows are merged in.
//! 5. After the lock is released, index events are delivered and deferred
//!    timestamp touches run in their own best-effort transaction.
//!
//! A mutating operation that fails marks its transaction rollback-only:
//! the operation may have written part of its changes, so committing fails
//! with [`ArborError::RollbackOnly`].
//!
//! [`RetryingTransactionHelper`] re-runs a unit of work from scratch on
//! retryable failures with linear back-off.

use crate::clock::{Clock, SystemClock};
use crate::config::{ArborConfig, RetryConfig};
use crate::graph::{Counters, GraphRows, GraphState, IdAllocator, RowKey, WorkingGraph};
use crate::model::Dictionary;
use crate::permissions::{InMemoryPermissionService, PermissionService};
use crate::policy::{AfterEvent, BeforeEvent, IndexEvent, Indexer, NodePolicy, PolicyBus};
use crate::primitives::{COMMIT_LOG_CAPACITY, SYSTEM_USER};
use crate::storage::RedbStore;
use crate::timestamps::{self, DeferredTouch};
use crate::{ArborError, AssocId, NodeId, PeerAssocId, TxnId, TxnRecord};
use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

// =============================================================================
// COMMITTED STATE
// =============================================================================

#[derive(Debug)]
struct Committed {
    state: Arc<GraphState>,
    seq: u64,
    /// Write-sets of recent commits, oldest first.
    log: VecDeque<(u64, BTreeSet<RowKey>)>,
    /// Sequence of the newest commit dropped from the log.
    log_floor: u64,
}

impl Committed {
    fn new(state: GraphState) -> Self {
        Self {
            state: Arc::new(state),
            seq: 0,
            log: VecDeque::new(),
            log_floor: 0,
        }
    }

    fn check(
        &self,
        start_seq: u64,
        dirty: &BTreeSet<RowKey>,
        reads: &BTreeSet<RowKey>,
    ) -> Result<(), ArborError> {
        if start_seq < self.log_floor {
            return Err(ArborError::ConcurrencyConflict(format!(
                "transaction started at commit {start_seq}, before the oldest retained commit {}",
                self.log_floor
            )));
        }
        for (seq, keys) in self.log.iter().rev() {
            if *seq <= start_seq {
                break;
            }
            if let Some(key) = keys.intersection(dirty).next() {
                return Err(ArborError::ConcurrencyConflict(format!(
                    "commit {seq} also wrote {key:?}"
                )));
            }
            if let Some(key) = keys.intersection(reads).next() {
                return Err(ArborError::ConcurrencyConflict(format!(
                    "commit {seq} changed {key:?}, which this transaction relied on"
                )));
            }
        }
        Ok(())
    }

    fn record(&mut self, keys: BTreeSet<RowKey>) {
        self.seq = self.seq.saturating_add(1);
        self.log.push_back((self.seq, keys));
        while self.log.len() > COMMIT_LOG_CAPACITY {
            if let Some((seq, _)) = self.log.pop_front() {
                self.log_floor = seq;
            }
        }
    }
}

// =============================================================================
// REPOSITORY
// =============================================================================

struct RepoInner {
    committed: RwLock<Committed>,
    ids: Arc<IdAllocator>,
    backend: Option<Mutex<RedbStore>>,
    dictionary: Arc<dyn Dictionary>,
    clock: Arc<dyn Clock>,
    permissions: Arc<dyn PermissionService>,
    policies: PolicyBus,
    indexers: Vec<Arc<dyn Indexer>>,
    config: ArborConfig,
}

/// Counts describing a repository, for status output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepositoryStats {
    pub stores: usize,
    pub live_nodes: usize,
    pub deleted_nodes: usize,
    pub child_assocs: usize,
    pub peer_assocs: usize,
    pub txns: usize,
    pub unused_txns: usize,
}

/// A node repository: committed graph, id allocators and collaborators.
///
/// Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct Repository {
    inner: Arc<RepoInner>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("persistent", &self.is_persistent())
            .field("policies", &self.inner.policies)
            .field("indexers", &self.inner.indexers.len())
            .finish_non_exhaustive()
    }
}

impl Repository {
    #[must_use]
    pub fn builder(dictionary: Arc<dyn Dictionary>) -> RepositoryBuilder {
        RepositoryBuilder::new(dictionary)
    }

    fn read_committed(&self) -> RwLockReadGuard<'_, Committed> {
        self.inner
            .committed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_committed(&self) -> RwLockWriteGuard<'_, Committed> {
        self.inner
            .committed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn backend(&self) -> Option<MutexGuard<'_, RedbStore>> {
        self.inner
            .backend
            .as_ref()
            .map(|b| b.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Start a transaction on behalf of the system user.
    #[must_use]
    pub fn begin(&self) -> Transaction {
        self.begin_as(SYSTEM_USER)
    }

    /// Start a transaction on behalf of `user`.
    #[must_use]
    pub fn begin_as(&self, user: &str) -> Transaction {
        let (state, start_seq) = {
            let committed = self.read_committed();
            (Arc::clone(&committed.state), committed.seq)
        };
        Transaction {
            repo: self.clone(),
            start_seq,
            user: user.to_string(),
            graph: WorkingGraph::new(state, Arc::clone(&self.inner.ids)),
            ctx: MutationContext::default(),
            index_events: Vec::new(),
            deferred: Vec::new(),
            rollback_cause: None,
        }
    }

    /// Helper that runs work in fresh transactions and retries conflicts.
    #[must_use]
    pub fn retrying(&self) -> RetryingTransactionHelper {
        RetryingTransactionHelper {
            repo: self.clone(),
            retry: self.inner.config.retry.clone(),
            user: SYSTEM_USER.to_string(),
        }
    }

    /// The committed state at this moment.
    #[must_use]
    pub fn snapshot(&self) -> Arc<GraphState> {
        Arc::clone(&self.read_committed().state)
    }

    #[must_use]
    pub fn dictionary(&self) -> &Arc<dyn Dictionary> {
        &self.inner.dictionary
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    #[must_use]
    pub fn permissions(&self) -> &Arc<dyn PermissionService> {
        &self.inner.permissions
    }

    #[must_use]
    pub fn config(&self) -> &ArborConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.inner.backend.is_some()
    }

    /// Every committed row plus the id counters.
    #[must_use]
    pub fn export_rows(&self) -> GraphRows {
        let state = self.snapshot();
        let counters = self.inner.ids.counters().max(state.counters_floor());
        state.to_rows(counters)
    }

    /// Replace the whole repository content with `rows`.
    ///
    /// Transactions started before the import fail to commit.
    pub fn import_rows(&self, rows: GraphRows) -> Result<(), ArborError> {
        let counters = rows.counters;
        let state = GraphState::from_rows(rows)?;
        let counters = counters.max(state.counters_floor());
        self.inner.ids.raise_to(counters);

        let mut committed = self.write_committed();
        if let Some(backend) = self.backend() {
            backend.replace_all(&state, self.inner.ids.counters())?;
        }
        committed.state = Arc::new(state);
        committed.seq = committed.seq.saturating_add(1);
        committed.log.clear();
        committed.log_floor = committed.seq;
        info!(nodes = committed.state.node_count(), "imported repository rows");
        Ok(())
    }

    /// Compact the backing database. In-memory repositories report `false`.
    pub fn compact(&self) -> Result<bool, ArborError> {
        match self.inner.backend.as_ref() {
            Some(backend) => backend
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .compact(),
            None => Ok(false),
        }
    }

    #[must_use]
    pub fn stats(&self) -> RepositoryStats {
        let state = self.snapshot();
        let deleted_nodes = state.nodes().filter(|n| n.deleted).count();
        RepositoryStats {
            stores: state.stores().count(),
            live_nodes: state.node_count().saturating_sub(deleted_nodes),
            deleted_nodes,
            child_assocs: state.child_assocs().count(),
            peer_assocs: state.peer_assocs().count(),
            txns: state.txns().count(),
            unused_txns: state.txns().filter(|t| state.txn_usage(t.id) == 0).count(),
        }
    }

    fn publish(
        &self,
        start_seq: u64,
        state: Arc<GraphState>,
        dirty: BTreeSet<RowKey>,
        reads: &BTreeSet<RowKey>,
    ) -> Result<(), ArborError> {
        let mut committed = self.write_committed();
        committed.check(start_seq, &dirty, reads)?;
        if let Some(backend) = self.backend() {
            backend.write(&state, &dirty, self.inner.ids.counters())?;
        }
        if committed.seq == start_seq {
            committed.state = state;
        } else {
            Arc::make_mut(&mut committed.state).merge_rows(&state, &dirty);
        }
        committed.record(dirty);
        Ok(())
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Assembles a [`Repository`] from its collaborators.
pub struct RepositoryBuilder {
    dictionary: Arc<dyn Dictionary>,
    clock: Arc<dyn Clock>,
    permissions: Arc<dyn PermissionService>,
    policies: PolicyBus,
    indexers: Vec<Arc<dyn Indexer>>,
    config: ArborConfig,
}

impl std::fmt::Debug for RepositoryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RepositoryBuilder {
    #[must_use]
    pub fn new(dictionary: Arc<dyn Dictionary>) -> Self {
        Self {
            dictionary,
            clock: Arc::new(SystemClock),
            permissions: Arc::new(InMemoryPermissionService::new()),
            policies: PolicyBus::default(),
            indexers: Vec::new(),
            config: ArborConfig::default(),
        }
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn permissions(mut self, permissions: Arc<dyn PermissionService>) -> Self {
        self.permissions = permissions;
        self
    }

    /// Register a lifecycle listener. Listeners run in registration order.
    #[must_use]
    pub fn policy(mut self, policy: Arc<dyn NodePolicy>) -> Self {
        self.policies.register(policy);
        self
    }

    #[must_use]
    pub fn indexer(mut self, indexer: Arc<dyn Indexer>) -> Self {
        self.indexers.push(indexer);
        self
    }

    #[must_use]
    pub fn config(mut self, config: ArborConfig) -> Self {
        self.config = config;
        self
    }

    /// A volatile repository.
    pub fn in_memory(self) -> Result<Repository, ArborError> {
        self.build(GraphState::new(), Counters::default(), None)
    }

    /// A repository persisted in the redb database at `path`.
    pub fn open(self, path: impl AsRef<Path>) -> Result<Repository, ArborError> {
        let backend = RedbStore::open(path)?;
        let rows = backend.load()?;
        let counters = rows.counters;
        let state = GraphState::from_rows(rows)?;
        let counters = counters.max(state.counters_floor());
        self.build(state, counters, Some(backend))
    }

    fn build(
        self,
        state: GraphState,
        counters: Counters,
        backend: Option<RedbStore>,
    ) -> Result<Repository, ArborError> {
        self.config.validate()?;
        Ok(Repository {
            inner: Arc::new(RepoInner {
                committed: RwLock::new(Committed::new(state)),
                ids: Arc::new(IdAllocator::new(counters)),
                backend: backend.map(Mutex::new),
                dictionary: self.dictionary,
                clock: self.clock,
                permissions: self.permissions,
                policies: self.policies,
                indexers: self.indexers,
                config: self.config,
            }),
        })
    }
}

// =============================================================================
// MUTATION CONTEXT
// =============================================================================

/// Something a before-event has already been fired for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FiredKey {
    Node(NodeId),
    ChildAssoc(AssocId),
    PeerAssoc(PeerAssocId),
}

/// Per-transaction bookkeeping threaded through the mutation engine.
#[derive(Debug, Default)]
pub struct MutationContext {
    pending_delete: BTreeSet<NodeId>,
    fired: BTreeSet<FiredKey>,
    touched_parents: BTreeSet<NodeId>,
}

impl MutationContext {
    pub fn mark_pending(&mut self, ids: impl IntoIterator<Item = NodeId>) {
        self.pending_delete.extend(ids);
    }

    pub fn clear_pending(&mut self, ids: impl IntoIterator<Item = NodeId>) {
        for id in ids {
            self.pending_delete.remove(&id);
        }
    }

    #[must_use]
    pub fn is_pending(&self, id: NodeId) -> bool {
        self.pending_delete.contains(&id)
    }

    /// True the first time `key` is seen in this transaction.
    pub fn first_fire(&mut self, key: FiredKey) -> bool {
        self.fired.insert(key)
    }

    /// True the first time a timestamp touch of `parent` is requested.
    pub fn first_touch(&mut self, parent: NodeId) -> bool {
        self.touched_parents.insert(parent)
    }
}

// =============================================================================
// TRANSACTION
// =============================================================================

/// What a successful commit did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    /// `None` for a transaction that wrote nothing.
    pub txn: Option<TxnId>,
    pub rows: usize,
    pub index_events: usize,
    /// Parent touches handed to the post-commit transaction.
    pub deferred_touches: usize,
    /// Deferred touches that were actually applied.
    pub applied_touches: usize,
}

/// One unit of work against a [`Repository`].
///
/// Dropping a transaction without committing rolls it back.
pub struct Transaction {
    repo: Repository,
    start_seq: u64,
    user: String,
    pub(crate) graph: WorkingGraph,
    pub(crate) ctx: MutationContext,
    index_events: Vec<IndexEvent>,
    deferred: Vec<DeferredTouch>,
    /// Error of the first failed mutation.
    rollback_cause: Option<String>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("start_seq", &self.start_seq)
            .field("user", &self.user)
            .field("dirty", &self.graph.dirty().len())
            .field("rollback_only", &self.is_rollback_only())
            .finish_non_exhaustive()
    }
}

impl Transaction {
    /// The user changes are recorded against.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// The transaction's read view, including its own writes.
    #[must_use]
    pub fn state(&self) -> &GraphState {
        self.graph.state()
    }

    #[must_use]
    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    #[must_use]
    pub fn context(&self) -> &MutationContext {
        &self.ctx
    }

    /// True once a mutating operation of this transaction has failed.
    #[must_use]
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_cause.is_some()
    }

    /// Run one mutating operation, marking the transaction rollback-only if
    /// it fails.
    pub(crate) fn mutate<T>(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<T, ArborError>,
    ) -> Result<T, ArborError> {
        let result = op(self);
        if let Err(e) = &result
            && self.rollback_cause.is_none()
        {
            debug!(error = %e, "transaction marked rollback-only");
            self.rollback_cause = Some(e.to_string());
        }
        result
    }

    pub(crate) fn dictionary(&self) -> Arc<dyn Dictionary> {
        Arc::clone(&self.repo.inner.dictionary)
    }

    pub(crate) fn permissions(&self) -> Arc<dyn PermissionService> {
        Arc::clone(&self.repo.inner.permissions)
    }

    pub(crate) fn config(&self) -> &ArborConfig {
        &self.repo.inner.config
    }

    pub(crate) fn now_ms(&self) -> i64 {
        self.repo.inner.clock.now_ms()
    }

    pub(crate) fn before(&self, event: BeforeEvent) -> Result<(), ArborError> {
        self.repo.inner.policies.before(&event)
    }

    pub(crate) fn after(&self, event: AfterEvent) {
        self.repo.inner.policies.after(&event);
    }

    pub(crate) fn index(&mut self, event: IndexEvent) {
        self.index_events.push(event);
    }

    pub(crate) fn defer_touch(&mut self, touch: DeferredTouch) {
        self.deferred.push(touch);
    }

    /// Publish the transaction's writes.
    ///
    /// Fails with [`ArborError::RollbackOnly`] after a failed mutation,
    /// publishing nothing.
    pub fn commit(mut self) -> Result<CommitOutcome, ArborError> {
        if let Some(cause) = self.rollback_cause.take() {
            debug!(dirty = self.graph.dirty().len(), "rolling back failed transaction");
            return Err(ArborError::RollbackOnly(cause));
        }
        if self.graph.dirty().is_empty() {
            return Ok(CommitOutcome::default());
        }
        let txn = self.graph.current_txn();
        let commit_time_ms = self.now_ms();
        self.graph.write_txn(TxnRecord {
            id: txn,
            commit_time_ms,
        });

        let Self {
            repo,
            start_seq,
            graph,
            index_events,
            deferred,
            ..
        } = self;
        let (state, dirty, reads) = graph.into_parts();
        let rows = dirty.len();
        repo.publish(start_seq, state, dirty, &reads)?;
        debug!(txn = txn.0, rows, "transaction committed");

        for event in &index_events {
            for indexer in &repo.inner.indexers {
                indexer.index(event);
            }
        }
        let deferred_touches = deferred.len();
        let applied_touches = timestamps::apply_deferred(&repo, deferred);

        Ok(CommitOutcome {
            txn: Some(txn),
            rows,
            index_events: index_events.len(),
            deferred_touches,
            applied_touches,
        })
    }

    /// Discard the transaction's writes.
    pub fn rollback(self) {
        debug!(dirty = self.graph.dirty().len(), "transaction rolled back");
    }
}

// =============================================================================
// RETRYING HELPER
// =============================================================================

/// Runs work in a fresh transaction, retrying on concurrency conflicts.
///
/// The work closure must be safe to re-run: every attempt starts over from
/// the then-current committed state.
#[derive(Debug, Clone)]
pub struct RetryingTransactionHelper {
    repo: Repository,
    retry: RetryConfig,
    user: String,
}

impl RetryingTransactionHelper {
    #[must_use]
    pub fn as_user(mut self, user: &str) -> Self {
        self.user = user.to_string();
        self
    }

    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    pub fn do_in_transaction<T>(
        &self,
        work: impl FnMut(&mut Transaction) -> Result<T, ArborError>,
    ) -> Result<T, ArborError> {
        self.do_in_transaction_with_outcome(work)
            .map(|(value, _)| value)
    }

    /// Like [`Self::do_in_transaction`], also returning what the commit did.
    pub fn do_in_transaction_with_outcome<T>(
        &self,
        mut work: impl FnMut(&mut Transaction) -> Result<T, ArborError>,
    ) -> Result<(T, CommitOutcome), ArborError> {
        let mut attempt: u32 = 0;
        loop {
            let mut txn = self.repo.begin_as(&self.user);
            let result = match work(&mut txn) {
                Ok(value) => txn.commit().map(|outcome| (value, outcome)),
                Err(e) => Err(e),
            };
            match result {
                Ok(done) => return Ok(done),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    attempt = attempt.saturating_add(1);
                    let wait = self.retry.backoff(attempt);
                    debug!(attempt, wait_ms = wait.as_millis() as u64, error = %e, "retrying transaction");
                    std::thread::sleep(wait);
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!(attempts = attempt.saturating_add(1), error = %e, "giving up on transaction");
                    }
                    return Err(e);
                }
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::system_model;
    use crate::model::qnames::{ASSOC_CHILDREN, ASSOC_CONTAINS, TYPE_FOLDER};
    use crate::{NodeRef, PropertyMap, QName, StoreRef};

    fn repo() -> Repository {
        let dictionary = Arc::new(system_model().build().expect("dictionary"));
        Repository::builder(dictionary)
            .in_memory()
            .expect("repository")
    }

    fn store() -> StoreRef {
        StoreRef::new("workspace", "SpacesStore")
    }

    fn with_store(repo: &Repository) -> NodeRef {
        let mut txn = repo.begin();
        let store = txn
            .create_store(&store().protocol, &store().identifier)
            .expect("store");
        let root = txn.get_root_node(&store).expect("root");
        txn.commit().expect("commit");
        root
    }

    fn folder(txn: &mut Transaction, parent: &NodeRef, name: &str) -> NodeRef {
        txn.create_node(
            parent,
            &ASSOC_CONTAINS,
            &QName::new("cm", name),
            &TYPE_FOLDER,
            PropertyMap::from([(QName::new("cm", "name"), name.into())]),
        )
        .map(|assoc| assoc.child)
        .expect("create folder")
    }

    #[test]
    fn uncommitted_writes_are_invisible() {
        let repo = repo();
        let root = with_store(&repo);
        let mut txn = repo.begin();
        let created = folder(&mut txn, &root, "a");
        assert!(txn.exists(&created));
        assert!(!repo.snapshot().exists(&created));
        txn.rollback();
        assert!(!repo.snapshot().exists(&created));
    }

    #[test]
    fn overlapping_write_sets_conflict() {
        let repo = repo();
        let root = with_store(&repo);
        let mut txn = repo.begin();
        let node = folder(&mut txn, &root, "shared");
        txn.commit().expect("commit");

        let mut first = repo.begin();
        let mut second = repo.begin();
        first
            .set_property(&node, &QName::new("cm", "title"), "one".into())
            .expect("first write");
        second
            .set_property(&node, &QName::new("cm", "title"), "two".into())
            .expect("second write");
        first.commit().expect("first commit");
        let err = second.commit().expect_err("second must conflict");
        assert!(err.is_retryable());
    }

    #[test]
    fn disjoint_transactions_merge() {
        let repo = repo();
        let root = with_store(&repo);
        let mut txn = repo.begin();
        let a = folder(&mut txn, &root, "a");
        let b = folder(&mut txn, &root, "b");
        txn.commit().expect("commit");

        let mut first = repo.begin();
        let mut second = repo.begin();
        let in_a = folder(&mut first, &a, "x");
        let in_b = folder(&mut second, &b, "y");
        first.commit().expect("first");
        second.commit().expect("second");

        let state = repo.snapshot();
        assert!(state.exists(&in_a));
        assert!(state.exists(&in_b));
    }

    #[test]
    fn crossed_moves_cannot_both_commit() {
        let repo = repo();
        let root = with_store(&repo);
        let mut txn = repo.begin();
        let mut child = |name: &str| {
            txn.create_node(&root, &ASSOC_CHILDREN, &QName::new("cm", name), &TYPE_FOLDER, PropertyMap::new())
                .map(|assoc| assoc.child)
                .expect("create")
        };
        let a = child("a");
        let b = child("b");
        txn.commit().expect("commit");

        let mut first = repo.begin();
        let mut second = repo.begin();
        first
            .move_node(&a, &b, &ASSOC_CHILDREN, &QName::new("cm", "a"))
            .expect("a under b");
        second
            .move_node(&b, &a, &ASSOC_CHILDREN, &QName::new("cm", "b"))
            .expect("b under a");
        first.commit().expect("first commit");
        let err = second.commit().expect_err("second must conflict");
        assert!(matches!(err, ArborError::ConcurrencyConflict(_)));

        let txn = repo.begin();
        assert_eq!(txn.get_path(&a).expect("path").to_string(), "/cm:b/cm:a");
        assert_eq!(txn.get_path(&b).expect("path").to_string(), "/cm:b");
    }

    #[test]
    fn failed_operation_makes_commit_fail() {
        let repo = repo();
        let root = with_store(&repo);
        let mut txn = repo.begin();
        let kept = folder(&mut txn, &root, "kept");
        let missing = NodeRef::new(store(), "missing");
        assert!(txn.delete_node(&missing, false).is_err());
        assert!(txn.is_rollback_only());
        let err = txn.commit().expect_err("rollback-only");
        assert!(matches!(err, ArborError::RollbackOnly(_)));
        assert!(!err.is_retryable());
        assert!(!repo.snapshot().exists(&kept));
    }

    #[test]
    fn swallowed_failure_is_not_retried() {
        let repo = repo();
        let root = with_store(&repo);
        let mut attempts = 0;
        let result = repo.retrying().do_in_transaction(|txn| {
            attempts += 1;
            let created = folder(txn, &root, "once");
            let _ = txn.delete_node(&NodeRef::new(store(), "missing"), false);
            Ok(created)
        });
        assert!(matches!(result, Err(ArborError::RollbackOnly(_))));
        assert_eq!(attempts, 1);
        assert_eq!(repo.snapshot().node_count(), 1);
    }

    #[test]
    fn retrying_helper_reruns_conflicting_work() {
        let repo = repo();
        let root = with_store(&repo);
        let mut txn = repo.begin();
        let node = folder(&mut txn, &root, "n");
        txn.commit().expect("commit");

        let mut attempts = 0;
        let helper = repo.retrying();
        helper
            .do_in_transaction(|txn| {
                attempts += 1;
                txn.set_property(&node, &QName::new("cm", "title"), "mine".into())?;
                if attempts == 1 {
                    // A competing commit lands while this attempt is open.
                    repo.retrying().do_in_transaction(|other| {
                        other.set_property(&node, &QName::new("cm", "title"), "theirs".into())
                    })?;
                }
                Ok(())
            })
            .expect("eventually commits");
        assert_eq!(attempts, 2);
        let state = repo.snapshot();
        let id = state.resolve(&node).expect("resolve");
        assert_eq!(
            state
                .get_property(id, &QName::new("cm", "title"))
                .expect("read"),
            Some("mine".into())
        );
    }

    #[test]
    fn non_retryable_errors_surface_immediately() {
        let repo = repo();
        let mut attempts = 0;
        let result: Result<(), ArborError> = repo.retrying().do_in_transaction(|_| {
            attempts += 1;
            Err(ArborError::IllegalState("boom".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }

    #[test]
    fn every_write_commit_records_a_transaction() {
        let repo = repo();
        with_store(&repo);
        let state = repo.snapshot();
        assert_eq!(state.txns().count(), 1);
        let txn = state.txns().next().map(|t| t.id).expect("txn");
        assert!(state.txn_usage(txn) >= 1);
    }

    #[test]
    fn read_only_commit_is_a_no_op() {
        let repo = repo();
        let outcome = repo.begin().commit().expect("commit");
        assert_eq!(outcome, CommitOutcome::default());
        assert_eq!(repo.stats().txns, 0);
    }

    #[test]
    fn export_and_import_round_trip() {
        let repo = repo();
        let root = with_store(&repo);
        let rows = repo.export_rows();

        let other = self::repo();
        other.import_rows(rows.clone()).expect("import");
        assert!(other.snapshot().exists(&root));
        assert_eq!(other.export_rows().nodes, rows.nodes);
    }
}
