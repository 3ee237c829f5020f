//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use crate::daemon::{CleanupDaemon, PurgeReport, Worker, run_worker};
use arbor_core::lock::{InMemoryJobLockService, JobLockService};
use arbor_core::model::qnames::PROP_NAME;
use arbor_core::primitives::MAX_SNAPSHOT_BYTES;
use arbor_core::{
    ArborError, AssocFilter, ChildAssocRef, NodeRef, PropertyValue, QName, Repository,
    RepositoryStats, StoreRef, Transaction,
    rows_from_bytes, rows_to_bytes, snapshot_checksum,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

// =============================================================================
// PATH VALIDATION
// =============================================================================

/// Canonical path of an existing regular file no larger than `max_size`.
fn validate_input_file(path: &Path, max_size: u64) -> Result<PathBuf, ArborError> {
    let canonical = path.canonicalize().map_err(|e| {
        ArborError::Storage(format!("Invalid file path '{}': {}", path.display(), e))
    })?;
    let metadata = std::fs::metadata(&canonical)
        .map_err(|e| ArborError::Storage(format!("Cannot read file metadata: {}", e)))?;
    if !metadata.is_file() {
        return Err(ArborError::Storage(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }
    if metadata.len() > max_size {
        return Err(ArborError::Serialization(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(canonical)
}

/// Output path with its parent directory canonicalized.
fn validate_output_path(path: &Path) -> Result<PathBuf, ArborError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let canonical_parent = parent.canonicalize().map_err(|e| {
        ArborError::Storage(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;
    if !canonical_parent.is_dir() {
        return Err(ArborError::Storage(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }
    let filename = path
        .file_name()
        .ok_or_else(|| ArborError::Storage("Output path has no filename".to_string()))?;
    Ok(canonical_parent.join(filename))
}

fn print_json(value: &impl Serialize) -> Result<(), ArborError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| ArborError::Serialization(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Create every store in `requested` plus both sides of each archive
/// mapping. Returns the stores that did not exist yet.
pub fn init_stores(repo: &Repository, requested: &[String]) -> Result<Vec<StoreRef>, ArborError> {
    let mut wanted = Vec::new();
    for store in requested {
        wanted.push(store.parse::<StoreRef>()?);
    }
    for mapping in &repo.config().repository.archive_stores {
        wanted.push(mapping.store.clone());
        wanted.push(mapping.archive.clone());
    }
    wanted.sort();
    wanted.dedup();

    repo.retrying().do_in_transaction(|txn| {
        let mut created = Vec::new();
        for store in &wanted {
            if !txn.exists_store(store) {
                created.push(txn.create_store(&store.protocol, &store.identifier)?);
            }
        }
        Ok(created)
    })
}

/// Create stores.
pub fn cmd_init(repo: &Repository, stores: &[String], json_mode: bool) -> Result<(), ArborError> {
    let created = init_stores(repo, stores)?;
    if json_mode {
        return print_json(&serde_json::json!({ "created": created }));
    }
    if created.is_empty() {
        println!("All stores already exist");
    }
    for store in &created {
        println!("Created store {}", store);
    }
    Ok(())
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Repository counts and the live stores.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub database: String,
    pub persistent: bool,
    #[serde(flatten)]
    pub stats: RepositoryStats,
    pub store_refs: Vec<String>,
}

#[must_use]
pub fn status_report(repo: &Repository, database: &Path) -> StatusReport {
    let stores = repo.begin().get_stores();
    StatusReport {
        database: database.to_string_lossy().into_owned(),
        persistent: repo.is_persistent(),
        stats: repo.stats(),
        store_refs: stores.iter().map(ToString::to_string).collect(),
    }
}

/// Show repository status.
pub fn cmd_status(repo: &Repository, database: &Path, json_mode: bool) -> Result<(), ArborError> {
    let report = status_report(repo, database);
    if json_mode {
        return print_json(&report);
    }

    println!("Arbor Repository Status");
    println!("=======================");
    println!("Database: {}", report.database);
    println!();
    println!("Stores:             {}", report.stats.stores);
    println!("Live Nodes:         {}", report.stats.live_nodes);
    println!("Deleted Nodes:      {}", report.stats.deleted_nodes);
    println!("Child Associations: {}", report.stats.child_assocs);
    println!("Peer Associations:  {}", report.stats.peer_assocs);
    println!("Transactions:       {}", report.stats.txns);
    println!("Unused:             {}", report.stats.unused_txns);
    println!();
    for store in &report.store_refs {
        println!("  {}", store);
    }
    Ok(())
}

// =============================================================================
// TREE COMMAND
// =============================================================================

/// One line of a hierarchy listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeEntry {
    pub depth: usize,
    pub qname: QName,
    pub name: Option<String>,
    pub node_type: QName,
    pub node: NodeRef,
    pub primary: bool,
}

/// The hierarchy below a store root, depth first in sibling order.
///
/// Only primary children are descended into; secondary children are listed
/// where they are linked.
pub fn store_tree(repo: &Repository, store: &StoreRef, max_depth: usize) -> Result<Vec<TreeEntry>, ArborError> {
    let txn = repo.begin();
    let root = txn.get_root_node(store)?;
    let mut entries = Vec::new();
    let mut stack: Vec<(ChildAssocRef, usize)> = Vec::new();
    if max_depth > 0 {
        push_children(&txn, &root, 1, &mut stack)?;
    }
    while let Some((assoc, depth)) = stack.pop() {
        if assoc.is_primary && depth < max_depth {
            push_children(&txn, &assoc.child, depth.saturating_add(1), &mut stack)?;
        }
        let name = match txn.get_property(&assoc.child, &PROP_NAME)? {
            Some(PropertyValue::Text(name)) => Some(name),
            _ => None,
        };
        entries.push(TreeEntry {
            depth,
            qname: assoc.qname,
            name,
            node_type: txn.get_type(&assoc.child)?,
            node: assoc.child,
            primary: assoc.is_primary,
        });
    }
    Ok(entries)
}

/// Push the children of `parent` so the first sibling pops first.
fn push_children(
    txn: &Transaction,
    parent: &NodeRef,
    depth: usize,
    stack: &mut Vec<(ChildAssocRef, usize)>,
) -> Result<(), ArborError> {
    let children = txn.get_child_assocs(parent, AssocFilter::any(), None, true)?;
    stack.extend(children.into_iter().rev().map(|assoc| (assoc, depth)));
    Ok(())
}

/// Print the primary hierarchy of a store.
pub fn cmd_tree(repo: &Repository, store: &str, depth: usize, json_mode: bool) -> Result<(), ArborError> {
    let store: StoreRef = store.parse()?;
    let entries = store_tree(repo, &store, depth)?;
    if json_mode {
        return print_json(&entries);
    }
    println!("{}", store);
    for entry in &entries {
        let indent = "  ".repeat(entry.depth);
        let marker = if entry.primary { "" } else { " (secondary)" };
        let name = entry.name.as_deref().unwrap_or("-");
        println!(
            "{}{} [{}] {}{}",
            indent, entry.qname, entry.node_type, name, marker
        );
    }
    Ok(())
}

// =============================================================================
// CLEANUP COMMANDS
// =============================================================================

/// Run the selected workers once, nodes before transactions.
pub async fn purge_once(repo: &Repository, worker: Option<Worker>) -> Result<Vec<PurgeReport>, ArborError> {
    let locks: Arc<dyn JobLockService> =
        Arc::new(InMemoryJobLockService::new(Arc::clone(repo.clock())));
    let workers = match worker {
        Some(worker) => vec![worker],
        None => vec![Worker::Nodes, Worker::Txns],
    };
    let mut reports = Vec::new();
    for worker in workers {
        reports.push(run_worker(repo.clone(), Arc::clone(&locks), worker).await?);
    }
    Ok(reports)
}

/// Run cleanup workers once.
pub async fn cmd_purge(repo: &Repository, worker: Option<Worker>, json_mode: bool) -> Result<(), ArborError> {
    let reports = purge_once(repo, worker).await?;
    if json_mode {
        return print_json(&reports);
    }
    for report in &reports {
        println!("{}", report);
    }
    Ok(())
}

/// Run cleanup workers until Ctrl+C.
pub async fn cmd_daemon(repo: Repository) -> Result<(), ArborError> {
    let daemon = CleanupDaemon::new(repo);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let worker = tokio::spawn(async move { daemon.run(shutdown_rx).await });

    println!("Arbor cleanup daemon running. Press Ctrl+C to stop");
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| ArborError::IllegalState(format!("cannot listen for Ctrl+C: {e}")))?;
    // A send error means the daemon has already stopped.
    let _ = shutdown_tx.send(());
    worker
        .await
        .map_err(|e| ArborError::IllegalState(format!("cleanup daemon failed: {e}")))
}

// =============================================================================
// SNAPSHOT COMMANDS
// =============================================================================

/// Export every row as a snapshot. Returns the written path and checksum.
pub fn export_snapshot(repo: &Repository, output: &Path) -> Result<(PathBuf, String), ArborError> {
    let path = validate_output_path(output)?;
    let bytes = rows_to_bytes(&repo.export_rows())?;
    std::fs::write(&path, &bytes)
        .map_err(|e| ArborError::Storage(format!("Failed to write '{}': {}", path.display(), e)))?;
    tracing::info!(path = %path.display(), bytes = bytes.len(), "exported snapshot");
    Ok((path, snapshot_checksum(&bytes)))
}

pub fn cmd_export(repo: &Repository, output: &Path) -> Result<(), ArborError> {
    let (path, checksum) = export_snapshot(repo, output)?;
    println!("Exported snapshot to {}", path.display());
    println!("Checksum: {}", checksum);
    Ok(())
}

/// Replace the repository content with the snapshot at `input`.
pub fn import_snapshot(repo: &Repository, input: &Path) -> Result<String, ArborError> {
    let path = validate_input_file(input, MAX_SNAPSHOT_BYTES as u64)?;
    let bytes = std::fs::read(&path)
        .map_err(|e| ArborError::Storage(format!("Failed to read '{}': {}", path.display(), e)))?;
    repo.import_rows(rows_from_bytes(&bytes)?)?;
    Ok(snapshot_checksum(&bytes))
}

pub fn cmd_import(repo: &Repository, input: &Path) -> Result<(), ArborError> {
    let checksum = import_snapshot(repo, input)?;
    let stats = repo.stats();
    println!(
        "Imported {} nodes in {} stores (checksum {})",
        stats.live_nodes.saturating_add(stats.deleted_nodes),
        stats.stores,
        checksum
    );
    Ok(())
}

// =============================================================================
// COMPACT COMMAND
// =============================================================================

pub fn cmd_compact(repo: &Repository) -> Result<(), ArborError> {
    if repo.compact()? {
        println!("Database compacted");
    } else {
        println!("Nothing to compact");
    }
    Ok(())
}
