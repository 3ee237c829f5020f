//! Integration tests for the Arbor command implementations.
//!
//! Repositories are opened on temporary redb files the way the binary opens
//! them, then driven through the command functions.

#![allow(clippy::unwrap_used, clippy::panic)]

use arbor::cli::{
    export_snapshot, import_snapshot, init_stores, purge_once, status_report, store_tree,
};
use arbor::daemon::{PurgeReport, Worker};
use arbor::settings::{load_dictionary, open_repository, parse_config};
use arbor_core::config::ArborConfig;
use arbor_core::model::qnames::{ASSOC_CHILDREN, ASSOC_CONTAINS, PROP_NAME, TYPE_CONTENT, TYPE_FOLDER};
use arbor_core::{NodeRef, PropertyMap, PropertyValue, QName, Repository, StoreRef};
use std::path::Path;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

fn archiving_config() -> ArborConfig {
    parse_config(
        r#"
        [cleanup]
        node_min_purge_age_ms = 0
        txn_min_purge_age_ms = 0

        [[repository.archive_stores]]
        store = "workspace://SpacesStore"
        archive = "archive://SpacesStore"
        "#,
    )
    .unwrap()
}

fn open(path: &Path, config: ArborConfig) -> Repository {
    open_repository(Some(path), config, load_dictionary(None).unwrap()).unwrap()
}

fn workspace() -> StoreRef {
    StoreRef::new("workspace", "SpacesStore")
}

fn named(name: &str) -> PropertyMap {
    let mut properties = PropertyMap::new();
    properties.insert(PROP_NAME.clone(), PropertyValue::from(name));
    properties
}

/// `/projects/{report.txt, notes.txt}` below the workspace root.
fn populate(repo: &Repository) -> (NodeRef, NodeRef) {
    repo.retrying()
        .do_in_transaction(|txn| {
            let root = txn.get_root_node(&workspace())?;
            let folder = txn
                .create_node(
                    &root,
                    &ASSOC_CHILDREN,
                    &QName::new("cm", "projects"),
                    &TYPE_FOLDER,
                    named("projects"),
                )?
                .child;
            let report = txn
                .create_node(
                    &folder,
                    &ASSOC_CONTAINS,
                    &QName::new("cm", "report"),
                    &TYPE_CONTENT,
                    named("report.txt"),
                )?
                .child;
            txn.create_node(
                &folder,
                &ASSOC_CONTAINS,
                &QName::new("cm", "notes"),
                &TYPE_CONTENT,
                named("notes.txt"),
            )?;
            Ok((folder, report))
        })
        .unwrap()
}

// =============================================================================
// INIT AND STATUS
// =============================================================================

mod init_and_status {
    use super::*;

    #[test]
    fn init_creates_requested_and_archive_stores_once() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open(&dir.path().join("arbor.db"), archiving_config());

        let created = init_stores(&repo, &["workspace://SpacesStore".to_string()]).unwrap();
        assert_eq!(
            created,
            vec![StoreRef::new("archive", "SpacesStore"), workspace()]
        );
        let again = init_stores(&repo, &["workspace://SpacesStore".to_string()]).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn init_rejects_malformed_store_refs() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open(&dir.path().join("arbor.db"), ArborConfig::default());
        assert!(init_stores(&repo, &["no-separator".to_string()]).is_err());
        assert_eq!(repo.stats().stores, 0);
    }

    #[test]
    fn status_counts_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arbor.db");
        {
            let repo = open(&path, archiving_config());
            init_stores(&repo, &["workspace://SpacesStore".to_string()]).unwrap();
            populate(&repo);
        }
        let repo = open(&path, archiving_config());
        let report = status_report(&repo, &path);
        assert!(report.persistent);
        // Two store roots, a folder and two documents.
        assert_eq!(report.stats.live_nodes, 5);
        assert_eq!(
            report.store_refs,
            vec!["archive://SpacesStore", "workspace://SpacesStore"]
        );

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["live_nodes"], 5);
    }
}

// =============================================================================
// TREE
// =============================================================================

mod tree {
    use super::*;

    #[test]
    fn lists_primary_hierarchy_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open(&dir.path().join("arbor.db"), ArborConfig::default());
        init_stores(&repo, &["workspace://SpacesStore".to_string()]).unwrap();
        populate(&repo);

        let entries = store_tree(&repo, &workspace(), 8).unwrap();
        let lines: Vec<(usize, Option<&str>)> = entries
            .iter()
            .map(|e| (e.depth, e.name.as_deref()))
            .collect();
        assert_eq!(
            lines,
            vec![
                (1, Some("projects")),
                (2, Some("report.txt")),
                (2, Some("notes.txt")),
            ]
        );
        assert!(entries.iter().all(|e| e.primary));
    }

    #[test]
    fn depth_limit_and_secondary_links() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open(&dir.path().join("arbor.db"), ArborConfig::default());
        init_stores(&repo, &["workspace://SpacesStore".to_string()]).unwrap();
        let (folder, report) = populate(&repo);
        repo.retrying()
            .do_in_transaction(|txn| {
                let root = txn.get_root_node(&workspace())?;
                txn.add_child(&root, &report, &ASSOC_CHILDREN, &QName::new("cm", "shortcut"))
            })
            .unwrap();

        let entries = store_tree(&repo, &workspace(), 1).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].node, folder);
        assert_eq!(entries[1].node, report);
        assert!(!entries[1].primary);
    }

    #[test]
    fn unknown_store_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open(&dir.path().join("arbor.db"), ArborConfig::default());
        assert!(store_tree(&repo, &workspace(), 3).is_err());
    }
}

// =============================================================================
// PURGE
// =============================================================================

mod purge {
    use super::*;

    #[tokio::test]
    async fn purge_runs_both_workers_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open(&dir.path().join("arbor.db"), archiving_config());
        init_stores(&repo, &["workspace://SpacesStore".to_string()]).unwrap();
        let (folder, _) = populate(&repo);
        // Deleting straight out of the archive leaves rows to purge.
        repo.retrying()
            .do_in_transaction(|txn| txn.delete_node(&folder, false))
            .unwrap();
        assert_eq!(repo.stats().deleted_nodes, 3);
        std::thread::sleep(std::time::Duration::from_millis(5));

        let reports = purge_once(&repo, None).await.unwrap();
        assert_eq!(reports.len(), 2);
        let PurgeReport::DeletedNodes(nodes) = &reports[0] else {
            panic!("nodes run first");
        };
        assert_eq!(nodes.purged, 3);
        assert!(matches!(reports[1], PurgeReport::UnusedTransactions(_)));
        assert_eq!(repo.stats().deleted_nodes, 0);
    }

    #[tokio::test]
    async fn single_worker_selection() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open(&dir.path().join("arbor.db"), archiving_config());
        let reports = purge_once(&repo, Some(Worker::Txns)).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert!(matches!(reports[0], PurgeReport::UnusedTransactions(_)));
    }
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

mod snapshots {
    use super::*;

    #[test]
    fn export_then_import_into_fresh_repository() {
        let dir = tempfile::tempdir().unwrap();
        let source = open(&dir.path().join("source.db"), ArborConfig::default());
        init_stores(&source, &["workspace://SpacesStore".to_string()]).unwrap();
        let (_, report) = populate(&source);

        let (path, checksum) = export_snapshot(&source, &dir.path().join("dump.arbr")).unwrap();
        assert_eq!(checksum.len(), 64);

        let target = open(&dir.path().join("target.db"), ArborConfig::default());
        let imported = import_snapshot(&target, &path).unwrap();
        assert_eq!(imported, checksum);
        assert_eq!(target.stats(), source.stats());
        let txn = target.begin();
        assert_eq!(
            txn.get_path(&report).unwrap().to_string(),
            "/cm:projects/cm:report"
        );

        // New ids never collide with imported ones.
        populate_more(&target);
        assert_eq!(target.stats().live_nodes, source.stats().live_nodes + 1);
    }

    fn populate_more(repo: &Repository) {
        repo.retrying()
            .do_in_transaction(|txn| {
                let root = txn.get_root_node(&workspace())?;
                txn.create_node(
                    &root,
                    &ASSOC_CHILDREN,
                    &QName::new("cm", "later"),
                    &TYPE_FOLDER,
                    named("later"),
                )
            })
            .unwrap();
    }

    #[test]
    fn import_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.arbr");
        std::fs::write(&path, b"not a snapshot").unwrap();
        let repo = open(&dir.path().join("arbor.db"), ArborConfig::default());
        assert!(import_snapshot(&repo, &path).is_err());
        assert!(import_snapshot(&repo, &dir.path().join("missing.arbr")).is_err());
    }

    #[test]
    fn export_needs_an_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open(&dir.path().join("arbor.db"), ArborConfig::default());
        let result = export_snapshot(&repo, &dir.path().join("nope").join("dump.arbr"));
        assert!(result.is_err());
    }
}
