//! # Configuration
//!
//! Operator tunables for a repository, its retrying transactions and the
//! cleanup workers. Every section defaults field by field, so a partial TOML
//! file (or none) is valid.

use crate::{ArborError, StoreRef};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;
const HOUR_MS: i64 = 60 * 60 * 1000;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArborConfig {
    pub repository: RepositoryConfig,
    pub retry: RetryConfig,
    pub cleanup: CleanupConfig,
}

impl ArborConfig {
    /// Reject values no component could work with.
    pub fn validate(&self) -> Result<(), ArborError> {
        if self.retry.min_wait_ms > self.retry.max_wait_ms {
            return Err(ArborError::InvalidArgument(format!(
                "retry.min_wait_ms ({}) exceeds retry.max_wait_ms ({})",
                self.retry.min_wait_ms, self.retry.max_wait_ms
            )));
        }
        if self.cleanup.txn_purge_window_ms <= 0 {
            return Err(ArborError::InvalidArgument(
                "cleanup.txn_purge_window_ms must be positive".to_string(),
            ));
        }
        if self.cleanup.lock_ttl_ms == 0 {
            return Err(ArborError::InvalidArgument(
                "cleanup.lock_ttl_ms must be positive".to_string(),
            ));
        }
        for mapping in &self.repository.archive_stores {
            if mapping.store == mapping.archive {
                return Err(ArborError::InvalidArgument(format!(
                    "store {} cannot archive into itself",
                    mapping.store
                )));
            }
        }
        Ok(())
    }
}

/// A store whose deletions are archived into another store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveMapping {
    pub store: StoreRef,
    pub archive: StoreRef,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    pub archive_stores: Vec<ArchiveMapping>,
    /// Enables parent modification stamps for propagating association types.
    pub propagate_timestamps: bool,
}

impl RepositoryConfig {
    /// Archive store configured for `store`.
    #[must_use]
    pub fn archive_store_for(&self, store: &StoreRef) -> Option<&StoreRef> {
        self.archive_stores
            .iter()
            .find(|m| &m.store == store)
            .map(|m| &m.archive)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub min_wait_ms: u64,
    pub max_wait_ms: u64,
    pub wait_increment_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 20,
            min_wait_ms: 10,
            max_wait_ms: 500,
            wait_increment_ms: 10,
        }
    }
}

impl RetryConfig {
    /// Wait before retry number `attempt` (1-based): linear back-off, capped.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let extra = self
            .wait_increment_ms
            .saturating_mul(u64::from(attempt.saturating_sub(1)));
        let ms = self.min_wait_ms.saturating_add(extra).min(self.max_wait_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Minimum age of a deleted node's transaction before purge. Negative
    /// disables the deleted-node purge.
    pub node_min_purge_age_ms: i64,
    pub txn_min_purge_age_ms: i64,
    pub txn_purge_window_ms: i64,
    pub max_nodes_per_run: usize,
    pub lock_ttl_ms: u64,
    pub node_purge_interval_secs: u64,
    pub txn_purge_interval_secs: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            node_min_purge_age_ms: 30 * DAY_MS,
            txn_min_purge_age_ms: 30 * DAY_MS,
            txn_purge_window_ms: 2 * HOUR_MS,
            max_nodes_per_run: 5_000,
            lock_ttl_ms: 60_000,
            node_purge_interval_secs: 3_600,
            txn_purge_interval_secs: 3_600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ArborConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.retry.max_retries, 20);
        assert_eq!(config.cleanup.txn_purge_window_ms, 7_200_000);
        assert!(!config.repository.propagate_timestamps);
    }

    #[test]
    fn backoff_is_linear_and_capped() {
        let retry = RetryConfig::default();
        assert_eq!(retry.backoff(1), Duration::from_millis(10));
        assert_eq!(retry.backoff(3), Duration::from_millis(30));
        assert_eq!(retry.backoff(1_000), Duration::from_millis(500));
    }

    #[test]
    fn self_archiving_store_is_rejected() {
        let store = StoreRef::new("workspace", "SpacesStore");
        let mut config = ArborConfig::default();
        config.repository.archive_stores.push(ArchiveMapping {
            store: store.clone(),
            archive: store,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn archive_lookup_by_store() {
        let mut config = RepositoryConfig::default();
        config.archive_stores.push(ArchiveMapping {
            store: StoreRef::new("workspace", "SpacesStore"),
            archive: StoreRef::new("archive", "SpacesStore"),
        });
        let found = config.archive_store_for(&StoreRef::new("workspace", "SpacesStore"));
        assert_eq!(found, Some(&StoreRef::new("archive", "SpacesStore")));
    }
}
