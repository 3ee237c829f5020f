//! # Cleanup Workers
//!
//! Background jobs that reclaim storage left behind by normal operation.
//!
//! - [`deleted_nodes`]: physically removes node rows marked deleted once
//!   their last change is older than the configured purge age.
//! - [`transactions`]: removes transaction records no node row references
//!   any more, sweeping commit-time space in fixed windows.
//!
//! Both jobs hold a [`crate::lock::HeldLock`] for the duration of a run and
//! never return errors to the caller: failures end up in the run summary
//! and in the log.

pub mod deleted_nodes;
pub mod transactions;

pub use deleted_nodes::{DeletedNodeCleanup, NodePurgeSummary};
pub use transactions::{TxnPurgeSummary, UnusedTransactionCleanup};
