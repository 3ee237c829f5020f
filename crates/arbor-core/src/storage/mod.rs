//! # Storage Backends
//!
//! Persistent row storage for a repository. The engine keeps the committed
//! graph in memory and writes each transaction's dirty rows through to the
//! backend before publishing them.

mod redb_store;

pub use redb_store::RedbStore;
