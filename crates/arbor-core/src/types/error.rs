use super::{AssocId, NodeRef, QName, StoreRef};
use thiserror::Error;

/// Errors that can occur in the Arbor engine.
///
/// - No silent failures
/// - Use `Result<T, ArborError>` for fallible operations
/// - Only `ConcurrencyConflict` is retried by the transaction helper;
///   every other variant would reproduce itself on a re-run
#[derive(Debug, Error)]
pub enum ArborError {
    /// The stable reference does not resolve to a live node.
    #[error("Node not found: {0}")]
    NodeNotFound(NodeRef),

    /// The store does not exist.
    #[error("Store not found: {0}")]
    StoreNotFound(StoreRef),

    /// A store with this reference already exists.
    #[error("Store already exists: {0}")]
    StoreExists(StoreRef),

    /// The type is not known to the dictionary.
    #[error("Invalid type: {0}")]
    InvalidType(QName),

    /// The aspect is not known to the dictionary.
    #[error("Invalid aspect: {0}")]
    InvalidAspect(QName),

    /// The association type is not known to the dictionary, or has the wrong kind.
    #[error("Invalid association type: {0}")]
    InvalidAssociation(QName),

    /// An argument was rejected before any mutation took place.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The child association no longer exists.
    #[error("Child association does not exist: {0:?}")]
    InvalidChildAssociation(AssocId),

    /// Adding the association would make the node its own ancestor.
    #[error("Cyclic child relationship: {parent} -> {child}")]
    CyclicRelationship { parent: NodeRef, child: NodeRef },

    /// Primary association cardinality violated.
    #[error("Association cardinality violated: {0}")]
    AssociationCardinality(String),

    /// A sibling under the same parent and association type already uses the name.
    #[error("Duplicate child name '{name}' under {parent}")]
    DuplicateChildName { parent: NodeRef, name: String },

    /// The peer association already exists and the type forbids duplicates.
    #[error("Duplicate association {assoc_type} from {source_ref} to {target}")]
    DuplicatePeerAssociation {
        source_ref: NodeRef,
        target: NodeRef,
        assoc_type: QName,
    },

    /// The operation is not legal in the node's current state.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// The node is being deleted by the current transaction.
    #[error("Node is pending delete in this transaction: {0}")]
    PendingDelete(NodeRef),

    /// A concurrent change invalidated this transaction; retry from scratch.
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// An earlier operation in this transaction failed; it can only roll back.
    #[error("Transaction is rollback-only: {0}")]
    RollbackOnly(String),

    /// A node with the same UUID already occupies the target store.
    #[error("Node already exists: {0}")]
    NodeExists(NodeRef),

    /// A before-listener vetoed the operation.
    #[error("Operation vetoed: {0}")]
    Vetoed(String),

    /// The job lock is held by someone else.
    #[error("Lock unavailable: {0}")]
    LockUnavailable(String),

    /// The job lock expired or was taken over while work was in progress.
    #[error("Lock lost: {0}")]
    LockLost(String),

    /// The storage backend failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ArborError {
    /// Whether the retrying transaction helper should re-run the work.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict(_))
    }

    pub(crate) fn storage(e: impl std::fmt::Display) -> Self {
        Self::Storage(e.to_string())
    }

    pub(crate) fn serialization(e: impl std::fmt::Display) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(ArborError::ConcurrencyConflict("x".into()).is_retryable());
        assert!(!ArborError::IllegalState("x".into()).is_retryable());
        assert!(!ArborError::RollbackOnly("x".into()).is_retryable());
        assert!(!ArborError::InvalidType(QName::new("cm", "thing")).is_retryable());
    }
}
