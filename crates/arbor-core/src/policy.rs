//! # Lifecycle Policies and Indexer
//!
//! Two kinds of listeners observe the mutation engine:
//!
//! - [`NodePolicy`] listeners run synchronously inside the transaction, in
//!   registration order. A before-hook returns a [`Verdict`]; the first
//!   `Abort` stops the dispatch and the operation fails with
//!   [`ArborError::Vetoed`], rolling back the whole transaction.
//! - [`Indexer`] sinks receive fire-and-forget [`IndexEvent`]s after the
//!   transaction has committed. A rolled-back attempt never reaches them.

use crate::{ArborError, ChildAssocRef, NodeRef, PeerAssocRef, PropertyMap, QName};
use std::sync::{Arc, Mutex};
use tracing::debug;

// =============================================================================
// EVENTS
// =============================================================================

/// Notification fired before an operation; listeners may veto it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeforeEvent {
    CreateNode {
        parent: NodeRef,
        assoc_type: QName,
        node_type: QName,
    },
    UpdateNode {
        node: NodeRef,
    },
    DeleteNode {
        node: NodeRef,
    },
    ArchiveNode {
        node: NodeRef,
    },
    AddAspect {
        node: NodeRef,
        aspect: QName,
    },
    RemoveAspect {
        node: NodeRef,
        aspect: QName,
    },
    SetNodeType {
        node: NodeRef,
        old_type: QName,
        new_type: QName,
    },
    MoveNode {
        old_assoc: ChildAssocRef,
        new_parent: NodeRef,
    },
    RestoreNode {
        node: NodeRef,
    },
    CreateChildAssociation {
        parent: NodeRef,
        child: NodeRef,
        assoc_type: QName,
    },
    DeleteChildAssociation {
        assoc: ChildAssocRef,
    },
    CreateAssociation {
        source: NodeRef,
        target: NodeRef,
        assoc_type: QName,
    },
    DeleteAssociation {
        assoc: PeerAssocRef,
    },
}

impl BeforeEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateNode { .. } => "beforeCreateNode",
            Self::UpdateNode { .. } => "beforeUpdateNode",
            Self::DeleteNode { .. } => "beforeDeleteNode",
            Self::ArchiveNode { .. } => "beforeArchiveNode",
            Self::AddAspect { .. } => "beforeAddAspect",
            Self::RemoveAspect { .. } => "beforeRemoveAspect",
            Self::SetNodeType { .. } => "beforeSetNodeType",
            Self::MoveNode { .. } => "beforeMoveNode",
            Self::RestoreNode { .. } => "beforeRestoreNode",
            Self::CreateChildAssociation { .. } => "beforeCreateChildAssociation",
            Self::DeleteChildAssociation { .. } => "beforeDeleteChildAssociation",
            Self::CreateAssociation { .. } => "beforeCreateAssociation",
            Self::DeleteAssociation { .. } => "beforeDeleteAssociation",
        }
    }
}

/// Notification fired after an operation took effect in the transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AfterEvent {
    CreateNode {
        assoc: ChildAssocRef,
    },
    UpdateNode {
        node: NodeRef,
    },
    UpdateProperties {
        node: NodeRef,
        before: PropertyMap,
        after: PropertyMap,
    },
    DeleteNode {
        assoc: ChildAssocRef,
        node_type: QName,
        archived: bool,
    },
    AddAspect {
        node: NodeRef,
        aspect: QName,
    },
    RemoveAspect {
        node: NodeRef,
        aspect: QName,
    },
    SetNodeType {
        node: NodeRef,
        old_type: QName,
        new_type: QName,
    },
    MoveNode {
        old_assoc: ChildAssocRef,
        new_assoc: ChildAssocRef,
    },
    RestoreNode {
        assoc: ChildAssocRef,
    },
    CreateChildAssociation {
        assoc: ChildAssocRef,
        is_new_node: bool,
    },
    DeleteChildAssociation {
        assoc: ChildAssocRef,
    },
    CreateAssociation {
        assoc: PeerAssocRef,
    },
    DeleteAssociation {
        assoc: PeerAssocRef,
    },
}

impl AfterEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateNode { .. } => "onCreateNode",
            Self::UpdateNode { .. } => "onUpdateNode",
            Self::UpdateProperties { .. } => "onUpdateProperties",
            Self::DeleteNode { .. } => "onDeleteNode",
            Self::AddAspect { .. } => "onAddAspect",
            Self::RemoveAspect { .. } => "onRemoveAspect",
            Self::SetNodeType { .. } => "onSetNodeType",
            Self::MoveNode { .. } => "onMoveNode",
            Self::RestoreNode { .. } => "onRestoreNode",
            Self::CreateChildAssociation { .. } => "onCreateChildAssociation",
            Self::DeleteChildAssociation { .. } => "onDeleteChildAssociation",
            Self::CreateAssociation { .. } => "onCreateAssociation",
            Self::DeleteAssociation { .. } => "onDeleteAssociation",
        }
    }
}

/// Outcome of a before-hook.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Verdict {
    #[default]
    Proceed,
    Abort(String),
}

/// A synchronous lifecycle listener.
pub trait NodePolicy: Send + Sync {
    fn before(&self, _event: &BeforeEvent) -> Verdict {
        Verdict::Proceed
    }

    fn after(&self, _event: &AfterEvent) {}
}

/// Ordered listener list with short-circuiting veto.
#[derive(Clone, Default)]
pub struct PolicyBus {
    policies: Vec<Arc<dyn NodePolicy>>,
}

impl std::fmt::Debug for PolicyBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyBus")
            .field("policies", &self.policies.len())
            .finish()
    }
}

impl PolicyBus {
    pub fn register(&mut self, policy: Arc<dyn NodePolicy>) {
        self.policies.push(policy);
    }

    /// Dispatch a before-event; the first abort wins.
    pub fn before(&self, event: &BeforeEvent) -> Result<(), ArborError> {
        for policy in &self.policies {
            if let Verdict::Abort(reason) = policy.before(event) {
                debug!(event = event.name(), %reason, "operation vetoed");
                return Err(ArborError::Vetoed(format!("{}: {}", event.name(), reason)));
            }
        }
        Ok(())
    }

    pub fn after(&self, event: &AfterEvent) {
        for policy in &self.policies {
            policy.after(event);
        }
    }
}

// =============================================================================
// INDEXER
// =============================================================================

/// Change notification delivered to indexers after commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexEvent {
    Create(ChildAssocRef),
    Update(NodeRef),
    Delete(ChildAssocRef),
    Move {
        from: ChildAssocRef,
        to: ChildAssocRef,
    },
    CreateChildAssociation(ChildAssocRef),
    DeleteChildAssociation(ChildAssocRef),
}

/// Fire-and-forget sink for committed changes.
pub trait Indexer: Send + Sync {
    fn index(&self, event: &IndexEvent);
}

// =============================================================================
// RECORDER
// =============================================================================

/// Anything the recorder has seen, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedEvent {
    Before(BeforeEvent),
    After(AfterEvent),
    Index(IndexEvent),
}

type VetoRule = Box<dyn Fn(&BeforeEvent) -> Option<String> + Send + Sync>;

/// Policy and indexer that records every event; optionally vetoes.
#[derive(Default)]
pub struct EventRecorder {
    events: Mutex<Vec<RecordedEvent>>,
    veto: Option<VetoRule>,
}

impl std::fmt::Debug for EventRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRecorder")
            .field("events", &self.events().len())
            .field("vetoing", &self.veto.is_some())
            .finish()
    }
}

impl EventRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A recorder that aborts every before-event for which `rule` returns a
    /// reason.
    #[must_use]
    pub fn vetoing(rule: impl Fn(&BeforeEvent) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            veto: Some(Box::new(rule)),
        }
    }

    fn push(&self, event: RecordedEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }

    /// Everything recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    #[must_use]
    pub fn after_events(&self) -> Vec<AfterEvent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                RecordedEvent::After(after) => Some(after),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn before_events(&self) -> Vec<BeforeEvent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                RecordedEvent::Before(before) => Some(before),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn index_events(&self) -> Vec<IndexEvent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                RecordedEvent::Index(index) => Some(index),
                _ => None,
            })
            .collect()
    }

    /// Number of recorded after-events with the given name.
    #[must_use]
    pub fn count_after(&self, name: &str) -> usize {
        self.after_events()
            .iter()
            .filter(|e| e.name() == name)
            .count()
    }

    /// Number of recorded before-events with the given name.
    #[must_use]
    pub fn count_before(&self, name: &str) -> usize {
        self.before_events()
            .iter()
            .filter(|e| e.name() == name)
            .count()
    }

    pub fn clear(&self) {
        match self.events.lock() {
            Ok(mut events) => events.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

impl NodePolicy for EventRecorder {
    fn before(&self, event: &BeforeEvent) -> Verdict {
        self.push(RecordedEvent::Before(event.clone()));
        match self.veto.as_ref().and_then(|rule| rule(event)) {
            Some(reason) => Verdict::Abort(reason),
            None => Verdict::Proceed,
        }
    }

    fn after(&self, event: &AfterEvent) {
        self.push(RecordedEvent::After(event.clone()));
    }
}

impl Indexer for EventRecorder {
    fn index(&self, event: &IndexEvent) {
        self.push(RecordedEvent::Index(event.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreRef;

    fn node(uuid: &str) -> NodeRef {
        NodeRef::new(StoreRef::new("workspace", "test"), uuid)
    }

    #[test]
    fn first_abort_short_circuits() {
        let first = Arc::new(EventRecorder::vetoing(|_| Some("no".to_string())));
        let second = Arc::new(EventRecorder::new());
        let mut bus = PolicyBus::default();
        bus.register(first.clone());
        bus.register(second.clone());

        let result = bus.before(&BeforeEvent::DeleteNode { node: node("a") });
        assert!(matches!(result, Err(ArborError::Vetoed(_))));
        assert_eq!(first.before_events().len(), 1);
        assert!(second.before_events().is_empty());
    }

    #[test]
    fn selective_veto_lets_other_events_through() {
        let recorder = Arc::new(EventRecorder::vetoing(|e| match e {
            BeforeEvent::DeleteNode { .. } => Some("protected".to_string()),
            _ => None,
        }));
        let mut bus = PolicyBus::default();
        bus.register(recorder.clone());
        bus.before(&BeforeEvent::UpdateNode { node: node("a") })
            .expect("update allowed");
        assert!(bus.before(&BeforeEvent::DeleteNode { node: node("a") }).is_err());
    }

    #[test]
    fn after_events_reach_every_listener() {
        let a = Arc::new(EventRecorder::new());
        let b = Arc::new(EventRecorder::new());
        let mut bus = PolicyBus::default();
        bus.register(a.clone());
        bus.register(b.clone());
        bus.after(&AfterEvent::UpdateNode { node: node("x") });
        assert_eq!(a.count_after("onUpdateNode"), 1);
        assert_eq!(b.count_after("onUpdateNode"), 1);
        a.clear();
        assert!(a.events().is_empty());
    }
}
