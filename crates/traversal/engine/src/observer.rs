//! Traversal events and observer registry
//!
//! Observers are notified after a state change has been committed, in
//! registration order. Event payloads carry rendered answers only, so a
//! sensitive feedback always arrives as the redaction marker.

use crate::session::SessionId;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use traversal_types::{EntryId, FeedbackId, OperationType};

/// Events emitted by the traverser
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraversalEvent {
    FeedbackEntered {
        session_id: SessionId,
        feedback_id: FeedbackId,
        entry_id: EntryId,
        rendered_answer: String,
        is_automatic: bool,
    },
    NextQuestionReady {
        session_id: SessionId,
        entry_id: EntryId,
        prompt: String,
        depth: usize,
    },
    Completed {
        session_id: SessionId,
        feedback_count: usize,
    },
    SessionRestored {
        session_id: SessionId,
        feedback_count: usize,
    },
    OperationsCommitted {
        session_id: SessionId,
        executed: usize,
    },
    OperationsRolledBack {
        session_id: SessionId,
        failed_type: OperationType,
        position: usize,
        rolled_back: Vec<usize>,
    },
}

impl TraversalEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            TraversalEvent::FeedbackEntered { session_id, .. }
            | TraversalEvent::NextQuestionReady { session_id, .. }
            | TraversalEvent::Completed { session_id, .. }
            | TraversalEvent::SessionRestored { session_id, .. }
            | TraversalEvent::OperationsCommitted { session_id, .. }
            | TraversalEvent::OperationsRolledBack { session_id, .. } => session_id,
        }
    }
}

/// Receives traversal events
pub trait Observer: Send + Sync {
    fn receive(&self, event: &TraversalEvent);
}

/// Handle returned by [`ObserverRegistry::register`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Ordered set of subscribed observers
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Vec<(ObserverId, Arc<dyn Observer>)>,
    next_id: u64,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: Arc<dyn Observer>) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.observers.push((id, observer));
        id
    }

    /// Remove an observer; returns whether it was registered
    pub fn deregister(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        self.observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn notify(&self, event: &TraversalEvent) {
        for (_, observer) in &self.observers {
            observer.receive(event);
        }
    }

    pub fn notify_all(&self, events: &[TraversalEvent]) {
        for event in events {
            self.notify(event);
        }
    }
}

/// Observer that keeps every event it receives
#[derive(Default)]
pub struct EventRecorder {
    events: Mutex<Vec<TraversalEvent>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TraversalEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl Observer for EventRecorder {
    fn receive(&self, event: &TraversalEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}
