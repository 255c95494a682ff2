//! Session aggregate: everything one traversal owns
//!
//! The [`Traverser`](crate::Traverser) mutates a session only by building a
//! staged copy and swapping it in, so a `Session` is always a complete,
//! consistent state.

use crate::deferred::DeferredOperationsRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use traversal_types::{
    EntryId, Feedback, FeedbackLedger, LevelContext, LevelStack, LevelTracker, WorkflowGraph,
    WorkflowId,
};

// ── Session Identifier ───────────────────────────────────────────────

/// Unique identifier for a traversal session
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// First eight characters, for log lines
    pub fn short(&self) -> &str {
        self.0
            .char_indices()
            .nth(8)
            .map_or(&self.0[..], |(i, _)| &self.0[..i])
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Session State ────────────────────────────────────────────────────

/// Traversal lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    NotStarted,
    AwaitingAnswer,
    /// Terminal for this session; a restart begins a new one
    Completed,
}

// ── Session ──────────────────────────────────────────────────────────

/// The full addressable state of one traversal
#[derive(Clone, Debug)]
pub struct Session {
    pub(crate) session_id: SessionId,
    pub(crate) workflow_id: WorkflowId,
    pub(crate) workflow_version_hash: String,
    pub(crate) state: SessionState,
    pub(crate) ledger: FeedbackLedger,
    pub(crate) current: LevelTracker,
    pub(crate) stack: LevelStack,
    pub(crate) operations: DeferredOperationsRegistry,
    /// Previous answers offered as defaults; never part of the ledger
    pub(crate) proposals: BTreeMap<EntryId, Feedback>,
    pub(crate) operations_committed: bool,
}

impl Session {
    pub(crate) fn new(graph: &WorkflowGraph, workflow_version_hash: String) -> Self {
        Self {
            session_id: SessionId::generate(),
            workflow_id: graph.id.clone(),
            workflow_version_hash,
            state: SessionState::NotStarted,
            ledger: FeedbackLedger::new(),
            current: LevelTracker::default(),
            stack: LevelStack::new(),
            operations: DeferredOperationsRegistry::new(),
            proposals: BTreeMap::new(),
            operations_committed: false,
        }
    }

    /// Position the session at the first root entry
    pub(crate) fn seed(&mut self, graph: &WorkflowGraph) {
        self.current = LevelTracker::new(graph.root.clone(), LevelContext::new());
        self.stack = LevelStack::new();
        self.state = SessionState::AwaitingAnswer;
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    pub fn workflow_version_hash(&self) -> &str {
        &self.workflow_version_hash
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn ledger(&self) -> &FeedbackLedger {
        &self.ledger
    }

    pub fn current_level(&self) -> &LevelTracker {
        &self.current
    }

    pub fn level_stack(&self) -> &LevelStack {
        &self.stack
    }

    pub fn operations(&self) -> &DeferredOperationsRegistry {
        &self.operations
    }

    pub fn proposals(&self) -> &BTreeMap<EntryId, Feedback> {
        &self.proposals
    }
}
