//! Session document codec
//!
//! [`serialize`] and [`restore`] convert a [`Session`] to and from the
//! persisted [`SessionDocument`]. Restore fails closed: a document that does
//! not describe a reachable state of the loaded graph produces no session.

use crate::deferred::{DeferredOperationsRegistry, OperationCatalog};
use crate::error::RestoreError;
use crate::session::{Session, SessionId, SessionState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use traversal_types::{
    DeferredOperation, EntryId, Feedback, FeedbackLedger, LevelStack, LevelTracker, ModelError,
    WorkflowGraph, WorkflowId,
};

/// Persisted form of a session
///
/// Field names are a compatibility surface.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionDocument {
    pub session_id: SessionId,
    pub workflow_id: WorkflowId,
    pub workflow_version_hash: String,
    pub current_question_id: Option<EntryId>,
    pub feedback_history: Vec<Feedback>,
    pub level_stack: LevelStack,
    pub current_level: LevelTracker,
    pub deferred_operations: Vec<DeferredOperation>,
    /// Previous answers offered as defaults, never part of the history
    #[serde(default)]
    pub feedback_proposals: Vec<Feedback>,
}

impl SessionDocument {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse a document. Parse errors report position only, since serde
    /// messages may quote the offending value.
    pub fn from_json(json: &str) -> Result<Self, RestoreError> {
        serde_json::from_str(json).map_err(|e| {
            RestoreError::InvalidDocument(format!(
                "{:?} error at line {} column {}",
                e.classify(),
                e.line(),
                e.column()
            ))
        })
    }
}

/// Freeze a session into a document
pub fn serialize(session: &Session) -> SessionDocument {
    SessionDocument {
        session_id: session.session_id.clone(),
        workflow_id: session.workflow_id.clone(),
        workflow_version_hash: session.workflow_version_hash.clone(),
        current_question_id: session.current.current().cloned(),
        feedback_history: session.ledger.entries().to_vec(),
        level_stack: session.stack.clone(),
        current_level: session.current.clone(),
        deferred_operations: session.operations.operations().to_vec(),
        feedback_proposals: session.proposals.values().cloned().collect(),
    }
}

/// Rehydrate a session, checking it against the loaded graph
pub fn restore(
    document: SessionDocument,
    graph: &WorkflowGraph,
    version_hash: &str,
    catalog: &OperationCatalog,
) -> Result<Session, RestoreError> {
    if document.workflow_id != graph.id {
        return Err(RestoreError::WorkflowMismatch {
            expected: graph.id.clone(),
            found: document.workflow_id,
        });
    }
    if document.workflow_version_hash != version_hash {
        return Err(RestoreError::VersionMismatch {
            expected: version_hash.to_string(),
            found: document.workflow_version_hash,
        });
    }

    for feedback in document
        .feedback_history
        .iter()
        .chain(&document.feedback_proposals)
    {
        check_feedback_entry(graph, feedback)?;
    }
    let ledger =
        FeedbackLedger::from_history(document.feedback_history).map_err(RestoreError::Ledger)?;

    let mut proposals = BTreeMap::new();
    for proposal in document.feedback_proposals {
        proposals.insert(proposal.entry_id.clone(), proposal);
    }

    let last_id = ledger.last_id();
    for (position, op) in document.deferred_operations.iter().enumerate() {
        if op.feedback_id.is_some() && op.feedback_id > last_id {
            return Err(RestoreError::OperationAheadOfHistory {
                position,
                op_type: op.op_type.clone(),
            });
        }
        if !catalog.contains(&op.op_type) {
            return Err(RestoreError::UnknownOperation(op.op_type.clone()));
        }
    }

    let state = check_levels(
        graph,
        &document.level_stack,
        &document.current_level,
        ledger.is_empty(),
    )?;
    if document.current_question_id.as_ref() != document.current_level.current() {
        return Err(RestoreError::CurrentQuestionMismatch);
    }

    Ok(Session {
        session_id: document.session_id,
        workflow_id: document.workflow_id,
        workflow_version_hash: document.workflow_version_hash,
        state,
        ledger,
        current: document.current_level,
        stack: document.level_stack,
        operations: DeferredOperationsRegistry::from_operations(document.deferred_operations),
        proposals,
        operations_committed: false,
    })
}

fn check_feedback_entry(graph: &WorkflowGraph, feedback: &Feedback) -> Result<(), RestoreError> {
    let entry = graph
        .get_entry(&feedback.entry_id)
        .ok_or_else(|| RestoreError::UnknownEntry(feedback.entry_id.clone()))?;
    if (entry.sensitive || feedback.is_sensitive) && !feedback.answer().is_secret() {
        return Err(RestoreError::Ledger(ModelError::SensitivePayload(
            feedback.feedback_id,
        )));
    }
    Ok(())
}

/// Check the level chain is one the graph can produce and derive the
/// session state from it
fn check_levels(
    graph: &WorkflowGraph,
    stack: &LevelStack,
    current: &LevelTracker,
    ledger_empty: bool,
) -> Result<SessionState, RestoreError> {
    // A session that was never started carries no levels at all
    if stack.is_empty() && current.level_entries.is_empty() && ledger_empty && !graph.is_empty()
    {
        if current.stopped_at_entry_id.is_some() || current.stopped_at_entry_index != 0 {
            return Err(RestoreError::UnbalancedLevels(
                "cursor set on an empty level".into(),
            ));
        }
        return Ok(SessionState::NotStarted);
    }

    let chain: Vec<&LevelTracker> = stack.iter().chain(std::iter::once(current)).collect();

    for tracker in &chain {
        tracker
            .check_consistency()
            .map_err(|e| RestoreError::UnbalancedLevels(e.to_string()))?;
        for id in &tracker.level_entries {
            if graph.get_entry(id).is_none() {
                return Err(RestoreError::UnknownEntry(id.clone()));
            }
        }
    }

    if chain[0].level_entries != graph.root {
        return Err(RestoreError::UnbalancedLevels(
            "outermost level is not the root scope".into(),
        ));
    }

    for (depth, pair) in chain.windows(2).enumerate() {
        let (parent, child) = (pair[0], pair[1]);
        let opener = parent.current().ok_or_else(|| {
            RestoreError::UnbalancedLevels(format!("suspended level {} is exhausted", depth))
        })?;
        let scope = graph
            .get_entry(opener)
            .and_then(|e| e.child.as_ref())
            .ok_or_else(|| {
                RestoreError::UnbalancedLevels(format!(
                    "suspended level {} is stopped on '{}', which has no child scope",
                    depth, opener
                ))
            })?;
        if scope.entries != child.level_entries {
            return Err(RestoreError::UnbalancedLevels(format!(
                "level {} does not match the child scope of '{}'",
                depth + 1,
                opener
            )));
        }
    }

    if current.is_exhausted() {
        if !stack.is_empty() {
            return Err(RestoreError::UnbalancedLevels(
                "exhausted level left on a non-empty stack".into(),
            ));
        }
        return Ok(SessionState::Completed);
    }
    Ok(SessionState::AwaitingAnswer)
}
