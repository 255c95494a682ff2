//! Error types for the traversal engine
//!
//! Messages name entries, positions and operation types. They never carry an
//! answer payload, a secret literal or a sensitive reference.

use thiserror::Error;
use traversal_types::{EntryId, ModelError, OperationType, WorkflowId};

/// A field-scoped answer rejection. The session is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid answer for '{entry_id}': {message}")]
pub struct FieldError {
    pub entry_id: EntryId,
    pub message: String,
}

impl FieldError {
    pub fn new(entry_id: EntryId, message: impl Into<String>) -> Self {
        Self {
            entry_id,
            message: message.into(),
        }
    }
}

/// Secret resolution failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecretError {
    /// `name` is kept for the host; the message never renders it
    #[error("Secret reference could not be resolved")]
    NotFound { name: String },

    #[error("Secret backend unavailable: {0}")]
    Unavailable(String),
}

/// Reasons a session document is refused on restore
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RestoreError {
    #[error("Workflow mismatch: document is for '{found}', loaded graph is '{expected}'")]
    WorkflowMismatch { expected: WorkflowId, found: WorkflowId },

    #[error("Workflow version hash mismatch: loaded {expected}, document has {found}")]
    VersionMismatch { expected: String, found: String },

    #[error("Corrupt feedback history: {0}")]
    Ledger(ModelError),

    #[error("Unknown entry in session document: {0}")]
    UnknownEntry(EntryId),

    #[error("Unbalanced level stack: {0}")]
    UnbalancedLevels(String),

    #[error("Current question does not match the current level cursor")]
    CurrentQuestionMismatch,

    #[error("No handler registered for deferred operation type '{0}'")]
    UnknownOperation(OperationType),

    #[error("Deferred operation '{op_type}' at position {position} is ahead of the feedback history")]
    OperationAheadOfHistory {
        position: usize,
        op_type: OperationType,
    },

    #[error("Invalid session document: {0}")]
    InvalidDocument(String),
}

/// A deferred operation handler failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct OperationError(pub String);

impl OperationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A rollback that failed while unwinding a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackFailure {
    pub position: usize,
    pub op_type: OperationType,
    pub reason: String,
}

/// Errors from running the deferred operations batch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeferredError {
    #[error("No handler registered for deferred operation type '{0}'")]
    UnknownOperation(OperationType),

    #[error("Deferred operation '{op_type}' at position {position} failed: {reason}")]
    OperationFailed {
        op_type: OperationType,
        position: usize,
        reason: String,
        /// Positions rolled back, in rollback order
        rolled_back: Vec<usize>,
        rollback_failures: Vec<RollbackFailure>,
    },
}

/// Top-level engine error
#[derive(Debug, Error)]
pub enum TraversalError {
    #[error(transparent)]
    Field(#[from] FieldError),

    #[error("Traversal not started")]
    NotStarted,

    #[error("Traversal already started")]
    AlreadyStarted,

    #[error("Traversal already completed")]
    AlreadyCompleted,

    #[error("Traversal not completed")]
    NotCompleted,

    #[error("Deferred operations already committed")]
    AlreadyCommitted,

    #[error("No proposal for the current question")]
    NoProposal,

    #[error("Level depth limit of {0} exceeded")]
    DepthLimit(usize),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Restore(#[from] RestoreError),

    #[error(transparent)]
    Deferred(#[from] DeferredError),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error("Session store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for engine operations
pub type TraversalResult<T> = Result<T, TraversalError>;
