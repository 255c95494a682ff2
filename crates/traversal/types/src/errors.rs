//! Error types for the traversal data model

use crate::{EntryId, FeedbackId};

/// Errors raised while building or checking traversal model values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("Entry not found: {0}")]
    EntryNotFound(EntryId),

    #[error("Duplicate entry ID: {0}")]
    DuplicateEntryId(EntryId),

    #[error("Entry '{0}' is reachable from its own child scope")]
    RecursiveScope(EntryId),

    #[error("Invalid secret reference: expected '$' followed by a name")]
    InvalidSecretReference,

    #[error("Feedback {0} is sensitive but does not hold a secret reference")]
    SensitivePayload(FeedbackId),

    #[error("Feedback id gap: expected {expected}, found {found}")]
    FeedbackIdGap { expected: u64, found: u64 },

    #[error("Level stack is empty")]
    EmptyLevelStack,

    #[error("Inconsistent level tracker: {0}")]
    InconsistentLevel(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for model operations
pub type ModelResult<T> = Result<T, ModelError>;
