//! Deferred operation records
//!
//! Only metadata is stored here: a type discriminator, the feedback that was
//! current at registration, and an opaque payload. Executable behaviour is
//! looked up by discriminator when the operations run.

use crate::FeedbackId;
use serde::{Deserialize, Serialize};

/// Discriminator naming a deferred operation kind, e.g. `write_file`
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationType(pub String);

impl OperationType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Side-effecting work registered during traversal
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeferredOperation {
    #[serde(rename = "type")]
    pub op_type: OperationType,
    /// Last committed feedback when the operation was registered
    pub feedback_id: Option<FeedbackId>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl DeferredOperation {
    pub fn new(
        op_type: OperationType,
        feedback_id: Option<FeedbackId>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            op_type,
            feedback_id,
            payload,
        }
    }
}
