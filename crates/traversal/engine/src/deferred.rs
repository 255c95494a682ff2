//! Deferred operations: registration during traversal, execution at commit
//!
//! Operations are recorded as metadata while questions are answered and run
//! only when the traversal has completed and the caller commits. The batch
//! runs in registration order and stops at the first failure. Operations
//! that already completed are then rolled back in reverse order; the failed
//! operation itself is not rolled back.

use crate::error::{DeferredError, OperationError, RollbackFailure};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use traversal_types::{DeferredOperation, FeedbackLedger, OperationType, SecretValue, Value};

/// Executable behaviour for one operation type
#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn execute(
        &self,
        operation: &DeferredOperation,
        context: &ExecutionContext,
    ) -> Result<(), OperationError>;

    /// Undo a completed `execute`
    async fn rollback(
        &self,
        operation: &DeferredOperation,
        context: &ExecutionContext,
    ) -> Result<(), OperationError>;
}

// ── Operation Catalog ────────────────────────────────────────────────

/// Handlers keyed by operation type
#[derive(Clone, Default)]
pub struct OperationCatalog {
    handlers: HashMap<OperationType, Arc<dyn OperationHandler>>,
}

impl OperationCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(
        mut self,
        op_type: impl Into<String>,
        handler: Arc<dyn OperationHandler>,
    ) -> Self {
        self.register(OperationType::new(op_type), handler);
        self
    }

    pub fn register(&mut self, op_type: OperationType, handler: Arc<dyn OperationHandler>) {
        self.handlers.insert(op_type, handler);
    }

    pub fn get(&self, op_type: &OperationType) -> Option<&Arc<dyn OperationHandler>> {
        self.handlers.get(op_type)
    }

    pub fn contains(&self, op_type: &OperationType) -> bool {
        self.handlers.contains_key(op_type)
    }
}

// ── Execution Context ────────────────────────────────────────────────

/// A context value as handed to handlers
#[derive(Clone, Debug)]
pub enum ResolvedValue {
    Plain(Value),
    Secret(SecretValue),
}

/// Snapshot handed to every handler in a batch
///
/// Secret references are already resolved. The context is dropped when the
/// batch finishes, wiping the literals.
#[derive(Clone, Debug, Default)]
pub struct ExecutionContext {
    pub ledger: FeedbackLedger,
    values: BTreeMap<String, ResolvedValue>,
}

impl ExecutionContext {
    pub fn new(ledger: FeedbackLedger) -> Self {
        Self {
            ledger,
            values: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: ResolvedValue) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&ResolvedValue> {
        self.values.get(key)
    }

    /// The value as text, exposing resolved secrets
    pub fn literal(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            ResolvedValue::Plain(Value::Secret { .. }) => None,
            ResolvedValue::Plain(v) => Some(v.to_string()),
            ResolvedValue::Secret(s) => Some(s.expose().to_string()),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }
}

// ── Registry ─────────────────────────────────────────────────────────

/// Outcome of a successful batch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitReport {
    pub executed: usize,
}

/// Ordered operations awaiting commit
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeferredOperationsRegistry {
    operations: Vec<DeferredOperation>,
}

impl DeferredOperationsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_operations(operations: Vec<DeferredOperation>) -> Self {
        Self { operations }
    }

    pub fn register(&mut self, operation: DeferredOperation) {
        self.operations.push(operation);
    }

    pub fn operations(&self) -> &[DeferredOperation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Drop every pending operation; returns how many were dropped
    pub fn clear(&mut self) -> usize {
        let n = self.operations.len();
        self.operations.clear();
        n
    }

    /// Run the batch in order, rolling back on the first failure
    pub async fn execute_all(
        &self,
        catalog: &OperationCatalog,
        context: &ExecutionContext,
    ) -> Result<CommitReport, DeferredError> {
        // Resolve every handler before running anything
        let mut handlers = Vec::with_capacity(self.operations.len());
        for op in &self.operations {
            let handler = catalog
                .get(&op.op_type)
                .ok_or_else(|| DeferredError::UnknownOperation(op.op_type.clone()))?;
            handlers.push(handler.clone());
        }

        for (position, (op, handler)) in self.operations.iter().zip(&handlers).enumerate() {
            tracing::debug!(position, op_type = %op.op_type, "Executing deferred operation");
            if let Err(err) = handler.execute(op, context).await {
                tracing::warn!(
                    position,
                    op_type = %op.op_type,
                    "Deferred operation failed, rolling back {} completed",
                    position
                );
                let (rolled_back, rollback_failures) =
                    self.rollback_completed(position, &handlers, context).await;
                return Err(DeferredError::OperationFailed {
                    op_type: op.op_type.clone(),
                    position,
                    reason: err.to_string(),
                    rolled_back,
                    rollback_failures,
                });
            }
        }

        Ok(CommitReport {
            executed: self.operations.len(),
        })
    }

    /// Roll back positions `0..failed` in reverse, continuing past failures
    async fn rollback_completed(
        &self,
        failed: usize,
        handlers: &[Arc<dyn OperationHandler>],
        context: &ExecutionContext,
    ) -> (Vec<usize>, Vec<RollbackFailure>) {
        let mut rolled_back = Vec::new();
        let mut failures = Vec::new();
        for position in (0..failed).rev() {
            let op = &self.operations[position];
            match handlers[position].rollback(op, context).await {
                Ok(()) => rolled_back.push(position),
                Err(err) => {
                    tracing::error!(position, op_type = %op.op_type, "Rollback failed");
                    failures.push(RollbackFailure {
                        position,
                        op_type: op.op_type.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }
        (rolled_back, failures)
    }
}
