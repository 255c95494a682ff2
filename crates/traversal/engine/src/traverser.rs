//! The Traverser: aggregate root of one question traversal
//!
//! A traverser walks a shared [`WorkflowGraph`] one question at a time,
//! appending every committed answer to the session's ledger, entering and
//! leaving child scopes, and skipping entries whose automatic answer
//! resolves.
//!
//! ## Atomicity
//!
//! Every state-changing call works on a clone of the session and swaps it in
//! with a single assignment after its last collaborator await. Dropping the
//! future early leaves the previous state untouched, and an error leaves it
//! untouched too. Observers are notified only after the swap.

use crate::codec::{self, SessionDocument};
use crate::config::TraversalConfig;
use crate::deferred::{CommitReport, ExecutionContext, OperationCatalog, ResolvedValue};
use crate::error::{DeferredError, TraversalError, TraversalResult};
use crate::evaluator::{AutomaticAnswerEvaluator, ExpressionEvaluator};
use crate::observer::{Observer, ObserverId, ObserverRegistry, TraversalEvent};
use crate::secrets::{EnvSecretResolver, SecretResolver};
use crate::session::{Session, SessionId, SessionState};
use crate::validation::{coerce, DescriptorValidator, Validator};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, trace, warn};
use traversal_types::{
    DeferredOperation, Entry, EntryId, Feedback, FeedbackDraft, FeedbackId, FeedbackLedger,
    LevelStack, LevelTracker, ModelError, OperationType, Value, WorkflowGraph,
};

/// Result of a successful answer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnswerOutcome {
    /// Feedback appended by the call: the answer, then any automatic ones
    pub feedback_ids: Vec<FeedbackId>,
    pub next_question: Option<EntryId>,
    pub completed: bool,
    /// Whether the answer equals the proposal offered for the question;
    /// `None` when there was no proposal
    pub matched_proposal: Option<bool>,
}

/// Session-scoped traversal state machine
pub struct Traverser {
    graph: Arc<WorkflowGraph>,
    version_hash: String,
    session: Session,
    evaluator: Arc<dyn AutomaticAnswerEvaluator>,
    validator: Arc<dyn Validator>,
    secrets: Arc<dyn SecretResolver>,
    catalog: OperationCatalog,
    observers: ObserverRegistry,
    config: TraversalConfig,
}

impl Traverser {
    /// Create a traverser over a validated graph with the default
    /// collaborators
    pub fn new(graph: Arc<WorkflowGraph>) -> TraversalResult<Self> {
        graph.validate()?;
        let version_hash = graph.version_hash()?;
        let session = Session::new(&graph, version_hash.clone());
        Ok(Self {
            graph,
            version_hash,
            session,
            evaluator: Arc::new(ExpressionEvaluator::new()),
            validator: Arc::new(DescriptorValidator::new()),
            secrets: Arc::new(EnvSecretResolver::new()),
            catalog: OperationCatalog::new(),
            observers: ObserverRegistry::new(),
            config: TraversalConfig::default(),
        })
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn AutomaticAnswerEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_secret_resolver(mut self, secrets: Arc<dyn SecretResolver>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn with_catalog(mut self, catalog: OperationCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_config(mut self, config: TraversalConfig) -> Self {
        self.config = config;
        self
    }

    pub fn subscribe(&mut self, observer: Arc<dyn Observer>) -> ObserverId {
        self.observers.register(observer)
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        self.observers.deregister(id)
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn graph(&self) -> &Arc<WorkflowGraph> {
        &self.graph
    }

    pub fn version_hash(&self) -> &str {
        &self.version_hash
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session.session_id
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    pub fn is_completed(&self) -> bool {
        self.session.state == SessionState::Completed
    }

    /// The question awaiting input, if any
    pub fn current_question(&self) -> Option<&Entry> {
        if self.session.state != SessionState::AwaitingAnswer {
            return None;
        }
        self.session
            .current
            .current()
            .and_then(|id| self.graph.get_entry(id))
    }

    /// Previous answer offered for the current question
    pub fn current_proposal(&self) -> Option<&Feedback> {
        let entry = self.current_question()?;
        self.session.proposals.get(&entry.id)
    }

    pub fn ledger(&self) -> &FeedbackLedger {
        &self.session.ledger
    }

    pub fn current_level(&self) -> &LevelTracker {
        &self.session.current
    }

    pub fn level_stack(&self) -> &LevelStack {
        &self.session.stack
    }

    pub fn pending_operations(&self) -> &[DeferredOperation] {
        self.session.operations.operations()
    }

    pub fn operations_committed(&self) -> bool {
        self.session.operations_committed
    }

    // ── Traversal ────────────────────────────────────────────────────

    /// Position at the first root entry and skip what resolves
    /// automatically
    #[instrument(skip_all, fields(session_id = %self.session.session_id))]
    pub async fn start(&mut self, timestamp: DateTime<Utc>) -> TraversalResult<()> {
        match self.session.state {
            SessionState::NotStarted => {}
            SessionState::AwaitingAnswer => return Err(TraversalError::AlreadyStarted),
            SessionState::Completed => return Err(TraversalError::AlreadyCompleted),
        }

        let mut staged = self.session.clone();
        staged.seed(&self.graph);
        self.settle(&mut staged, timestamp).await?;

        self.session = staged;
        info!(
            workflow = %self.graph.id,
            automatic = self.session.ledger.len(),
            "Traversal started"
        );
        self.emit_progress(0);
        Ok(())
    }

    /// Commit an answer to the current question and advance
    #[instrument(skip_all, fields(session_id = %self.session.session_id))]
    pub async fn answer(
        &mut self,
        raw: impl Into<Value>,
        timestamp: DateTime<Utc>,
    ) -> TraversalResult<AnswerOutcome> {
        match self.session.state {
            SessionState::NotStarted => return Err(TraversalError::NotStarted),
            SessionState::Completed => return Err(TraversalError::AlreadyCompleted),
            SessionState::AwaitingAnswer => {}
        }

        let graph = Arc::clone(&self.graph);
        let entry = self.cursor_entry(&graph, &self.session)?;

        let value = coerce(entry, raw.into())?;
        self.validator.validate(entry, &value).await?;

        let matched_proposal = self
            .session
            .proposals
            .get(&entry.id)
            .map(|p| FeedbackLedger::equals(p, &value));

        let mut staged = self.session.clone();
        let mark = staged.ledger.len();
        self.commit_feedback(&mut staged, entry, value, timestamp, false)?;
        self.step_past(&mut staged, entry).await?;
        self.settle(&mut staged, timestamp).await?;

        self.session = staged;

        let feedback_ids = self
            .session
            .ledger
            .since(mark)
            .iter()
            .map(|f| f.feedback_id)
            .collect();
        let completed = self.is_completed();
        if completed {
            info!(feedback = self.session.ledger.len(), "Traversal completed");
        }
        self.emit_progress(mark);

        Ok(AnswerOutcome {
            feedback_ids,
            next_question: self.current_question().map(|e| e.id.clone()),
            completed,
            matched_proposal,
        })
    }

    /// Answer the current question with its proposal unchanged
    pub async fn accept_proposal(
        &mut self,
        timestamp: DateTime<Utc>,
    ) -> TraversalResult<AnswerOutcome> {
        let value = self
            .current_proposal()
            .map(|p| p.answer().clone())
            .ok_or(TraversalError::NoProposal)?;
        self.answer(value, timestamp).await
    }

    /// Record a deferred operation, tagged with the last committed feedback
    pub fn register_operation(
        &mut self,
        op_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> TraversalResult<()> {
        if self.session.state == SessionState::NotStarted {
            return Err(TraversalError::NotStarted);
        }
        if self.session.operations_committed {
            return Err(TraversalError::AlreadyCommitted);
        }
        let op_type = OperationType::new(op_type);
        if !self.catalog.contains(&op_type) {
            return Err(DeferredError::UnknownOperation(op_type).into());
        }

        let feedback_id = self.session.ledger.last_id();
        debug!(
            session_id = %self.session.session_id,
            op_type = %op_type,
            position = self.session.operations.len(),
            "Deferred operation registered"
        );
        self.session
            .operations
            .register(DeferredOperation::new(op_type, feedback_id, payload));
        Ok(())
    }

    /// Run the deferred operations of a completed traversal
    ///
    /// Secret references in the merged context are resolved first; a
    /// resolution failure runs nothing. On an operation failure the
    /// completed operations are rolled back and the registry is kept.
    #[instrument(skip_all, fields(session_id = %self.session.session_id))]
    pub async fn commit_operations(&mut self) -> TraversalResult<CommitReport> {
        if self.session.state != SessionState::Completed {
            return Err(TraversalError::NotCompleted);
        }
        if self.session.operations_committed {
            return Err(TraversalError::AlreadyCommitted);
        }

        let context = self.execution_context().await?;
        let result = self
            .session
            .operations
            .execute_all(&self.catalog, &context)
            .await;
        match result {
            Ok(report) => {
                self.session.operations.clear();
                self.session.operations_committed = true;
                info!(executed = report.executed, "Deferred operations committed");
                self.observers.notify(&TraversalEvent::OperationsCommitted {
                    session_id: self.session.session_id.clone(),
                    executed: report.executed,
                });
                Ok(report)
            }
            Err(err) => {
                if let DeferredError::OperationFailed {
                    op_type,
                    position,
                    rolled_back,
                    ..
                } = &err
                {
                    warn!(
                        op_type = %op_type,
                        position,
                        rolled_back = rolled_back.len(),
                        "Deferred operations rolled back"
                    );
                    self.observers.notify(&TraversalEvent::OperationsRolledBack {
                        session_id: self.session.session_id.clone(),
                        failed_type: op_type.clone(),
                        position: *position,
                        rolled_back: rolled_back.clone(),
                    });
                }
                Err(err.into())
            }
        }
    }

    /// Discard the session without running its deferred operations
    pub fn cancel(&mut self) {
        let dropped = self.session.operations.clear();
        let previous = std::mem::replace(
            &mut self.session,
            Session::new(&self.graph, self.version_hash.clone()),
        );
        info!(
            session_id = %previous.session_id,
            new_session_id = %self.session.session_id,
            dropped_operations = dropped,
            "Traversal cancelled"
        );
    }

    /// Start over in a new session, offering the latest answers as
    /// proposals
    #[instrument(skip_all, fields(session_id = %self.session.session_id))]
    pub async fn restart(&mut self, timestamp: DateTime<Utc>) -> TraversalResult<()> {
        let proposals: BTreeMap<EntryId, Feedback> = self
            .session
            .ledger
            .latest_answers()
            .into_iter()
            .map(|(id, f)| (id.clone(), f.clone()))
            .collect();

        let mut staged = Session::new(&self.graph, self.version_hash.clone());
        staged.proposals = proposals;
        staged.seed(&self.graph);
        self.settle(&mut staged, timestamp).await?;

        let previous = std::mem::replace(&mut self.session, staged);
        info!(
            new_session_id = %self.session.session_id,
            proposals = self.session.proposals.len(),
            dropped_operations = previous.operations.len(),
            "Traversal restarted"
        );
        self.emit_progress(0);
        Ok(())
    }

    // ── Persistence ──────────────────────────────────────────────────

    pub fn serialize(&self) -> SessionDocument {
        codec::serialize(&self.session)
    }

    /// Replace a not-yet-started session with a persisted one
    #[instrument(skip_all, fields(session_id = %document.session_id))]
    pub fn restore(&mut self, document: SessionDocument) -> TraversalResult<()> {
        if self.session.state != SessionState::NotStarted {
            return Err(TraversalError::AlreadyStarted);
        }
        let session = codec::restore(document, &self.graph, &self.version_hash, &self.catalog)?;
        self.session = session;

        let feedback_count = self.session.ledger.len();
        info!(
            feedback = feedback_count,
            depth = self.session.stack.depth(),
            "Session restored"
        );
        self.observers.notify(&TraversalEvent::SessionRestored {
            session_id: self.session.session_id.clone(),
            feedback_count,
        });
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────────

    fn cursor_entry<'g>(
        &self,
        graph: &'g WorkflowGraph,
        session: &Session,
    ) -> TraversalResult<&'g Entry> {
        let id = session
            .current
            .current()
            .ok_or_else(|| ModelError::InconsistentLevel("cursor past the last entry".into()))?;
        Ok(graph.entry(id)?)
    }

    /// Append a feedback and write it into the level context
    fn commit_feedback(
        &self,
        staged: &mut Session,
        entry: &Entry,
        value: Value,
        timestamp: DateTime<Utc>,
        automatic: bool,
    ) -> TraversalResult<FeedbackId> {
        let mut draft = FeedbackDraft::for_entry(entry, value.clone(), timestamp);
        if automatic {
            draft = draft.automatic();
        }
        let feedback_id = staged.ledger.append(draft)?;
        staged.current.set(entry.context_key(), value);
        staged.proposals.remove(&entry.id);
        trace!(feedback_id = %feedback_id, entry = %entry.id, automatic, "Feedback appended");
        Ok(feedback_id)
    }

    /// Move past an answered entry: into its child scope when the gate
    /// holds, otherwise to the next sibling
    async fn step_past(&self, staged: &mut Session, entry: &Entry) -> TraversalResult<()> {
        if let Some(scope) = &entry.child {
            let open = match &scope.gate {
                None => true,
                Some(gate) => {
                    self.evaluator
                        .evaluate(gate, &staged.ledger, &staged.current.context)
                        .await
                        == Some(Value::Boolean(true))
                }
            };
            if open {
                if staged.stack.depth() + 1 > self.config.max_depth {
                    return Err(TraversalError::DepthLimit(self.config.max_depth));
                }
                staged
                    .stack
                    .enter_child(&mut staged.current, scope.entries.clone());
                for key in &scope.inherit_literals {
                    self.resolve_inherited(staged, key).await?;
                }
                debug!(entry = %entry.id, depth = staged.stack.depth(), "Entered child scope");
                return Ok(());
            }
            debug!(entry = %entry.id, "Child scope gate closed");
        }
        staged.current.advance();
        Ok(())
    }

    async fn resolve_inherited(&self, staged: &mut Session, key: &str) -> TraversalResult<()> {
        let Some(Value::Secret { secret_ref }) = staged.current.get(key).cloned() else {
            return Ok(());
        };
        if staged.current.resolved_literal(key).is_none() {
            let literal = self.secrets.resolve(&secret_ref).await?;
            staged.current.insert_resolved(key, literal);
        }
        Ok(())
    }

    /// Pop exhausted levels and auto-answer entries until a manual
    /// question or completion
    async fn settle(&self, staged: &mut Session, timestamp: DateTime<Utc>) -> TraversalResult<()> {
        loop {
            if staged.current.is_exhausted() {
                if staged.stack.is_empty() {
                    staged.state = SessionState::Completed;
                    return Ok(());
                }
                staged.stack.exit_child(&mut staged.current)?;
                debug!(depth = staged.stack.depth(), "Exited child scope");
                continue;
            }

            let graph = Arc::clone(&self.graph);
            let entry = self.cursor_entry(&graph, staged)?;
            let Some(value) = self.automatic_answer(staged, entry).await else {
                break;
            };

            self.commit_feedback(staged, entry, value, timestamp, true)?;
            self.step_past(staged, entry).await?;
        }

        staged.state = SessionState::AwaitingAnswer;
        Ok(())
    }

    /// Evaluate, coerce and validate an entry's automatic answer. Any
    /// miss means the entry is presented manually.
    async fn automatic_answer(&self, staged: &Session, entry: &Entry) -> Option<Value> {
        let expression = entry.automatic_answer.as_ref()?;
        let raw = self
            .evaluator
            .evaluate(expression, &staged.ledger, &staged.current.context)
            .await?;
        let value = match coerce(entry, raw) {
            Ok(value) => value,
            Err(_) => {
                debug!(entry = %entry.id, "Automatic answer has the wrong type; prompting");
                return None;
            }
        };
        if self.validator.validate(entry, &value).await.is_err() {
            debug!(entry = %entry.id, "Automatic answer failed validation; prompting");
            return None;
        }
        Some(value)
    }

    /// Snapshot of the ledger and merged context with secrets resolved
    async fn execution_context(&self) -> TraversalResult<ExecutionContext> {
        let mut context = ExecutionContext::new(self.session.ledger.clone());
        for (key, value) in &self.session.current.context {
            let resolved = match value {
                Value::Secret { secret_ref } => match self.session.current.resolved_literal(key) {
                    Some(literal) => ResolvedValue::Secret(literal.clone()),
                    None => ResolvedValue::Secret(self.secrets.resolve(secret_ref).await?),
                },
                plain => ResolvedValue::Plain(plain.clone()),
            };
            context.insert(key.clone(), resolved);
        }
        Ok(context)
    }

    /// Notify feedback appended after `mark`, then where the cursor stands
    fn emit_progress(&self, mark: usize) {
        let session_id = &self.session.session_id;
        let mut events: Vec<TraversalEvent> = self
            .session
            .ledger
            .since(mark)
            .iter()
            .map(|f| TraversalEvent::FeedbackEntered {
                session_id: session_id.clone(),
                feedback_id: f.feedback_id,
                entry_id: f.entry_id.clone(),
                rendered_answer: f.rendered_answer(),
                is_automatic: f.is_automatic,
            })
            .collect();

        match self.current_question() {
            Some(entry) => events.push(TraversalEvent::NextQuestionReady {
                session_id: session_id.clone(),
                entry_id: entry.id.clone(),
                prompt: entry.prompt.clone(),
                depth: self.session.stack.depth(),
            }),
            None => events.push(TraversalEvent::Completed {
                session_id: session_id.clone(),
                feedback_count: self.session.ledger.len(),
            }),
        }
        self.observers.notify_all(&events);
    }
}
