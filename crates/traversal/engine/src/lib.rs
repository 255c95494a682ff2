//! Question traversal engine
//!
//! Drives a user through a [`WorkflowGraph`](traversal_types::WorkflowGraph)
//! one question at a time and keeps everything needed to pause, persist and
//! resume the walk.
//!
//! # Key Concepts
//!
//! - **Traverser**: the aggregate root. `start`, `answer`, `restore`,
//!   `serialize`, `commit_operations`.
//! - **Session**: ledger, level stack, current level, pending deferred
//!   operations and proposals for one traversal.
//! - **Boundaries**: [`AutomaticAnswerEvaluator`], [`Validator`],
//!   [`SecretResolver`], [`OperationHandler`], [`SessionStore`] and
//!   [`Observer`] are traits the host may replace.
//!
//! # Example
//!
//! ```ignore
//! let mut traverser = Traverser::new(Arc::new(graph))?;
//! traverser.start(Utc::now()).await?;
//! while let Some(question) = traverser.current_question() {
//!     let reply = prompt(&question.prompt);
//!     traverser.answer(reply, Utc::now()).await?;
//! }
//! traverser.commit_operations().await?;
//! ```

#![deny(unsafe_code)]

pub mod codec;
pub mod config;
pub mod deferred;
pub mod error;
pub mod evaluator;
pub mod observer;
pub mod secrets;
pub mod session;
pub mod store;
pub mod telemetry;
pub mod traverser;
pub mod validation;

pub use codec::SessionDocument;
pub use config::{EngineConfig, LoggingConfig, TraversalConfig};
pub use deferred::{
    CommitReport, DeferredOperationsRegistry, ExecutionContext, OperationCatalog,
    OperationHandler, ResolvedValue,
};
pub use error::{
    DeferredError, FieldError, OperationError, RestoreError, RollbackFailure, SecretError,
    TraversalError, TraversalResult,
};
pub use evaluator::{AutomaticAnswerEvaluator, Expr, ExprError, ExpressionEvaluator};
pub use observer::{EventRecorder, Observer, ObserverId, ObserverRegistry, TraversalEvent};
pub use secrets::{EnvSecretResolver, SecretResolver, StaticSecretResolver};
pub use session::{Session, SessionId, SessionState};
pub use store::{InMemorySessionStore, SessionStore};
pub use telemetry::init_tracing;
pub use traverser::{AnswerOutcome, Traverser};
pub use validation::{coerce, DescriptorValidator, Validator};

pub use traversal_types;
