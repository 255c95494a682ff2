//! Traversal Domain Types
//!
//! Provisioning configuration is collected by walking a **workflow graph**
//! of conditional questions. This crate holds the pure data model of that
//! walk; the engine that drives it lives in `traversal-engine`.
//!
//! # Key Concepts
//!
//! - **WorkflowGraph**: An immutable, shared set of question entries with an
//!   ordered root scope. Entries may gate a child scope behind a predicate.
//! - **Feedback**: An immutable record of one committed answer.
//! - **FeedbackLedger**: The append-only, id-ordered log of feedback. The
//!   current answer for an entry is its most recent feedback.
//! - **LevelTracker**: The cursor and context of one scope.
//! - **LevelStack**: Suspended parent scopes, one per nesting level.
//! - **DeferredOperation**: Side-effecting work recorded during traversal
//!   and executed only after the whole flow completes.
//!
//! # Design Principles
//!
//! 1. Committed feedback is never mutated. Revisits append.
//! 2. Sensitive answers are stored as secret references, never literals.
//! 3. Scope nesting is a plain stack indexed by position, with no back
//!    pointers between levels.

#![deny(unsafe_code)]

mod errors;
mod feedback;
mod graph;
mod level;
mod operation;
mod value;

pub use errors::*;
pub use feedback::*;
pub use graph::*;
pub use level::*;
pub use operation::*;
pub use value::*;
