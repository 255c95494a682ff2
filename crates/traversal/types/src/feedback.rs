//! Feedback records and the append-only feedback ledger
//!
//! The ledger is a log, not a keyed map. Answering an entry again appends a
//! new feedback with a later id; the "current answer" for an entry is the
//! most recent feedback carrying its id.

use crate::{Entry, EntryId, ModelError, ModelResult, QuestionType, Value, REDACTION_MARKER};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Feedback Identifier ──────────────────────────────────────────────

/// Ledger position of a feedback record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedbackId(pub u64);

impl FeedbackId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for FeedbackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Feedback ─────────────────────────────────────────────────────────

/// Snapshot of the question at answer time plus the committed payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackData {
    pub question_type: QuestionType,
    pub prompt: String,
    pub answer: Value,
}

/// An immutable record of one committed answer
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub feedback_id: FeedbackId,
    /// Caller-supplied commit time
    pub timestamp: DateTime<Utc>,
    pub entry_id: EntryId,
    pub entry_data: FeedbackData,
    pub is_automatic: bool,
    pub is_sensitive: bool,
}

impl Feedback {
    pub fn answer(&self) -> &Value {
        &self.entry_data.answer
    }

    /// The payload as it may be shown, logged or sent to observers
    pub fn rendered_answer(&self) -> String {
        if self.is_sensitive {
            REDACTION_MARKER.to_string()
        } else {
            self.entry_data.answer.to_string()
        }
    }
}

impl std::fmt::Display for Feedback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "#{} {} = {}",
            self.feedback_id,
            self.entry_id,
            self.rendered_answer()
        )?;
        if self.is_automatic {
            f.write_str(" (automatic)")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Feedback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feedback")
            .field("feedback_id", &self.feedback_id)
            .field("timestamp", &self.timestamp)
            .field("entry_id", &self.entry_id)
            .field("question_type", &self.entry_data.question_type)
            .field("answer", &self.rendered_answer())
            .field("is_automatic", &self.is_automatic)
            .field("is_sensitive", &self.is_sensitive)
            .finish()
    }
}

/// A feedback record before the ledger assigns its id
#[derive(Clone)]
pub struct FeedbackDraft {
    pub timestamp: DateTime<Utc>,
    pub entry_id: EntryId,
    pub entry_data: FeedbackData,
    pub is_automatic: bool,
    pub is_sensitive: bool,
}

impl FeedbackDraft {
    pub fn for_entry(entry: &Entry, answer: Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            entry_id: entry.id.clone(),
            entry_data: FeedbackData {
                question_type: entry.question_type.clone(),
                prompt: entry.prompt.clone(),
                answer,
            },
            is_automatic: false,
            is_sensitive: entry.sensitive,
        }
    }

    pub fn automatic(mut self) -> Self {
        self.is_automatic = true;
        self
    }
}

// Drafts are checked for sensitive literals only on append
impl std::fmt::Debug for FeedbackDraft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let answer: &dyn std::fmt::Debug = if self.is_sensitive {
            &REDACTION_MARKER
        } else {
            &self.entry_data.answer
        };
        f.debug_struct("FeedbackDraft")
            .field("timestamp", &self.timestamp)
            .field("entry_id", &self.entry_id)
            .field("question_type", &self.entry_data.question_type)
            .field("answer", answer)
            .field("is_automatic", &self.is_automatic)
            .field("is_sensitive", &self.is_sensitive)
            .finish()
    }
}

// ── Feedback Ledger ──────────────────────────────────────────────────

/// Append-only, id-ordered store of committed feedback
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeedbackLedger {
    entries: Vec<Feedback>,
}

impl FeedbackLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from persisted history.
    ///
    /// Ids must run 0..N-1 in order and sensitive records must hold secret
    /// references.
    pub fn from_history(history: Vec<Feedback>) -> ModelResult<Self> {
        for (expected, feedback) in history.iter().enumerate() {
            let expected = expected as u64;
            if feedback.feedback_id.0 != expected {
                return Err(ModelError::FeedbackIdGap {
                    expected,
                    found: feedback.feedback_id.0,
                });
            }
            Self::check_payload(feedback.feedback_id, feedback.is_sensitive, feedback.answer())?;
        }
        Ok(Self { entries: history })
    }

    fn check_payload(id: FeedbackId, is_sensitive: bool, answer: &Value) -> ModelResult<()> {
        if is_sensitive && !answer.is_secret() {
            return Err(ModelError::SensitivePayload(id));
        }
        Ok(())
    }

    /// Id the next appended feedback will receive
    pub fn next_id(&self) -> FeedbackId {
        self.entries
            .last()
            .map(|f| FeedbackId(f.feedback_id.0 + 1))
            .unwrap_or(FeedbackId(0))
    }

    /// Id of the most recently appended feedback
    pub fn last_id(&self) -> Option<FeedbackId> {
        self.entries.last().map(|f| f.feedback_id)
    }

    /// Append a draft, assigning it the next id
    pub fn append(&mut self, draft: FeedbackDraft) -> ModelResult<FeedbackId> {
        let feedback_id = self.next_id();
        Self::check_payload(feedback_id, draft.is_sensitive, &draft.entry_data.answer)?;
        self.entries.push(Feedback {
            feedback_id,
            timestamp: draft.timestamp,
            entry_id: draft.entry_id,
            entry_data: draft.entry_data,
            is_automatic: draft.is_automatic,
            is_sensitive: draft.is_sensitive,
        });
        Ok(feedback_id)
    }

    /// Most recent feedback for an entry
    pub fn current_answer(&self, entry_id: &EntryId) -> Option<&Feedback> {
        self.entries.iter().rev().find(|f| &f.entry_id == entry_id)
    }

    /// Latest feedback per entry, in entry-id order
    pub fn latest_answers(&self) -> BTreeMap<&EntryId, &Feedback> {
        let mut latest = BTreeMap::new();
        for feedback in &self.entries {
            latest.insert(&feedback.entry_id, feedback);
        }
        latest
    }

    /// Whether a candidate value equals a feedback's payload.
    ///
    /// Only the payload is compared, so a restored flow can tell "accepted
    /// the previous value unchanged" from "entered a new value".
    pub fn equals(feedback: &Feedback, candidate: &Value) -> bool {
        feedback.answer() == candidate
    }

    pub fn get(&self, id: FeedbackId) -> Option<&Feedback> {
        self.entries.get(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feedback> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &[Feedback] {
        &self.entries
    }

    /// Feedback appended after the given ledger length
    pub fn since(&self, len: usize) -> &[Feedback] {
        &self.entries[len.min(self.entries.len())..]
    }
}
