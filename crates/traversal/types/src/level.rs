//! Level trackers and the level stack
//!
//! A level is one traversal scope: an ordered list of sibling entries, a
//! cursor into it, and a context map. Entering a child scope suspends the
//! current level on the [`LevelStack`]; exhausting the child pops it again.
//!
//! The stack is a plain ordered collection indexed by position. Levels never
//! point at each other.

use crate::{EntryId, ModelError, ModelResult, SecretValue, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key→value context scoped to one level
pub type LevelContext = BTreeMap<String, Value>;

// ── Level Tracker ────────────────────────────────────────────────────

/// Cursor and context of one scope
///
/// `resolved` caches secret literals that a child level needed; it is never
/// serialized and is ignored by equality.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LevelTracker {
    pub stopped_at_entry_id: Option<EntryId>,
    pub stopped_at_entry_index: usize,
    pub level_entries: Vec<EntryId>,
    #[serde(default)]
    pub context: LevelContext,
    #[serde(skip)]
    resolved: BTreeMap<String, SecretValue>,
}

impl LevelTracker {
    /// Create a tracker positioned at the first entry
    pub fn new(level_entries: Vec<EntryId>, context: LevelContext) -> Self {
        Self {
            stopped_at_entry_id: level_entries.first().cloned(),
            stopped_at_entry_index: 0,
            level_entries,
            context,
            resolved: BTreeMap::new(),
        }
    }

    /// Entry under the cursor, `None` once the level is exhausted
    pub fn current(&self) -> Option<&EntryId> {
        self.stopped_at_entry_id.as_ref()
    }

    pub fn is_exhausted(&self) -> bool {
        self.stopped_at_entry_index >= self.level_entries.len()
    }

    /// Move the cursor to the next sibling
    pub fn advance(&mut self) -> Option<&EntryId> {
        if !self.is_exhausted() {
            self.stopped_at_entry_index += 1;
        }
        self.stopped_at_entry_id = self.level_entries.get(self.stopped_at_entry_index).cloned();
        self.stopped_at_entry_id.as_ref()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    /// Set a context value, dropping any literal cached for the key
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        self.resolved.remove(&key);
        self.context.insert(key, value);
    }

    pub fn resolved_literal(&self, key: &str) -> Option<&SecretValue> {
        self.resolved.get(key)
    }

    pub fn insert_resolved(&mut self, key: impl Into<String>, literal: SecretValue) {
        self.resolved.insert(key.into(), literal);
    }

    /// Check the cursor agrees with the entry list
    pub fn check_consistency(&self) -> ModelResult<()> {
        let expected = self.level_entries.get(self.stopped_at_entry_index);
        if self.stopped_at_entry_index > self.level_entries.len() {
            return Err(ModelError::InconsistentLevel(format!(
                "index {} past {} entries",
                self.stopped_at_entry_index,
                self.level_entries.len()
            )));
        }
        if expected != self.stopped_at_entry_id.as_ref() {
            return Err(ModelError::InconsistentLevel(format!(
                "cursor at index {} does not match stopped entry",
                self.stopped_at_entry_index
            )));
        }
        Ok(())
    }

    /// Merge a finished child's context into this level; the child wins
    fn absorb(&mut self, child: LevelTracker) {
        let LevelTracker {
            context, resolved, ..
        } = child;
        for (key, value) in context {
            self.set(key, value);
        }
        self.resolved.extend(resolved);
    }
}

impl PartialEq for LevelTracker {
    fn eq(&self, other: &Self) -> bool {
        self.stopped_at_entry_id == other.stopped_at_entry_id
            && self.stopped_at_entry_index == other.stopped_at_entry_index
            && self.level_entries == other.level_entries
            && self.context == other.context
    }
}

impl Eq for LevelTracker {}

// ── Level Stack ──────────────────────────────────────────────────────

/// Suspended ancestor levels, innermost last
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LevelStack {
    levels: Vec<LevelTracker>,
}

impl LevelStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_trackers(levels: Vec<LevelTracker>) -> Self {
        Self { levels }
    }

    /// Suspend `current` and replace it with a child level over
    /// `child_entries`, seeded with a copy of the parent context.
    pub fn enter_child(&mut self, current: &mut LevelTracker, child_entries: Vec<EntryId>) {
        let mut child = LevelTracker::new(child_entries, current.context.clone());
        child.resolved = current.resolved.clone();
        let parent = std::mem::replace(current, child);
        self.levels.push(parent);
    }

    /// Pop the parent of `current`, merge the child context into it and
    /// resume after the entry that opened the child.
    pub fn exit_child(&mut self, current: &mut LevelTracker) -> ModelResult<()> {
        let parent = self.levels.pop().ok_or(ModelError::EmptyLevelStack)?;
        let child = std::mem::replace(current, parent);
        current.absorb(child);
        current.advance();
        Ok(())
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&LevelTracker> {
        self.levels.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LevelTracker> {
        self.levels.iter()
    }

    pub fn trackers(&self) -> &[LevelTracker] {
        &self.levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<EntryId> {
        names.iter().map(|n| EntryId::new(*n)).collect()
    }

    #[test]
    fn test_tracker_cursor() {
        let mut t = LevelTracker::new(ids(&["a", "b"]), LevelContext::new());
        assert_eq!(t.current(), Some(&EntryId::new("a")));
        assert_eq!(t.advance(), Some(&EntryId::new("b")));
        assert_eq!(t.advance(), None);
        assert!(t.is_exhausted());
        assert_eq!(t.stopped_at_entry_index, 2);
        // Advancing past the end is a no-op
        assert_eq!(t.advance(), None);
        assert_eq!(t.stopped_at_entry_index, 2);
        assert!(t.check_consistency().is_ok());
    }

    #[test]
    fn test_empty_level_is_exhausted() {
        let t = LevelTracker::new(Vec::new(), LevelContext::new());
        assert!(t.is_exhausted());
        assert_eq!(t.current(), None);
    }

    #[test]
    fn test_enter_and_exit_child() {
        let mut stack = LevelStack::new();
        let mut current = LevelTracker::new(ids(&["vpc", "size"]), LevelContext::new());
        current.set("env", Value::from("prod"));

        stack.enter_child(&mut current, ids(&["region"]));
        assert_eq!(stack.depth(), 1);
        assert_eq!(current.current(), Some(&EntryId::new("region")));
        assert_eq!(current.get("env"), Some(&Value::from("prod")));

        current.set("region", Value::from("eu"));
        current.set("env", Value::from("staging"));
        current.advance();

        stack.exit_child(&mut current).unwrap();
        assert_eq!(stack.depth(), 0);
        assert_eq!(current.current(), Some(&EntryId::new("size")));
        assert_eq!(current.get("region"), Some(&Value::from("eu")));
        // Child wins on collision
        assert_eq!(current.get("env"), Some(&Value::from("staging")));
    }

    #[test]
    fn test_exit_on_empty_stack() {
        let mut stack = LevelStack::new();
        let mut current = LevelTracker::new(ids(&["a"]), LevelContext::new());
        assert_eq!(
            stack.exit_child(&mut current),
            Err(ModelError::EmptyLevelStack)
        );
    }

    #[test]
    fn test_resolved_cache_skipped_by_serde_and_eq() {
        let mut t = LevelTracker::new(ids(&["a"]), LevelContext::new());
        t.insert_resolved("token", SecretValue::new("hunter2"));
        let json = serde_json::to_string(&t).unwrap();
        assert!(!json.contains("hunter2"));

        let back: LevelTracker = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
        assert!(back.resolved_literal("token").is_none());
    }

    #[test]
    fn test_inconsistent_cursor_detected() {
        let mut t = LevelTracker::new(ids(&["a", "b"]), LevelContext::new());
        t.stopped_at_entry_index = 1;
        assert!(t.check_consistency().is_err());
    }
}
