//! Workflow graphs: the immutable question blueprint
//!
//! A WorkflowGraph is a set of uniquely identified entries plus an ordered
//! root scope. An entry may own a child scope, entered after the entry is
//! answered when its gate predicate holds.
//!
//! Graphs are validated before use and never change afterwards. Sessions
//! share them read-only and pin them by [`WorkflowGraph::version_hash`].

use crate::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

// ── Identifiers ──────────────────────────────────────────────────────

/// Identifier of a workflow graph
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a question entry
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(pub String);

impl EntryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Question Types ───────────────────────────────────────────────────

/// The kind of answer an entry expects
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuestionType {
    String,
    Integer,
    Boolean,
    Choice { options: Vec<String> },
}

impl QuestionType {
    pub fn name(&self) -> &'static str {
        match self {
            QuestionType::String => "string",
            QuestionType::Integer => "integer",
            QuestionType::Boolean => "boolean",
            QuestionType::Choice { .. } => "choice",
        }
    }
}

/// Declarative validation rules attached to an entry
///
/// The descriptor is data only; a validator collaborator interprets it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationDescriptor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl ValidationDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_range(mut self, min: i64, max: i64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn with_length(mut self, min: usize, max: usize) -> Self {
        self.min_length = Some(min);
        self.max_length = Some(max);
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }
}

// ── Child Scopes ─────────────────────────────────────────────────────

/// A nested scope owned by an entry
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildScope {
    /// Ordered entries of the child level
    pub entries: Vec<EntryId>,
    /// Predicate over prior answers; the child is entered only when it
    /// evaluates to `true`. No gate means always entered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate: Option<String>,
    /// Inherited context keys whose secret references must be resolved to
    /// literals for the child level
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inherit_literals: Vec<String>,
}

impl ChildScope {
    pub fn new(entries: Vec<EntryId>) -> Self {
        Self {
            entries,
            gate: None,
            inherit_literals: Vec::new(),
        }
    }

    pub fn with_gate(mut self, gate: impl Into<String>) -> Self {
        self.gate = Some(gate.into());
        self
    }

    pub fn with_inherited_literal(mut self, key: impl Into<String>) -> Self {
        self.inherit_literals.push(key.into());
        self
    }
}

// ── Entries ──────────────────────────────────────────────────────────

/// A single question node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub prompt: String,
    pub question_type: QuestionType,
    /// Expression that may derive the answer without prompting
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automatic_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationDescriptor>,
    #[serde(default)]
    pub sensitive: bool,
    /// Level-context key the answer is stored under (defaults to the id)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child: Option<ChildScope>,
}

impl Entry {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>, question_type: QuestionType) -> Self {
        Self {
            id: EntryId::new(id),
            prompt: prompt.into(),
            question_type,
            automatic_answer: None,
            validation: None,
            sensitive: false,
            context_key: None,
            child: None,
        }
    }

    pub fn string(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(id, prompt, QuestionType::String)
    }

    pub fn integer(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(id, prompt, QuestionType::Integer)
    }

    pub fn boolean(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(id, prompt, QuestionType::Boolean)
    }

    pub fn choice(
        id: impl Into<String>,
        prompt: impl Into<String>,
        options: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self::new(
            id,
            prompt,
            QuestionType::Choice {
                options: options.into_iter().map(Into::into).collect(),
            },
        )
    }

    pub fn with_automatic_answer(mut self, expression: impl Into<String>) -> Self {
        self.automatic_answer = Some(expression.into());
        self
    }

    pub fn with_validation(mut self, validation: ValidationDescriptor) -> Self {
        self.validation = Some(validation);
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn with_context_key(mut self, key: impl Into<String>) -> Self {
        self.context_key = Some(key.into());
        self
    }

    pub fn with_child(mut self, child: ChildScope) -> Self {
        self.child = Some(child);
        self
    }

    /// The level-context key this entry's answer is written to
    pub fn context_key(&self) -> &str {
        self.context_key.as_deref().unwrap_or(self.id.as_str())
    }
}

// ── Workflow Graph ───────────────────────────────────────────────────

/// An immutable question graph
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub id: WorkflowId,
    pub name: String,
    pub version: u32,
    /// Ordered entries of the top-level scope
    pub root: Vec<EntryId>,
    /// Every entry, keyed by id
    pub entries: BTreeMap<EntryId, Entry>,
}

impl WorkflowGraph {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: WorkflowId::new(id),
            name: name.into(),
            version: 1,
            root: Vec::new(),
            entries: BTreeMap::new(),
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Register an entry without placing it in the root scope
    pub fn add_entry(&mut self, entry: Entry) -> ModelResult<()> {
        if self.entries.contains_key(&entry.id) {
            return Err(ModelError::DuplicateEntryId(entry.id));
        }
        self.entries.insert(entry.id.clone(), entry);
        Ok(())
    }

    /// Register an entry and append it to the root scope
    pub fn add_root_entry(&mut self, entry: Entry) -> ModelResult<()> {
        let id = entry.id.clone();
        self.add_entry(entry)?;
        self.root.push(id);
        Ok(())
    }

    pub fn get_entry(&self, id: &EntryId) -> Option<&Entry> {
        self.entries.get(id)
    }

    pub fn entry(&self, id: &EntryId) -> ModelResult<&Entry> {
        self.get_entry(id)
            .ok_or_else(|| ModelError::EntryNotFound(id.clone()))
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Whether the root scope has no entries
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Check scope references and reject scopes that can re-enter themselves
    pub fn validate(&self) -> ModelResult<()> {
        for id in &self.root {
            self.entry(id)?;
        }
        for entry in self.entries.values() {
            if let Some(child) = &entry.child {
                for id in &child.entries {
                    self.entry(id)?;
                }
            }
        }

        for entry in self.entries.values() {
            if entry.child.is_some() {
                let mut visiting = HashSet::new();
                self.check_acyclic(&entry.id, &mut visiting)?;
            }
        }
        Ok(())
    }

    fn check_acyclic<'a>(
        &'a self,
        id: &'a EntryId,
        visiting: &mut HashSet<&'a EntryId>,
    ) -> ModelResult<()> {
        if !visiting.insert(id) {
            return Err(ModelError::RecursiveScope(id.clone()));
        }
        if let Some(child) = self.entry(id)?.child.as_ref() {
            for inner in &child.entries {
                self.check_acyclic(inner, visiting)?;
            }
        }
        visiting.remove(id);
        Ok(())
    }

    /// BLAKE3 digest of the canonical JSON form, hex encoded
    pub fn version_hash(&self) -> ModelResult<String> {
        let canonical =
            serde_json::to_vec(self).map_err(|e| ModelError::Serialization(e.to_string()))?;
        Ok(blake3::hash(&canonical).to_hex().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_graph() -> WorkflowGraph {
        let mut g = WorkflowGraph::new("network", "Network setup");
        g.add_root_entry(
            Entry::boolean("custom_vpc", "Use a custom VPC?").with_child(
                ChildScope::new(vec![EntryId::new("cidr")]).with_gate("custom_vpc"),
            ),
        )
        .unwrap();
        g.add_entry(Entry::string("cidr", "CIDR block")).unwrap();
        g.add_root_entry(Entry::choice("region", "Region", ["eu", "us"]))
            .unwrap();
        g
    }

    #[test]
    fn test_valid_graph() {
        let g = make_graph();
        assert!(g.validate().is_ok());
        assert_eq!(g.entry_count(), 3);
        assert_eq!(g.root.len(), 2);
    }

    #[test]
    fn test_duplicate_entry_rejected() {
        let mut g = make_graph();
        let result = g.add_entry(Entry::string("cidr", "again"));
        assert!(matches!(result, Err(ModelError::DuplicateEntryId(_))));
    }

    #[test]
    fn test_dangling_scope_reference() {
        let mut g = WorkflowGraph::new("w", "W");
        g.add_root_entry(
            Entry::boolean("a", "A").with_child(ChildScope::new(vec![EntryId::new("missing")])),
        )
        .unwrap();
        assert!(matches!(g.validate(), Err(ModelError::EntryNotFound(_))));
    }

    #[test]
    fn test_recursive_scope_rejected() {
        let mut g = WorkflowGraph::new("w", "W");
        g.add_root_entry(
            Entry::boolean("a", "A").with_child(ChildScope::new(vec![EntryId::new("b")])),
        )
        .unwrap();
        g.add_entry(Entry::boolean("b", "B").with_child(ChildScope::new(vec![EntryId::new("a")])))
            .unwrap();
        assert!(matches!(g.validate(), Err(ModelError::RecursiveScope(_))));
    }

    #[test]
    fn test_context_key_defaults_to_id() {
        let e = Entry::string("region", "Region");
        assert_eq!(e.context_key(), "region");
        let e = e.with_context_key("aws.region");
        assert_eq!(e.context_key(), "aws.region");
    }

    #[test]
    fn test_version_hash_tracks_content() {
        let g = make_graph();
        let h1 = g.version_hash().unwrap();
        assert_eq!(h1, make_graph().version_hash().unwrap());
        assert_eq!(h1.len(), 64);

        let mut changed = make_graph();
        changed
            .add_root_entry(Entry::integer("replicas", "Replicas"))
            .unwrap();
        assert_ne!(h1, changed.version_hash().unwrap());
    }

    #[test]
    fn test_graph_serde_roundtrip() {
        let g = make_graph();
        let json = serde_json::to_string(&g).unwrap();
        let back: WorkflowGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(back, g);
    }
}
