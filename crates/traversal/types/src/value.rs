//! Answer values and secret references
//!
//! A sensitive answer is never held as its literal. The ledger stores a
//! [`SecretReference`] in its place, and a resolved literal only ever lives
//! in a [`SecretValue`], which refuses to render itself and is wiped on drop.

use crate::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Fixed marker rendered in place of any sensitive payload
pub const REDACTION_MARKER: &str = "********";

/// Prefix that distinguishes a secret reference from a literal
pub const SECRET_REFERENCE_PREFIX: char = '$';

// ── Secret Reference ─────────────────────────────────────────────────

/// Symbolic pointer to a sensitive value, e.g. `$API_TOKEN`
///
/// `Display` and `Debug` both print [`REDACTION_MARKER`]; use
/// [`SecretReference::as_str`] when the reference itself is needed.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecretReference(String);

impl SecretReference {
    pub fn parse(raw: impl Into<String>) -> ModelResult<Self> {
        let raw = raw.into();
        let name = raw
            .strip_prefix(SECRET_REFERENCE_PREFIX)
            .ok_or(ModelError::InvalidSecretReference)?;
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(ModelError::InvalidSecretReference);
        }
        Ok(Self(raw))
    }

    /// Whether a raw string has the shape of a secret reference
    pub fn is_reference(raw: &str) -> bool {
        Self::parse(raw).is_ok()
    }

    /// The full reference, prefix included
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The reference name without its prefix
    pub fn name(&self) -> &str {
        &self.0[SECRET_REFERENCE_PREFIX.len_utf8()..]
    }
}

impl TryFrom<String> for SecretReference {
    type Error = ModelError;

    fn try_from(raw: String) -> ModelResult<Self> {
        Self::parse(raw)
    }
}

impl From<SecretReference> for String {
    fn from(reference: SecretReference) -> Self {
        reference.0
    }
}

impl std::fmt::Display for SecretReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(REDACTION_MARKER)
    }
}

impl std::fmt::Debug for SecretReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretReference({})", REDACTION_MARKER)
    }
}

// ── Secret Value ─────────────────────────────────────────────────────

/// A resolved secret literal, kept in memory only
///
/// Not serializable. The buffer is zeroed when the value is dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(literal: impl Into<String>) -> Self {
        Self(literal.into())
    }

    /// Borrow the literal. Callers must not log or persist it.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretValue({})", REDACTION_MARKER)
    }
}

impl std::fmt::Display for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(REDACTION_MARKER)
    }
}

// ── Value ────────────────────────────────────────────────────────────

/// An answer payload or context value
///
/// Literals serialize untagged. A secret reference serializes as
/// `{"secret_ref": "$NAME"}` so that a plain string answer beginning with
/// `$` never turns into a reference on restore.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    String(String),
    Secret { secret_ref: SecretReference },
}

impl Value {
    pub fn string(value: impl Into<String>) -> Self {
        Value::String(value.into())
    }

    pub fn secret(reference: SecretReference) -> Self {
        Value::Secret {
            secret_ref: reference,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::String(_) => "string",
            Value::Secret { .. } => "secret",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_secret(&self) -> Option<&SecretReference> {
        match self {
            Value::Secret { secret_ref } => Some(secret_ref),
            _ => None,
        }
    }

    pub fn is_secret(&self) -> bool {
        matches!(self, Value::Secret { .. })
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::String(s) => f.write_str(s),
            Value::Secret { .. } => f.write_str(REDACTION_MARKER),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}
