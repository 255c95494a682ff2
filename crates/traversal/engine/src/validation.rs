//! Answer coercion and validation
//!
//! Raw input is first coerced to the entry's question type by [`coerce`],
//! then checked by a [`Validator`]. Either step failing yields a
//! [`FieldError`] and leaves the session untouched.

use crate::error::FieldError;
use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use std::sync::Arc;
use traversal_types::{Entry, QuestionType, SecretReference, Value};

/// Boundary that accepts or rejects a coerced answer
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, entry: &Entry, value: &Value) -> Result<(), FieldError>;
}

/// Convert raw input to the value an entry expects.
///
/// Sensitive entries only accept secret references. A string of the form
/// `$NAME` becomes a reference; any other literal is refused without echoing
/// it back.
pub fn coerce(entry: &Entry, raw: Value) -> Result<Value, FieldError> {
    if entry.sensitive {
        return match raw {
            Value::Secret { .. } => Ok(raw),
            Value::String(s) => SecretReference::parse(s).map(Value::secret).map_err(|_| {
                FieldError::new(
                    entry.id.clone(),
                    "sensitive answers must be secret references such as $NAME",
                )
            }),
            _ => Err(FieldError::new(
                entry.id.clone(),
                "sensitive answers must be secret references such as $NAME",
            )),
        };
    }

    if raw.is_secret() {
        return Err(FieldError::new(
            entry.id.clone(),
            "secret references are only accepted by sensitive entries",
        ));
    }

    match &entry.question_type {
        QuestionType::Integer => match raw {
            Value::Integer(_) => Ok(raw),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| FieldError::new(entry.id.clone(), "expected an integer")),
            _ => Err(FieldError::new(entry.id.clone(), "expected an integer")),
        },
        QuestionType::Boolean => match raw {
            Value::Boolean(_) => Ok(raw),
            Value::String(s) => parse_bool(&s)
                .map(Value::Boolean)
                .ok_or_else(|| FieldError::new(entry.id.clone(), "expected yes or no")),
            _ => Err(FieldError::new(entry.id.clone(), "expected yes or no")),
        },
        QuestionType::String | QuestionType::Choice { .. } => match raw {
            Value::String(_) => Ok(raw),
            other => Ok(Value::String(other.to_string())),
        },
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

// ── Descriptor Validator ─────────────────────────────────────────────

/// Interprets an entry's [`ValidationDescriptor`](traversal_types::ValidationDescriptor)
///
/// Compiled patterns are cached per pattern string.
#[derive(Clone, Default)]
pub struct DescriptorValidator {
    patterns: Arc<DashMap<String, Regex>>,
}

impl DescriptorValidator {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(&self, entry: &Entry, pattern: &str, text: &str) -> Result<bool, FieldError> {
        if let Some(re) = self.patterns.get(pattern) {
            return Ok(re.is_match(text));
        }
        let re = Regex::new(pattern).map_err(|_| {
            FieldError::new(entry.id.clone(), "validation pattern does not compile")
        })?;
        let matched = re.is_match(text);
        self.patterns.insert(pattern.to_string(), re);
        Ok(matched)
    }
}

#[async_trait]
impl Validator for DescriptorValidator {
    async fn validate(&self, entry: &Entry, value: &Value) -> Result<(), FieldError> {
        let id = || entry.id.clone();

        // References are opaque; there is nothing to check until commit
        if value.is_secret() {
            return Ok(());
        }

        match (&entry.question_type, value) {
            (QuestionType::Integer, Value::Integer(_))
            | (QuestionType::Boolean, Value::Boolean(_))
            | (QuestionType::String, Value::String(_)) => {}
            (QuestionType::Choice { options }, Value::String(s)) => {
                if !options.iter().any(|o| o == s) {
                    return Err(FieldError::new(
                        id(),
                        format!("expected one of: {}", options.join(", ")),
                    ));
                }
            }
            (expected, _) => {
                return Err(FieldError::new(
                    id(),
                    format!("expected {} answer, got {}", expected.name(), value.type_name()),
                ))
            }
        }

        let Some(rules) = &entry.validation else {
            return Ok(());
        };

        if let Value::Integer(i) = value {
            if let Some(min) = rules.min {
                if *i < min {
                    return Err(FieldError::new(id(), format!("must be at least {}", min)));
                }
            }
            if let Some(max) = rules.max {
                if *i > max {
                    return Err(FieldError::new(id(), format!("must be at most {}", max)));
                }
            }
        }

        if let Value::String(s) = value {
            let len = s.chars().count();
            if let Some(min) = rules.min_length {
                if len < min {
                    return Err(FieldError::new(
                        id(),
                        format!("must be at least {} characters", min),
                    ));
                }
            }
            if let Some(max) = rules.max_length {
                if len > max {
                    return Err(FieldError::new(
                        id(),
                        format!("must be at most {} characters", max),
                    ));
                }
            }
            if let Some(pattern) = &rules.pattern {
                if !self.matches(entry, pattern, s)? {
                    return Err(FieldError::new(id(), "does not match the required format"));
                }
            }
        }

        Ok(())
    }
}
