//! Secret resolution boundary
//!
//! The engine never stores secret literals. It resolves a reference only
//! when a child scope inherits it as a literal or when deferred operations
//! are committed.

use crate::error::SecretError;
use async_trait::async_trait;
use std::collections::HashMap;
use traversal_types::{SecretReference, SecretValue};

/// Resolves secret references to literals
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve(&self, reference: &SecretReference) -> Result<SecretValue, SecretError>;
}

/// Resolves `$NAME` from the process environment variable `NAME`
#[derive(Clone, Debug, Default)]
pub struct EnvSecretResolver;

impl EnvSecretResolver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SecretResolver for EnvSecretResolver {
    async fn resolve(&self, reference: &SecretReference) -> Result<SecretValue, SecretError> {
        std::env::var(reference.name())
            .map(SecretValue::new)
            .map_err(|_| SecretError::NotFound {
                name: reference.name().to_string(),
            })
    }
}

/// Fixed in-memory secrets, for embedding and tests
#[derive(Clone, Default)]
pub struct StaticSecretResolver {
    secrets: HashMap<String, SecretValue>,
}

impl StaticSecretResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a literal under a reference name (without the `$`)
    pub fn with_secret(mut self, name: impl Into<String>, literal: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), SecretValue::new(literal));
        self
    }
}

#[async_trait]
impl SecretResolver for StaticSecretResolver {
    async fn resolve(&self, reference: &SecretReference) -> Result<SecretValue, SecretError> {
        self.secrets
            .get(reference.name())
            .cloned()
            .ok_or_else(|| SecretError::NotFound {
                name: reference.name().to_string(),
            })
    }
}
