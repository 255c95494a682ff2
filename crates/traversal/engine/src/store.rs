//! Session persistence boundary
//!
//! Hosts implement [`SessionStore`] over their storage medium. The in-memory
//! implementation keeps the JSON form of each document, so a load exercises
//! the same decoding path a real backend would.

use crate::codec::SessionDocument;
use crate::error::{TraversalError, TraversalResult};
use crate::session::SessionId;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// Storage for session documents
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, session_id: &SessionId, document: &SessionDocument)
        -> TraversalResult<()>;

    async fn load(&self, session_id: &SessionId) -> TraversalResult<Option<SessionDocument>>;

    /// Returns whether a document was removed
    async fn delete(&self, session_id: &SessionId) -> TraversalResult<bool>;
}

/// In-memory session store for development and testing
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    documents: Arc<DashMap<SessionId, String>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.documents.iter().map(|e| e.key().clone()).collect()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save(
        &self,
        session_id: &SessionId,
        document: &SessionDocument,
    ) -> TraversalResult<()> {
        let json = document
            .to_json()
            .map_err(|e| TraversalError::Store(format!("encode failed: {:?}", e.classify())))?;
        self.documents.insert(session_id.clone(), json);
        tracing::debug!(session = session_id.short(), "Session document saved");
        Ok(())
    }

    async fn load(&self, session_id: &SessionId) -> TraversalResult<Option<SessionDocument>> {
        let Some(json) = self.documents.get(session_id).map(|j| j.clone()) else {
            return Ok(None);
        };
        SessionDocument::from_json(&json)
            .map(Some)
            .map_err(TraversalError::from)
    }

    async fn delete(&self, session_id: &SessionId) -> TraversalResult<bool> {
        Ok(self.documents.remove(session_id).is_some())
    }
}
