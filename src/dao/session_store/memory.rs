use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;

use super::SessionStore;
use crate::{
    channel::RemoteSnapshot,
    dao::storage::{StorageError, StorageResult},
    model::QuizState,
    session::SessionId,
};

/// Process-local store used when no database is configured. Contents die with the relay.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<DashMap<SessionId, RemoteSnapshot>>,
}

impl MemorySessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, id: &SessionId) -> BoxFuture<'static, StorageResult<Option<RemoteSnapshot>>> {
        let found = self
            .sessions
            .get(id)
            .filter(|entry| entry.state.is_some())
            .map(|entry| entry.value().clone());
        Box::pin(async move { Ok(found) })
    }

    fn save(
        &self,
        id: &SessionId,
        state: QuizState,
        expected_revision: Option<u64>,
    ) -> BoxFuture<'static, StorageResult<RemoteSnapshot>> {
        // The entry guard serializes concurrent writers of the same session.
        let mut stored = self.sessions.entry(id.clone()).or_default();
        let outcome = if expected_revision.is_some_and(|expected| expected != stored.revision) {
            Err(StorageError::conflict(stored.value().clone()))
        } else {
            stored.revision += 1;
            stored.state = Some(state);
            Ok(stored.value().clone())
        };
        drop(stored);
        Box::pin(async move { outcome })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
