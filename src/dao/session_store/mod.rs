/// CouchDB backend.
#[cfg(feature = "couch-store")]
pub mod couchdb;
/// Process-local backend.
pub mod memory;

use futures::future::BoxFuture;

use crate::{
    channel::RemoteSnapshot, dao::storage::StorageResult, model::QuizState, session::SessionId,
};

pub use self::memory::MemorySessionStore;

/// Persistence layer holding the authoritative snapshot of every session.
pub trait SessionStore: Send + Sync {
    /// Latest stored snapshot, `None` when the session was never written.
    fn load(&self, id: &SessionId) -> BoxFuture<'static, StorageResult<Option<RemoteSnapshot>>>;

    /// Replace the stored document and bump its revision.
    ///
    /// With `expected_revision`, the write only succeeds while the stored revision still
    /// matches (`0` meaning "does not exist yet"); otherwise it fails with
    /// [`StorageError::Conflict`](crate::dao::storage::StorageError::Conflict).
    fn save(
        &self,
        id: &SessionId,
        state: QuizState,
        expected_revision: Option<u64>,
    ) -> BoxFuture<'static, StorageResult<RemoteSnapshot>>;

    /// Cheap round-trip proving the backend answers.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the backend after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
