use std::error::Error;
use thiserror::Error;

use crate::channel::RemoteSnapshot;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached or answered unexpectedly.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// What was being attempted.
        message: String,
        /// Backend failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A guarded write was based on a revision that is no longer current.
    #[error("stale revision (stored revision is {})", current.revision)]
    Conflict {
        /// Snapshot currently stored.
        current: Box<RemoteSnapshot>,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a conflict carrying the document currently stored.
    pub fn conflict(current: RemoteSnapshot) -> Self {
        StorageError::Conflict {
            current: Box::new(current),
        }
    }
}
