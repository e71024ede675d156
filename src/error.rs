use std::error::Error;

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    channel::RemoteSnapshot, dao::storage::StorageError, model::schema::SchemaError,
    session::SessionId,
};

/// Errors surfaced by the client-side synchronization layer.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The transport (socket, HTTP, disk) failed.
    #[error("channel transport failed: {message}")]
    Transport {
        /// What was being attempted.
        message: String,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A versioned write was based on a stale revision.
    #[error("write to session `{session_id}` conflicts with revision {}", current.revision)]
    Conflict {
        /// Session written to.
        session_id: SessionId,
        /// Snapshot currently stored.
        current: Box<RemoteSnapshot>,
    },
    /// The relay refused the request.
    #[error("relay rejected the request ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Message returned by the relay.
        message: String,
    },
    /// A message or document could not be encoded or decoded.
    #[error("failed to encode or decode a session message")]
    Codec(#[from] serde_json::Error),
    /// A stored document does not match any known schema.
    #[error("invalid session document")]
    Schema(#[from] SchemaError),
    /// The relay endpoint is not an `http(s)://` URL.
    #[error("invalid relay url `{0}`")]
    InvalidRelayUrl(String),
    /// The operation needs a joined session.
    #[error("no session joined")]
    NotJoined,
}

impl SyncError {
    /// Wrap any transport failure.
    pub fn transport(message: impl Into<String>, source: impl Error + Send + Sync + 'static) -> Self {
        SyncError::Transport {
            message: message.into(),
            source: Box::new(source),
        }
    }
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// A versioned write lost the race against another writer.
    #[error("stale revision (current is {})", .0.revision)]
    StaleRevision(Box<RemoteSnapshot>),
    /// No unused session code was found.
    #[error("could not allocate an unused session code")]
    CodesExhausted,
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict { current } => ServiceError::StaleRevision(current),
            other => ServiceError::Unavailable(other),
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with the stored revision; the body carries the current snapshot.
    #[error("conflict: stale revision")]
    Conflict(Box<RemoteSnapshot>),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::StaleRevision(current) => AppError::Conflict(current),
            ServiceError::CodesExhausted => {
                AppError::Internal("could not allocate an unused session code".into())
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if let AppError::Conflict(current) = self {
            return (status, Json(*current)).into_response();
        }

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
