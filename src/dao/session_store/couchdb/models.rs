use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{channel::RemoteSnapshot, model::schema, session::SessionId};

use super::error::{CouchDaoError, CouchResult};

/// Prefix of session document ids.
pub const SESSION_PREFIX: &str = "session::";

/// One session as stored in CouchDB. `_rev` is CouchDB's own MVCC token; `revision` is the
/// counter exposed to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchSessionDocument {
    /// `session::<code>`.
    #[serde(rename = "_id")]
    pub id: String,
    /// CouchDB revision token, absent on first insert.
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// Client-visible revision counter.
    pub revision: u64,
    /// Raw state document, decoded through [`schema::decode`].
    pub state: Value,
    /// RFC 3339 time of the last write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl CouchSessionDocument {
    /// Decode (and migrate) the stored state.
    pub fn into_snapshot(self) -> CouchResult<RemoteSnapshot> {
        let state = schema::decode(self.state).map_err(|source| CouchDaoError::InvalidDocument {
            doc_id: self.id,
            source,
        })?;
        Ok(RemoteSnapshot {
            revision: self.revision,
            state: Some(state),
        })
    }
}

/// Document id of session `id`.
pub fn session_doc_id(id: &SessionId) -> String {
    format!("{SESSION_PREFIX}{id}")
}
