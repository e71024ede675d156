use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::debug;

use crate::{
    channel::RemoteSnapshot,
    dao::{
        session_store::SessionStore,
        storage::{StorageError, StorageResult},
    },
    model::QuizState,
    session::SessionId,
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{CouchSessionDocument, session_doc_id},
};

/// [`SessionStore`] keeping one CouchDB document per session.
#[derive(Clone)]
pub struct CouchSessionStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

/// Result of a conditional document write.
enum PutOutcome {
    Written,
    /// CouchDB refused the `_rev` (another writer got there first).
    RevisionConflict,
}

impl CouchSessionStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url);
        let database = Arc::<str>::from(config.database);
        let auth = config
            .credentials
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url,
            database,
            auth,
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn with_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}/{}", self.base_url, self.database, path);
        self.with_auth(self.client.request(method, url))
    }

    fn database_url(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = self.database_url();

        let response = self
            .with_auth(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .with_auth(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                if create.status().is_success() {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json::<T>().await.map(Some).map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_string(),
                        source,
                    }
                })
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn put_document<T>(&self, doc_id: &str, document: &T) -> CouchResult<PutOutcome>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .request(Method::PUT, doc_id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            status if status.is_success() => Ok(PutOutcome::Written),
            StatusCode::CONFLICT => Ok(PutOutcome::RevisionConflict),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn load_snapshot(&self, doc_id: &str) -> CouchResult<Option<RemoteSnapshot>> {
        self.get_document::<CouchSessionDocument>(doc_id)
            .await?
            .map(CouchSessionDocument::into_snapshot)
            .transpose()
    }

    async fn save_snapshot(
        &self,
        id: &SessionId,
        state: QuizState,
        expected_revision: Option<u64>,
    ) -> StorageResult<RemoteSnapshot> {
        let doc_id = session_doc_id(id);
        let existing = self
            .get_document::<CouchSessionDocument>(&doc_id)
            .await?;
        let (rev, stored_revision) = existing
            .as_ref()
            .map(|doc| (doc.rev.clone(), doc.revision))
            .unwrap_or((None, 0));

        if expected_revision.is_some_and(|expected| expected != stored_revision) {
            let current = match existing {
                Some(doc) => doc.into_snapshot()?,
                None => RemoteSnapshot::default(),
            };
            return Err(StorageError::conflict(current));
        }

        let encoded =
            serde_json::to_value(&state).map_err(|source| CouchDaoError::EncodeDocument {
                doc_id: doc_id.clone(),
                source,
            })?;
        let document = CouchSessionDocument {
            id: doc_id.clone(),
            rev,
            revision: stored_revision + 1,
            state: encoded,
            updated_at: OffsetDateTime::now_utc().format(&Rfc3339).ok(),
        };

        match self.put_document(&doc_id, &document).await? {
            PutOutcome::Written => Ok(RemoteSnapshot {
                revision: document.revision,
                state: Some(state),
            }),
            PutOutcome::RevisionConflict => {
                debug!(doc_id = %doc_id, "couch revision conflict on session save");
                let current = self.load_snapshot(&doc_id).await?.unwrap_or_default();
                Err(StorageError::conflict(current))
            }
        }
    }
}

impl SessionStore for CouchSessionStore {
    fn load(&self, id: &SessionId) -> BoxFuture<'static, StorageResult<Option<RemoteSnapshot>>> {
        let store = self.clone();
        let doc_id = session_doc_id(id);
        Box::pin(async move { store.load_snapshot(&doc_id).await.map_err(Into::into) })
    }

    fn save(
        &self,
        id: &SessionId,
        state: QuizState,
        expected_revision: Option<u64>,
    ) -> BoxFuture<'static, StorageResult<RemoteSnapshot>> {
        let store = self.clone();
        let id = id.clone();
        Box::pin(async move { store.save_snapshot(&id, state, expected_revision).await })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let url = store.database_url();
            let response = store
                .with_auth(store.client.get(&url))
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: url.clone(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::RequestStatus {
                    path: url,
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, method, path},
    };

    use super::*;

    fn code() -> SessionId {
        SessionId::validate("482913").unwrap()
    }

    async fn connected(server: &MockServer) -> CouchSessionStore {
        Mock::given(method("GET"))
            .and(path("/quizpoint"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "db_name": "quizpoint" })))
            .mount(server)
            .await;
        CouchSessionStore::connect(CouchConfig::new(server.uri(), "quizpoint").unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn creates_missing_database_on_connect() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quizpoint"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/quizpoint"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        CouchSessionStore::connect(CouchConfig::new(server.uri(), "quizpoint").unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn loads_and_migrates_legacy_documents() {
        let server = MockServer::start().await;
        let store = connected(&server).await;
        Mock::given(method("GET"))
            .and(path("/quizpoint/session::482913"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "_id": "session::482913",
                "_rev": "3-abc",
                "revision": 3,
                "state": {
                    "id": "482913",
                    "numTeams": 1,
                    "scores": { "0": { "0": 4 } }
                }
            })))
            .mount(&server)
            .await;

        let snapshot = store.load(&code()).await.unwrap().unwrap();
        assert_eq!(snapshot.revision, 3);
        let state = snapshot.state.unwrap();
        assert_eq!(state.scores[&0][&0].runs, 4);
        assert!(!state.scores[&0][&0].is_wicket);
    }

    #[tokio::test]
    async fn save_carries_couch_rev_and_bumps_revision() {
        let server = MockServer::start().await;
        let store = connected(&server).await;
        Mock::given(method("GET"))
            .and(path("/quizpoint/session::482913"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "_id": "session::482913",
                "_rev": "1-abc",
                "revision": 1,
                "state": { "id": "482913", "schemaVersion": 2 }
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/quizpoint/session::482913"))
            .and(body_partial_json(json!({ "_rev": "1-abc", "revision": 2 })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        let saved = store
            .save(&code(), QuizState::new(code()), Some(1))
            .await
            .unwrap();
        assert_eq!(saved.revision, 2);

        let err = store
            .save(&code(), QuizState::new(code()), Some(0))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict { ref current } if current.revision == 1));
    }

    #[tokio::test]
    async fn unexpected_status_maps_to_unavailable() {
        let server = MockServer::start().await;
        let store = connected(&server).await;
        Mock::given(method("GET"))
            .and(path("/quizpoint/session::482913"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = store.load(&code()).await.unwrap_err();
        assert!(matches!(err, StorageError::Unavailable { .. }));
    }
}
