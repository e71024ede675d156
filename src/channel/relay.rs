//! Networked channel: snapshots are pushed over the relay WebSocket, writes go through its REST
//! endpoint.

use std::{sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt, future::BoxFuture};
use reqwest::StatusCode;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use super::{
    ChannelEvent, PublishAck, PublishRequest, RemoteSnapshot, SinkGate, Subscription,
    SyncChannel, SyncResult, UpdateSink,
};
use crate::{
    dto::ws::{SubscriberInboundMessage, SubscriberOutboundMessage},
    error::SyncError,
    session::SessionId,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client of a quizpoint relay reachable at `base_url`.
#[derive(Clone)]
pub struct RelayChannel {
    http: reqwest::Client,
    base_url: Arc<str>,
}

impl RelayChannel {
    /// Build a channel talking to the relay at `base_url` (e.g. `http://127.0.0.1:8080`).
    pub fn new(base_url: impl AsRef<str>) -> SyncResult<Self> {
        let base_url = base_url.as_ref().trim_end_matches('/');
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(SyncError::InvalidRelayUrl(base_url.to_owned()));
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| SyncError::transport("building relay http client", err))?;
        Ok(Self {
            http,
            base_url: Arc::from(base_url),
        })
    }

    fn ws_url(&self) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else {
            self.base_url.replacen("http://", "ws://", 1)
        };
        format!("{ws_base}/ws")
    }

    fn session_url(&self, session_id: &SessionId) -> String {
        format!("{}/sessions/{}", self.base_url, session_id)
    }

    /// One-off read of the current snapshot without subscribing.
    pub async fn fetch(&self, session_id: &SessionId) -> SyncResult<RemoteSnapshot> {
        let response = self
            .http
            .get(self.session_url(session_id))
            .send()
            .await
            .map_err(|err| SyncError::transport("fetching session", err))?;
        match response.status() {
            status if status.is_success() => response
                .json::<RemoteSnapshot>()
                .await
                .map_err(|err| SyncError::transport("decoding session snapshot", err)),
            StatusCode::NOT_FOUND => Ok(RemoteSnapshot::default()),
            status => Err(rejected(status, response).await),
        }
    }
}

async fn rejected(status: StatusCode, response: reqwest::Response) -> SyncError {
    let message = response.text().await.unwrap_or_default();
    SyncError::Rejected {
        status: status.as_u16(),
        message,
    }
}

impl SyncChannel for RelayChannel {
    fn subscribe(
        &self,
        session_id: &SessionId,
        sink: UpdateSink,
    ) -> BoxFuture<'static, SyncResult<Subscription>> {
        let url = self.ws_url();
        let id = session_id.clone();
        Box::pin(async move {
            let (stream, _) = connect_async(url.as_str())
                .await
                .map_err(|err| SyncError::transport(format!("connecting to {url}"), err))?;
            let (mut writer, mut reader) = stream.split();

            let hello = serde_json::to_string(&SubscriberInboundMessage::Subscribe {
                session_id: id.clone(),
            })?;
            writer
                .send(Message::Text(hello.into()))
                .await
                .map_err(|err| SyncError::transport("sending subscribe frame", err))?;

            let gate = SinkGate::new(sink);
            let forward = gate.clone();
            let session = id.clone();
            let task = tokio::spawn(async move {
                // Holding the write half keeps the socket open for the subscription lifetime.
                let _writer = writer;
                let reason = loop {
                    match reader.next().await {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<SubscriberOutboundMessage>(text.as_str()) {
                                Ok(SubscriberOutboundMessage::Snapshot { snapshot, .. }) => {
                                    if !forward.deliver(ChannelEvent::Snapshot(snapshot)) {
                                        return;
                                    }
                                }
                                Ok(SubscriberOutboundMessage::Error { message }) => break message,
                                Err(err) => {
                                    warn!(session_id = %session, error = %err, "ignoring malformed relay frame");
                                }
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            break frame
                                .map(|frame| frame.reason.as_str().to_owned())
                                .filter(|reason| !reason.is_empty())
                                .unwrap_or_else(|| "closed by relay".into());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => break err.to_string(),
                        None => break "relay connection ended".into(),
                    }
                };
                debug!(session_id = %session, %reason, "relay subscription closed");
                forward.deliver(ChannelEvent::Closed { reason });
            });

            debug!(session_id = %id, "relay subscription opened");
            Ok(Subscription::new(gate, task))
        })
    }

    fn publish(
        &self,
        session_id: &SessionId,
        request: PublishRequest,
    ) -> BoxFuture<'static, SyncResult<PublishAck>> {
        let http = self.http.clone();
        let url = self.session_url(session_id);
        let id = session_id.clone();
        Box::pin(async move {
            let response = http
                .put(url)
                .json(&request)
                .send()
                .await
                .map_err(|err| SyncError::transport("publishing session", err))?;

            match response.status() {
                status if status.is_success() => response
                    .json::<PublishAck>()
                    .await
                    .map_err(|err| SyncError::transport("decoding publish ack", err)),
                StatusCode::CONFLICT => {
                    let current = response
                        .json::<RemoteSnapshot>()
                        .await
                        .map_err(|err| SyncError::transport("decoding conflict body", err))?;
                    Err(SyncError::Conflict {
                        session_id: id,
                        current: Box::new(current),
                    })
                }
                status => Err(rejected(status, response).await),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    use super::*;
    use crate::model::QuizState;

    fn code() -> SessionId {
        SessionId::validate("482913").unwrap()
    }

    #[test]
    fn rejects_non_http_urls_and_derives_ws_endpoint() {
        assert!(matches!(
            RelayChannel::new("ftp://relay"),
            Err(SyncError::InvalidRelayUrl(_))
        ));

        let plain = RelayChannel::new("http://127.0.0.1:8080/").unwrap();
        assert_eq!(plain.ws_url(), "ws://127.0.0.1:8080/ws");
        assert_eq!(plain.session_url(&code()), "http://127.0.0.1:8080/sessions/482913");

        let tls = RelayChannel::new("https://relay.example").unwrap();
        assert_eq!(tls.ws_url(), "wss://relay.example/ws");
    }

    #[tokio::test]
    async fn conflict_response_carries_current_snapshot() {
        let server = MockServer::start().await;
        let current = RemoteSnapshot {
            revision: 7,
            state: Some(QuizState::new(code())),
        };
        Mock::given(method("PUT"))
            .and(path("/sessions/482913"))
            .respond_with(ResponseTemplate::new(409).set_body_json(&current))
            .mount(&server)
            .await;

        let channel = RelayChannel::new(server.uri()).unwrap();
        let err = channel
            .publish(&code(), PublishRequest::versioned(QuizState::new(code()), 3))
            .await
            .unwrap_err();
        match err {
            SyncError::Conflict { current: got, .. } => assert_eq!(*got, current),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn unexpected_status_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(503).set_body_string("degraded"))
            .mount(&server)
            .await;

        let channel = RelayChannel::new(server.uri()).unwrap();
        let err = channel
            .publish(&code(), PublishRequest::replace(QuizState::new(code())))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Rejected { status: 503, .. }));
    }

    #[tokio::test]
    async fn fetch_maps_not_found_to_empty_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sessions/482913"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let channel = RelayChannel::new(server.uri()).unwrap();
        assert_eq!(channel.fetch(&code()).await.unwrap(), RemoteSnapshot::default());
    }
}
