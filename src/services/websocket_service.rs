use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::ws::{SubscriberInboundMessage, SubscriberOutboundMessage},
    services::session_service,
    session::SessionId,
    state::SharedState,
};

const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle the full lifecycle of one subscriber WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let connection = Uuid::new_v4().simple().to_string();
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let initial_message = match tokio::time::timeout(SUBSCRIBE_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(Message::Close(_)))) => {
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Ok(_))) => {
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Err(err))) => {
            warn!(%connection, error = %err, "websocket receive error");
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(None) | Err(_) => {
            warn!(%connection, "websocket subscription timed out");
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let session_id = match SubscriberInboundMessage::from_json_str(initial_message.as_str()) {
        Ok(SubscriberInboundMessage::Subscribe { session_id }) => {
            SessionId::validate(session_id.as_str())
        }
        Ok(SubscriberInboundMessage::Unknown) => None,
        Err(err) => {
            warn!(%connection, error = %err, "failed to parse subscriber message");
            None
        }
    };
    let Some(session_id) = session_id else {
        warn!(%connection, "first message was not a valid subscription");
        reject(&outbound_tx, "expected a subscribe message with a session id");
        finalize(writer_task, outbound_tx).await;
        return;
    };

    let mut feed = match session_service::watch_session(&state, &session_id).await {
        Ok(feed) => feed,
        Err(err) => {
            warn!(session_id = %session_id, error = %err, "cannot serve subscription");
            reject(&outbound_tx, &err.to_string());
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };
    info!(%connection, session_id = %session_id, "subscriber connected");

    // Replay the latest value right away, then follow every newer one.
    let mut pending = Some(feed.borrow_and_update().clone());
    loop {
        if let Some(snapshot) = pending.take() {
            let message = SubscriberOutboundMessage::Snapshot {
                session_id: session_id.clone(),
                snapshot,
            };
            if !send_message_to_websocket(&outbound_tx, &message) {
                break;
            }
        }

        tokio::select! {
            changed = feed.changed() => {
                if changed.is_err() {
                    break;
                }
                pending = Some(feed.borrow_and_update().clone());
            }
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    debug!(session_id = %session_id, payload = %text.as_str(), "ignoring subscriber message");
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = outbound_tx.send(Message::Pong(payload));
                }
                Some(Ok(Message::Close(frame))) => {
                    let _ = outbound_tx.send(Message::Close(frame));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(%connection, session_id = %session_id, error = %err, "websocket error");
                    break;
                }
                None => break,
            },
        }
    }

    drop(feed);
    session_service::release(&state, &session_id);
    info!(%connection, session_id = %session_id, "subscriber disconnected");

    finalize(writer_task, outbound_tx).await;
}

/// Serialize a payload and push it onto the writer channel. Returns `false` once the writer
/// is gone.
fn send_message_to_websocket<T>(tx: &mpsc::UnboundedSender<Message>, value: &T) -> bool
where
    T: ?Sized + serde::Serialize,
{
    match serde_json::to_string(value) {
        Ok(payload) => tx.send(Message::Text(payload.into())).is_ok(),
        Err(err) => {
            warn!(error = %err, "failed to serialize subscriber message");
            true
        }
    }
}

fn reject(tx: &mpsc::UnboundedSender<Message>, message: &str) {
    send_message_to_websocket(
        tx,
        &SubscriberOutboundMessage::Error {
            message: message.to_owned(),
        },
    );
    let _ = tx.send(Message::Close(None));
}

/// Close the writer channel and wait for the writer task to flush.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
