use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::{
    channel::RemoteSnapshot,
    dto::sse::ServerEvent,
    services::session_service,
    session::SessionId,
    state::SharedState,
};

/// Event name of snapshot pushes.
pub const SNAPSHOT_EVENT: &str = "snapshot";

/// Convert a session feed into an SSE response: the latest snapshot first, then every newer
/// one, until the client disconnects.
pub fn to_sse_stream(
    state: SharedState,
    session_id: SessionId,
    mut feed: watch::Receiver<RemoteSnapshot>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let capacity = state.config().session_channel_capacity;
    let keep_alive = state.config().sse_keep_alive;

    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(capacity);

    // forwarder task: reads from the session feed and pushes into mpsc
    tokio::spawn(async move {
        let mut pending = Some(feed.borrow_and_update().clone());
        loop {
            if let Some(snapshot) = pending.take() {
                match ServerEvent::json(Some(SNAPSHOT_EVENT.to_string()), &snapshot) {
                    Ok(payload) => {
                        if tx.send(Ok(payload.into_event())).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(session_id = %session_id, error = %err, "failed to encode snapshot event"),
                }
            }

            tokio::select! {
                _ = tx.closed() => break,
                changed = feed.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    pending = Some(feed.borrow_and_update().clone());
                }
            }
        }

        drop(feed);
        session_service::release(&state, &session_id);
        info!(session_id = %session_id, "session SSE stream disconnected");
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(keep_alive.max(Duration::from_secs(1)))
            .text("keep-alive"),
    )
}
