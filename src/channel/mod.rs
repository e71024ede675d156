//! Publish/subscribe channels carrying whole-session snapshots between clients.
//!
//! Two realizations share the [`SyncChannel`] contract: [`LocalChannel`] fans out between
//! clients of one process (optionally persisted to disk), and [`RelayChannel`] talks to the
//! networked relay. Both push every accepted write to the current subscribers of a session and
//! replay the latest value to a subscriber as soon as it joins.

pub mod local;
pub mod relay;

use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use utoipa::ToSchema;

use crate::{error::SyncError, model::QuizState, session::SessionId};

pub use self::local::LocalChannel;
pub use self::relay::RelayChannel;

/// Result alias for channel operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Latest authoritative value of a session as seen by the channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSnapshot {
    /// Monotonic counter bumped by every accepted write; `0` when nothing was ever written.
    pub revision: u64,
    /// Stored document, `None` when the session does not exist (yet).
    #[serde(default, deserialize_with = "crate::model::schema::deserialize_opt")]
    #[schema(value_type = Object)]
    pub state: Option<QuizState>,
}

/// Full-state write sent to the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    /// Complete new value of the session.
    #[serde(deserialize_with = "crate::model::schema::deserialize")]
    #[schema(value_type = Object)]
    pub state: QuizState,
    /// `None` replaces the stored document unconditionally (last write wins). `Some(r)` only
    /// succeeds while the stored revision is still `r`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_revision: Option<u64>,
}

impl PublishRequest {
    /// Unconditional whole-document replace.
    pub fn replace(state: QuizState) -> Self {
        Self {
            state,
            expected_revision: None,
        }
    }

    /// Write guarded by the revision the caller based its change on.
    pub fn versioned(state: QuizState, expected_revision: u64) -> Self {
        Self {
            state,
            expected_revision: Some(expected_revision),
        }
    }
}

/// Acknowledgement of an accepted write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PublishAck {
    /// Revision assigned to the write.
    pub revision: u64,
}

/// Notification pushed to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The session's current value (replayed on join, then pushed on every write).
    Snapshot(RemoteSnapshot),
    /// The transport went away; no further snapshots will follow.
    Closed { reason: String },
}

/// Callback receiving channel events for one subscription.
pub type UpdateSink = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

/// Transport able to fan session snapshots out to every interested client.
pub trait SyncChannel: Send + Sync {
    /// Start receiving snapshots of `session_id`. The latest known value is replayed first.
    fn subscribe(
        &self,
        session_id: &SessionId,
        sink: UpdateSink,
    ) -> BoxFuture<'static, SyncResult<Subscription>>;

    /// Store a full snapshot of `session_id` and push it to every subscriber.
    fn publish(
        &self,
        session_id: &SessionId,
        request: PublishRequest,
    ) -> BoxFuture<'static, SyncResult<PublishAck>>;
}

/// Delivery gate shared between a subscription handle and its forwarding task.
///
/// Delivery and cancellation serialize on the same lock, so once [`SinkGate::close`] returns no
/// callback is running and none will start.
#[derive(Clone)]
pub(crate) struct SinkGate {
    open: Arc<Mutex<bool>>,
    sink: UpdateSink,
}

impl SinkGate {
    pub(crate) fn new(sink: UpdateSink) -> Self {
        Self {
            open: Arc::new(Mutex::new(true)),
            sink,
        }
    }

    /// Invoke the sink unless the gate was closed. Returns whether the gate is still open.
    pub(crate) fn deliver(&self, event: ChannelEvent) -> bool {
        let open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if *open {
            (self.sink)(event);
        }
        *open
    }

    pub(crate) fn close(&self) {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    fn is_open(&self) -> bool {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle of an active subscription. Dropping it unsubscribes.
pub struct Subscription {
    gate: SinkGate,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn new(gate: SinkGate, task: JoinHandle<()>) -> Self {
        Self {
            gate,
            task: Some(task),
        }
    }

    /// Stop deliveries immediately, even for a message already in flight.
    ///
    /// Safe to call any number of times, including after the transport closed on its own.
    pub fn cancel(&mut self) {
        self.gate.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Whether snapshots may still be delivered through this subscription.
    pub fn is_active(&self) -> bool {
        self.gate.is_open()
            && self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting_gate() -> (SinkGate, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let sink: UpdateSink = Arc::new(move |_event| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (SinkGate::new(sink), count)
    }

    #[test]
    fn closed_gate_drops_events() {
        let (gate, count) = counting_gate();
        assert!(gate.deliver(ChannelEvent::Snapshot(RemoteSnapshot::default())));
        gate.close();
        assert!(!gate.deliver(ChannelEvent::Snapshot(RemoteSnapshot::default())));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let (gate, count) = counting_gate();
        let task = tokio::spawn(std::future::pending::<()>());
        let mut subscription = Subscription::new(gate.clone(), task);
        assert!(subscription.is_active());

        subscription.cancel();
        subscription.cancel();
        assert!(!subscription.is_active());
        assert!(!gate.deliver(ChannelEvent::Closed {
            reason: "late".into()
        }));
        drop(subscription);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn snapshot_wire_format_uses_camel_case_and_null_state() {
        let json = serde_json::to_value(RemoteSnapshot::default()).unwrap();
        assert_eq!(json, serde_json::json!({ "revision": 0, "state": null }));

        let parsed: RemoteSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, RemoteSnapshot::default());
    }
}
