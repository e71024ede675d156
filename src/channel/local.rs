//! Same-device fan-out: every client of the process shares one hub handle.
//!
//! The hub is an explicit object handed to each synchronizer, so independent hubs never see
//! each other's sessions. With a persistence directory, the latest snapshot of each session is
//! also written to `<dir>/<session>.json` and replayed after a restart.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::{Mutex, watch};
use tracing::{debug, warn};

use super::{
    ChannelEvent, PublishAck, PublishRequest, RemoteSnapshot, SinkGate, Subscription,
    SyncChannel, SyncResult, UpdateSink,
};
use crate::{error::SyncError, session::SessionId};

/// In-process channel shared by the Primary and Monitors living on one device.
#[derive(Clone, Default)]
pub struct LocalChannel {
    hub: Arc<LocalHub>,
}

#[derive(Default)]
struct LocalHub {
    sessions: DashMap<SessionId, Arc<watch::Sender<RemoteSnapshot>>>,
    persist_dir: Option<PathBuf>,
    persist_gate: Mutex<()>,
}

impl LocalChannel {
    /// Purely in-memory hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hub that also keeps the latest snapshot of each session under `dir`.
    pub fn persisted(dir: impl Into<PathBuf>) -> Self {
        Self {
            hub: Arc::new(LocalHub {
                persist_dir: Some(dir.into()),
                ..LocalHub::default()
            }),
        }
    }

    /// Latest snapshot held in memory for `session_id`.
    ///
    /// A persisted hub keeps only watched sessions in memory; others are read back from disk
    /// on their next use.
    pub fn latest(&self, session_id: &SessionId) -> Option<RemoteSnapshot> {
        self.hub
            .sessions
            .get(session_id)
            .map(|sender| sender.borrow().clone())
    }
}

impl LocalHub {
    async fn sender_for(&self, id: &SessionId) -> SyncResult<Arc<watch::Sender<RemoteSnapshot>>> {
        if let Some(existing) = self.sessions.get(id) {
            return Ok(existing.clone());
        }

        let initial = self.load_persisted(id).await;
        let sender = self
            .sessions
            .entry(id.clone())
            .or_insert_with(|| Arc::new(watch::Sender::new(initial)))
            .clone();
        Ok(sender)
    }

    async fn load_persisted(&self, id: &SessionId) -> RemoteSnapshot {
        let Some(path) = self.persist_path(id) else {
            return RemoteSnapshot::default();
        };

        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => match serde_json::from_str::<RemoteSnapshot>(&contents) {
                Ok(snapshot) => {
                    debug!(session_id = %id, revision = snapshot.revision, "restored persisted snapshot");
                    snapshot
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "ignoring unreadable persisted snapshot");
                    RemoteSnapshot::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => RemoteSnapshot::default(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read persisted snapshot");
                RemoteSnapshot::default()
            }
        }
    }

    /// Write the current value of `sender` to disk via a temporary file and a rename, so a
    /// reader never observes a half-written document.
    async fn persist(
        &self,
        id: &SessionId,
        sender: &watch::Sender<RemoteSnapshot>,
    ) -> SyncResult<()> {
        let Some(path) = self.persist_path(id) else {
            return Ok(());
        };

        let _guard = self.persist_gate.lock().await;
        let snapshot = sender.borrow().clone();
        let payload = serde_json::to_vec_pretty(&snapshot)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| SyncError::transport("creating persistence directory", err))?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, payload)
            .await
            .map_err(|err| SyncError::transport("writing persisted snapshot", err))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|err| SyncError::transport("replacing persisted snapshot", err))?;
        Ok(())
    }

    /// Drop the in-memory copy of a persisted session nobody watches or writes right now.
    ///
    /// Without a persistence directory the map is the only copy and is kept.
    fn release_if_idle(&self, id: &SessionId) {
        if self.persist_dir.is_none() {
            return;
        }
        let released = self.sessions.remove_if(id, |_, sender| {
            sender.receiver_count() == 0 && Arc::strong_count(sender) == 1
        });
        if released.is_some() {
            debug!(session_id = %id, "released idle local session");
        }
    }

    fn persist_path(&self, id: &SessionId) -> Option<PathBuf> {
        let dir = self.persist_dir.as_deref()?;
        safe_file_stem(id).map(|stem| file_in(dir, stem))
    }
}

fn safe_file_stem(id: &SessionId) -> Option<&str> {
    let stem = id.as_str();
    stem.bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        .then_some(stem)
}

fn file_in(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{stem}.json"))
}

impl SyncChannel for LocalChannel {
    fn subscribe(
        &self,
        session_id: &SessionId,
        sink: UpdateSink,
    ) -> BoxFuture<'static, SyncResult<Subscription>> {
        let hub = self.hub.clone();
        let id = session_id.clone();
        Box::pin(async move {
            let sender = hub.sender_for(&id).await?;
            let mut receiver = sender.subscribe();
            let gate = SinkGate::new(sink);
            let forward = gate.clone();

            let task = tokio::spawn(async move {
                let latest = receiver.borrow_and_update().clone();
                if !forward.deliver(ChannelEvent::Snapshot(latest)) {
                    return;
                }
                while receiver.changed().await.is_ok() {
                    let latest = receiver.borrow_and_update().clone();
                    if !forward.deliver(ChannelEvent::Snapshot(latest)) {
                        return;
                    }
                }
                forward.deliver(ChannelEvent::Closed {
                    reason: "local hub dropped".into(),
                });
            });

            debug!(session_id = %id, "local subscription opened");
            Ok(Subscription::new(gate, task))
        })
    }

    fn publish(
        &self,
        session_id: &SessionId,
        request: PublishRequest,
    ) -> BoxFuture<'static, SyncResult<PublishAck>> {
        let hub = self.hub.clone();
        let id = session_id.clone();
        Box::pin(async move {
            let sender = hub.sender_for(&id).await?;
            let PublishRequest {
                state,
                expected_revision,
            } = request;

            let mut outcome = Err(RemoteSnapshot::default());
            sender.send_if_modified(|current| {
                if expected_revision.is_some_and(|expected| expected != current.revision) {
                    outcome = Err(current.clone());
                    return false;
                }
                current.revision += 1;
                current.state = Some(state);
                outcome = Ok(PublishAck {
                    revision: current.revision,
                });
                true
            });

            let ack = outcome.map_err(|current| SyncError::Conflict {
                session_id: id.clone(),
                current: Box::new(current),
            })?;
            hub.persist(&id, &sender).await?;
            drop(sender);
            hub.release_if_idle(&id);
            debug!(session_id = %id, revision = ack.revision, "local publish accepted");
            Ok(ack)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::model::QuizState;

    fn sink() -> (UpdateSink, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink: UpdateSink = Arc::new(move |event| {
            let _ = tx.send(event);
        });
        (sink, rx)
    }

    fn code() -> SessionId {
        SessionId::validate("482913").unwrap()
    }

    async fn next_snapshot(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> RemoteSnapshot {
        match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
            Ok(Some(ChannelEvent::Snapshot(snapshot))) => snapshot,
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_session_replays_empty_snapshot() {
        let channel = LocalChannel::new();
        let (sink, mut rx) = sink();
        let _subscription = channel.subscribe(&code(), sink).await.unwrap();
        assert_eq!(next_snapshot(&mut rx).await, RemoteSnapshot::default());
    }

    #[tokio::test]
    async fn late_joiner_receives_latest_write() {
        let channel = LocalChannel::new();
        let mut state = QuizState::new(code());
        for teams in 1..=3 {
            state.num_teams = teams;
            channel
                .publish(&code(), PublishRequest::replace(state.clone()))
                .await
                .unwrap();
        }

        let (sink, mut rx) = sink();
        let _subscription = channel.subscribe(&code(), sink).await.unwrap();
        let snapshot = next_snapshot(&mut rx).await;
        assert_eq!(snapshot.revision, 3);
        assert_eq!(snapshot.state.unwrap().num_teams, 3);
    }

    #[tokio::test]
    async fn versioned_publish_rejects_stale_revision() {
        let channel = LocalChannel::new();
        let state = QuizState::new(code());
        let ack = channel
            .publish(&code(), PublishRequest::versioned(state.clone(), 0))
            .await
            .unwrap();
        assert_eq!(ack.revision, 1);

        let err = channel
            .publish(&code(), PublishRequest::versioned(state, 0))
            .await
            .unwrap_err();
        match err {
            SyncError::Conflict { current, .. } => assert_eq!(current.revision, 1),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn hubs_are_isolated() {
        let first = LocalChannel::new();
        let second = LocalChannel::new();
        first
            .publish(&code(), PublishRequest::replace(QuizState::new(code())))
            .await
            .unwrap();
        assert!(second.latest(&code()).is_none());
        assert_eq!(first.latest(&code()).unwrap().revision, 1);
    }

    #[tokio::test]
    async fn persisted_hub_replays_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = QuizState::new(code());
        state.quiz_title = "Persisted".into();

        LocalChannel::persisted(dir.path())
            .publish(&code(), PublishRequest::replace(state.clone()))
            .await
            .unwrap();
        assert!(dir.path().join("482913.json").exists());

        let restarted = LocalChannel::persisted(dir.path());
        let (sink, mut rx) = sink();
        let _subscription = restarted.subscribe(&code(), sink).await.unwrap();
        let snapshot = next_snapshot(&mut rx).await;
        assert_eq!(snapshot.revision, 1);
        assert_eq!(snapshot.state, Some(state));
    }

    #[tokio::test]
    async fn persisted_hub_keeps_only_watched_sessions_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let channel = LocalChannel::persisted(dir.path());
        let state = QuizState::new(code());

        channel
            .publish(&code(), PublishRequest::replace(state.clone()))
            .await
            .unwrap();
        assert!(channel.latest(&code()).is_none());

        let ack = channel
            .publish(&code(), PublishRequest::versioned(state.clone(), 1))
            .await
            .unwrap();
        assert_eq!(ack.revision, 2);

        let (sink, mut rx) = sink();
        let _subscription = channel.subscribe(&code(), sink).await.unwrap();
        assert_eq!(next_snapshot(&mut rx).await.revision, 2);
        channel
            .publish(&code(), PublishRequest::replace(state))
            .await
            .unwrap();
        assert_eq!(channel.latest(&code()).unwrap().revision, 3);
    }

    #[tokio::test]
    async fn cancelled_subscription_stops_deliveries() {
        let channel = LocalChannel::new();
        let (sink, mut rx) = sink();
        let mut subscription = channel.subscribe(&code(), sink).await.unwrap();
        next_snapshot(&mut rx).await;

        subscription.cancel();
        channel
            .publish(&code(), PublishRequest::replace(QuizState::new(code())))
            .await
            .unwrap();
        subscription.cancel();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }
}
