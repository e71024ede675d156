use dashmap::DashMap;
use tokio::sync::watch;
use tracing::debug;

use crate::{channel::RemoteSnapshot, session::SessionId};

/// Per-session fan-out of the latest snapshot to the relay's subscribers.
///
/// A feed only ever moves forward: snapshots older than the one it holds are dropped, so a
/// slow store read can never overwrite a newer write pushed meanwhile.
#[derive(Default)]
pub struct SessionHub {
    feeds: DashMap<SessionId, watch::Sender<RemoteSnapshot>>,
}

impl SessionHub {
    /// Hub without any feed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Receiver holding the latest known snapshot of `id` and notified on every newer one.
    pub fn subscribe(&self, id: &SessionId) -> watch::Receiver<RemoteSnapshot> {
        self.feeds
            .entry(id.clone())
            .or_insert_with(|| watch::Sender::new(RemoteSnapshot::default()))
            .subscribe()
    }

    /// Push `snapshot` to the subscribers of `id` when it is newer than what they saw.
    ///
    /// Sessions nobody watches get no feed; the store stays the source for later subscribers.
    pub fn advance(&self, id: &SessionId, snapshot: RemoteSnapshot) -> bool {
        let Some(feed) = self.feeds.get(id) else {
            return false;
        };
        feed.send_if_modified(|current| {
            if snapshot.revision <= current.revision {
                return false;
            }
            *current = snapshot;
            true
        })
    }

    /// Latest snapshot held for a watched `id`.
    pub fn latest(&self, id: &SessionId) -> Option<RemoteSnapshot> {
        self.feeds
            .get(id)
            .map(|feed| feed.borrow().clone())
            .filter(|snapshot| snapshot.revision > 0)
    }

    /// Forget feeds nobody listens to anymore.
    pub fn release(&self, id: &SessionId) {
        if self
            .feeds
            .remove_if(id, |_, feed| feed.receiver_count() == 0)
            .is_some()
        {
            debug!(session_id = %id, "released idle session feed");
        }
    }

    /// Number of sessions with a live feed.
    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    /// Whether no session currently has a feed.
    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }
}
