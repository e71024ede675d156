//! Keeps a [`LocalStore`] in step with the authoritative copy of a session.
//!
//! Writes are applied locally first and then handed to a per-session publisher task, which
//! sends them in order so a client never overtakes its own earlier writes. Publish failures are
//! logged and never roll the local value back.

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use super::{
    SyncOptions, WritePolicy,
    presence::{HeartbeatTask, PresenceWatch},
    store::{LocalStore, StoreView},
};
use crate::{
    channel::{
        ChannelEvent, PublishRequest, RemoteSnapshot, Subscription, SyncChannel, SyncResult,
        UpdateSink,
    },
    error::SyncError,
    model::QuizState,
    mutation::Mutator,
    session::SessionId,
};

/// Handle used by a Primary or a Monitor to take part in one session at a time.
///
/// Cheap to clone; clones share the same store and subscription.
#[derive(Clone)]
pub struct Synchronizer {
    inner: Arc<Inner>,
}

struct Inner {
    channel: Arc<dyn SyncChannel>,
    options: SyncOptions,
    store: Arc<LocalStore>,
    /// Bumped on every join and leave; only the matching membership may touch `store`.
    generation: Arc<AtomicU64>,
    joined: Mutex<Option<Joined>>,
}

struct Joined {
    membership: Arc<Membership>,
    _subscription: Subscription,
    outgoing: mpsc::UnboundedSender<Outgoing>,
}

/// State owned by one join: its sink and publisher only ever see this session's revisions.
struct Membership {
    session_id: SessionId,
    generation: u64,
    current: Arc<AtomicU64>,
    store: Arc<LocalStore>,
    last_seen: Mutex<RemoteSnapshot>,
}

impl Membership {
    /// Whether the client is still joined through this membership.
    fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }

    fn revision(&self) -> u64 {
        lock(&self.last_seen).revision
    }
}

enum Outgoing {
    Publish {
        state: QuizState,
        mutator: Arc<dyn Mutator>,
    },
    Flush(oneshot::Sender<()>),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Synchronizer {
    /// Synchronizer publishing and subscribing through `channel`, not joined to any session.
    pub fn new(channel: Arc<dyn SyncChannel>, options: SyncOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                channel,
                options,
                store: Arc::new(LocalStore::new()),
                generation: Arc::new(AtomicU64::new(0)),
                joined: Mutex::new(None),
            }),
        }
    }

    /// Options this synchronizer was built with.
    pub fn options(&self) -> &SyncOptions {
        &self.inner.options
    }

    /// Session currently joined, if any.
    pub fn session_id(&self) -> Option<SessionId> {
        lock(&self.inner.joined)
            .as_ref()
            .map(|joined| joined.membership.session_id.clone())
    }

    /// Subscribe to `session_id`, leaving any previously joined session first.
    ///
    /// The view stays unloaded until the first snapshot arrives. A failed subscription leaves
    /// the view loaded with no state; retrying is up to the caller.
    pub async fn join(&self, session_id: SessionId) -> SyncResult<()> {
        self.leave();
        self.inner.store.mark_loading();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let membership = Arc::new(Membership {
            session_id: session_id.clone(),
            generation,
            current: self.inner.generation.clone(),
            store: self.inner.store.clone(),
            last_seen: Mutex::new(RemoteSnapshot::default()),
        });

        let subscription = match self
            .inner
            .channel
            .subscribe(&session_id, update_sink(membership.clone()))
            .await
        {
            Ok(subscription) => subscription,
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "failed to join session");
                if membership.is_current() {
                    self.inner.store.mark_failed();
                }
                return Err(err);
            }
        };

        let (outgoing, queue) = mpsc::unbounded_channel();
        tokio::spawn(publish_loop(
            self.inner.channel.clone(),
            self.inner.options.clone(),
            membership.clone(),
            queue,
        ));

        info!(session_id = %session_id, "joined session");
        *lock(&self.inner.joined) = Some(Joined {
            membership,
            _subscription: subscription,
            outgoing,
        });
        Ok(())
    }

    /// Start a new session with a fresh code and the initial state, then join it.
    ///
    /// The code is not checked for collisions; an existing session with the same code would
    /// be overwritten.
    pub async fn create_session(&self) -> SyncResult<SessionId> {
        let session_id = SessionId::generate();
        let initial = QuizState::new(session_id.clone());
        let ack = self
            .inner
            .channel
            .publish(&session_id, PublishRequest::replace(initial))
            .await?;
        debug!(session_id = %session_id, revision = ack.revision, "session created");
        self.join(session_id.clone()).await?;
        Ok(session_id)
    }

    /// Drop the subscription. Calling it again, or without a joined session, does nothing.
    ///
    /// Writes already queued are still published, but no longer reach the local view.
    pub fn leave(&self) {
        let previous = lock(&self.inner.joined).take();
        if let Some(joined) = previous {
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            info!(session_id = %joined.membership.session_id, "left session");
            drop(joined);
            self.inner.store.mark_loading();
        }
    }

    /// Apply `mutator` locally and publish the full result in the background.
    ///
    /// Returns the new local state, or `None` when no session state is loaded, in which case
    /// nothing is published.
    pub fn write(&self, mutator: impl Mutator + 'static) -> Option<QuizState> {
        let mutator: Arc<dyn Mutator> = Arc::new(mutator);
        let joined = lock(&self.inner.joined);
        let joined = joined.as_ref()?;

        let state = self.inner.store.write(mutator.as_ref())?;
        if joined
            .outgoing
            .send(Outgoing::Publish {
                state: state.clone(),
                mutator,
            })
            .is_err()
        {
            warn!(session_id = %joined.membership.session_id, "publisher stopped; write kept locally only");
        }
        Some(state)
    }

    /// Wait until every write issued so far was published (or failed).
    pub async fn flush(&self) {
        let (done, waiter) = oneshot::channel();
        let sent = lock(&self.inner.joined)
            .as_ref()
            .is_some_and(|joined| joined.outgoing.send(Outgoing::Flush(done)).is_ok());
        if sent {
            let _ = waiter.await;
        }
    }

    /// Current local view, without waiting.
    pub fn read(&self) -> StoreView {
        self.inner.store.read()
    }

    /// Receiver notified on every change of the local view.
    pub fn watch(&self) -> watch::Receiver<StoreView> {
        self.inner.store.subscribe()
    }

    /// Resolve once the first snapshot (or the not-found outcome) is in.
    pub async fn loaded(&self) -> StoreView {
        let mut rx = self.watch();
        match rx.wait_for(|view| view.is_loaded).await {
            Ok(view) => view.clone(),
            Err(_) => self.read(),
        }
    }

    /// Revision of the latest snapshot seen from the joined session, 0 when not joined.
    pub fn revision(&self) -> u64 {
        lock(&self.inner.joined)
            .as_ref()
            .map_or(0, |joined| joined.membership.revision())
    }

    /// Stamp this client's heartbeat at the configured interval. Requires a joined session.
    pub fn start_heartbeat(&self) -> SyncResult<HeartbeatTask> {
        if self.session_id().is_none() {
            return Err(SyncError::NotJoined);
        }
        Ok(HeartbeatTask::start(
            self.clone(),
            self.inner.options.heartbeat_interval,
        ))
    }

    /// Track whether some Monitor heartbeat is fresh.
    pub fn presence(&self) -> PresenceWatch {
        PresenceWatch::start(self.watch(), self.inner.options.staleness_window)
    }
}

fn update_sink(membership: Arc<Membership>) -> UpdateSink {
    Arc::new(move |event| {
        if !membership.is_current() {
            return;
        }
        let session_id = &membership.session_id;
        let store = &membership.store;
        match event {
            ChannelEvent::Snapshot(snapshot) => {
                {
                    let mut seen = lock(&membership.last_seen);
                    if snapshot.revision < seen.revision {
                        debug!(session_id = %session_id, revision = snapshot.revision, "ignoring stale snapshot");
                        return;
                    }
                    *seen = snapshot.clone();
                }
                if store.adopt_remote(snapshot.state) {
                    debug!(session_id = %session_id, revision = snapshot.revision, "adopted remote snapshot");
                }
            }
            ChannelEvent::Closed { reason } => {
                if store.read().is_loaded {
                    warn!(session_id = %session_id, %reason, "session channel closed; keeping last state");
                } else {
                    warn!(session_id = %session_id, %reason, "session channel closed before first snapshot");
                    store.mark_failed();
                }
            }
        }
    })
}

async fn publish_loop(
    channel: Arc<dyn SyncChannel>,
    options: SyncOptions,
    membership: Arc<Membership>,
    mut queue: mpsc::UnboundedReceiver<Outgoing>,
) {
    while let Some(outgoing) = queue.recv().await {
        match outgoing {
            Outgoing::Publish { state, mutator } => match options.write_policy {
                WritePolicy::Replace => publish_replace(channel.as_ref(), &membership, state).await,
                WritePolicy::Versioned => {
                    publish_versioned(
                        channel.as_ref(),
                        &options,
                        &membership,
                        state,
                        mutator.as_ref(),
                    )
                    .await
                }
            },
            Outgoing::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!(session_id = %membership.session_id, "publisher drained");
}

async fn publish_replace(channel: &dyn SyncChannel, membership: &Membership, state: QuizState) {
    let session_id = &membership.session_id;
    match channel
        .publish(session_id, PublishRequest::replace(state.clone()))
        .await
    {
        Ok(ack) => record_ack(membership, ack.revision, state),
        Err(err) => {
            warn!(session_id = %session_id, error = %err, "publish failed; local state kept")
        }
    }
}

/// Publish the write on top of the latest known remote value; on conflict adopt the newer
/// remote value and apply the same mutator again.
async fn publish_versioned(
    channel: &dyn SyncChannel,
    options: &SyncOptions,
    membership: &Membership,
    optimistic: QuizState,
    mutator: &dyn Mutator,
) {
    let session_id = &membership.session_id;
    let (mut expected, mut candidate) = {
        let seen = lock(&membership.last_seen);
        let candidate = match seen.state.as_ref() {
            Some(base) => mutator.apply(base),
            None => optimistic,
        };
        (seen.revision, candidate)
    };

    let mut attempts = 0;
    loop {
        let request = PublishRequest::versioned(candidate.clone(), expected);
        match channel.publish(session_id, request).await {
            Ok(ack) => {
                record_ack(membership, ack.revision, candidate);
                return;
            }
            Err(SyncError::Conflict { current, .. }) if attempts < options.max_rebase_attempts => {
                attempts += 1;
                debug!(
                    session_id = %session_id,
                    attempt = attempts,
                    revision = current.revision,
                    "rebasing write on newer revision"
                );
                let Some(base) = current.state.as_ref() else {
                    warn!(session_id = %session_id, "session vanished while rebasing; write dropped");
                    return;
                };
                candidate = mutator.apply(base);
                expected = current.revision;
                if membership.is_current() {
                    membership.store.adopt_remote(Some(candidate.clone()));
                }
                let mut seen = lock(&membership.last_seen);
                if current.revision >= seen.revision {
                    *seen = *current;
                }
            }
            Err(err) => {
                warn!(
                    session_id = %session_id,
                    attempts,
                    error = %err,
                    "versioned publish failed; local state kept"
                );
                return;
            }
        }
    }
}

fn record_ack(membership: &Membership, revision: u64, state: QuizState) {
    let mut seen = lock(&membership.last_seen);
    if revision > seen.revision {
        *seen = RemoteSnapshot {
            revision,
            state: Some(state),
        };
    }
}
