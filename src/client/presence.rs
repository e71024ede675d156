//! Heartbeat-based presence: Monitors stamp `heartbeat`, the Primary checks its freshness.

use std::time::Duration;

use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info};

use super::{now_millis, store::StoreView, sync::Synchronizer};
use crate::mutation::Mutation;

const MAX_REEVALUATE_PERIOD: Duration = Duration::from_secs(1);
const MIN_REEVALUATE_PERIOD: Duration = Duration::from_millis(10);

/// Aggregate liveness of the Monitors of a session, as seen by the Primary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PresenceStatus {
    /// No fresh heartbeat.
    #[default]
    Disconnected,
    /// Some Monitor stamped its heartbeat within the staleness window.
    Connected,
}

/// Pure presence state machine.
#[derive(Debug, Clone)]
pub struct PresenceMonitor {
    status: PresenceStatus,
    window_ms: i64,
}

impl PresenceMonitor {
    /// Disconnected monitor counting heartbeats younger than `window` as fresh.
    pub fn new(window: Duration) -> Self {
        Self {
            status: PresenceStatus::Disconnected,
            window_ms: i64::try_from(window.as_millis()).unwrap_or(i64::MAX),
        }
    }

    /// Status computed by the last evaluation.
    pub fn status(&self) -> PresenceStatus {
        self.status
    }

    /// Re-evaluate against the latest heartbeat. A heartbeat from the future does not count.
    pub fn evaluate(&mut self, heartbeat: Option<i64>, now_ms: i64) -> PresenceStatus {
        let fresh = heartbeat.is_some_and(|at| {
            let age = now_ms.saturating_sub(at);
            (0..self.window_ms).contains(&age)
        });
        self.status = if fresh {
            PresenceStatus::Connected
        } else {
            PresenceStatus::Disconnected
        };
        self.status
    }
}

/// Primary-side task re-evaluating presence on every store change and periodically, so a
/// heartbeat that simply stops still flips the status to disconnected.
pub struct PresenceWatch {
    status: watch::Receiver<PresenceStatus>,
    task: JoinHandle<()>,
}

impl PresenceWatch {
    /// Watch `view` against the wall clock.
    pub fn start(view: watch::Receiver<StoreView>, window: Duration) -> Self {
        Self::with_clock(view, window, now_millis)
    }

    /// Same as [`PresenceWatch::start`] with an explicit clock in epoch milliseconds.
    pub fn with_clock(
        mut view: watch::Receiver<StoreView>,
        window: Duration,
        clock: impl Fn() -> i64 + Send + 'static,
    ) -> Self {
        let (status_tx, status) = watch::channel(PresenceStatus::Disconnected);
        let period = (window / 4).clamp(MIN_REEVALUATE_PERIOD, MAX_REEVALUATE_PERIOD);

        let task = tokio::spawn(async move {
            let mut monitor = PresenceMonitor::new(window);
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    changed = view.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {}
                }

                let heartbeat = view
                    .borrow_and_update()
                    .state
                    .as_ref()
                    .and_then(|state| state.heartbeat);
                let next = monitor.evaluate(heartbeat, clock());
                status_tx.send_if_modified(|current| {
                    if *current == next {
                        return false;
                    }
                    info!(status = ?next, "monitor presence changed");
                    *current = next;
                    true
                });
            }
            debug!("presence watch stopped");
        });

        Self { status, task }
    }

    /// Current presence.
    pub fn status(&self) -> PresenceStatus {
        *self.status.borrow()
    }

    /// Receiver notified on every presence transition.
    pub fn subscribe(&self) -> watch::Receiver<PresenceStatus> {
        self.status.clone()
    }
}

impl Drop for PresenceWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Monitor-side repeating heartbeat writer, alive for as long as the display is shown.
pub struct HeartbeatTask {
    task: Option<JoinHandle<()>>,
}

impl HeartbeatTask {
    pub(crate) fn start(sync: Synchronizer, interval: Duration) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(MIN_REEVALUATE_PERIOD));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let at = now_millis();
                if sync.write(Mutation::Heartbeat(at)).is_none() {
                    debug!("no session state loaded; heartbeat skipped");
                }
            }
        });
        Self { task: Some(task) }
    }

    /// Stop stamping. Safe to call more than once.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Whether heartbeats are still being written.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for HeartbeatTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    };

    use super::*;
    use crate::{
        channel::LocalChannel,
        client::{LocalStore, SyncOptions},
        model::QuizState,
        session::SessionId,
    };

    const WINDOW: Duration = Duration::from_secs(10);

    #[test]
    fn starts_disconnected_and_follows_heartbeat_age() {
        let mut monitor = PresenceMonitor::new(WINDOW);
        assert_eq!(monitor.status(), PresenceStatus::Disconnected);
        assert_eq!(monitor.evaluate(None, 50_000), PresenceStatus::Disconnected);
        assert_eq!(monitor.evaluate(Some(45_000), 50_000), PresenceStatus::Connected);
        assert_eq!(monitor.evaluate(Some(40_001), 50_000), PresenceStatus::Connected);
        assert_eq!(monitor.evaluate(Some(40_000), 50_000), PresenceStatus::Disconnected);
        assert_eq!(monitor.evaluate(Some(60_000), 50_000), PresenceStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_heartbeat_flips_to_disconnected_without_new_writes() {
        let store = LocalStore::new();
        let mut state = QuizState::new(SessionId::validate("482913").unwrap());
        state.heartbeat = Some(1_000);
        store.seed(state);

        let now = Arc::new(AtomicI64::new(1_500));
        let clock = now.clone();
        let watch = PresenceWatch::with_clock(store.subscribe(), WINDOW, move || {
            clock.load(Ordering::SeqCst)
        });
        let mut status = watch.subscribe();

        status
            .wait_for(|status| *status == PresenceStatus::Connected)
            .await
            .unwrap();

        now.store(11_000, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(2)).await;
        status
            .wait_for(|status| *status == PresenceStatus::Disconnected)
            .await
            .unwrap();
        assert_eq!(watch.status(), PresenceStatus::Disconnected);
    }

    #[tokio::test]
    async fn heartbeat_task_stamps_until_stopped() {
        let channel = Arc::new(LocalChannel::new());
        let options = SyncOptions {
            heartbeat_interval: Duration::from_millis(20),
            ..SyncOptions::default()
        };
        let primary = Synchronizer::new(channel.clone(), options.clone());
        let id = primary.create_session().await.unwrap();

        let monitor = Synchronizer::new(channel.clone(), options);
        monitor.join(id.clone()).await.unwrap();
        monitor.loaded().await;

        let mut heartbeat = monitor.start_heartbeat().unwrap();
        assert!(heartbeat.is_running());

        let presence = primary.presence();
        let mut status = presence.subscribe();
        tokio::time::timeout(
            Duration::from_secs(1),
            status.wait_for(|status| *status == PresenceStatus::Connected),
        )
        .await
        .unwrap()
        .unwrap();

        heartbeat.stop();
        heartbeat.stop();
        assert!(!heartbeat.is_running());
        monitor.flush().await;
        let last = channel.latest(&id).unwrap().revision;
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(channel.latest(&id).unwrap().revision, last);
    }
}
