use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{session_store::SessionStore, storage::StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

fn next_delay(delay: Duration) -> Duration {
    (delay * 2).min(MAX_DELAY)
}

/// Connect the session store, then keep polling its health. The relay stays degraded (and
/// refuses reads and writes) for as long as no healthy store is installed.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn SessionStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        let store = match connect().await {
            Ok(store) => store,
            Err(err) => {
                warn!(error = %err, retry_in = ?delay, "session store connection attempt failed");
                sleep(delay).await;
                delay = next_delay(delay);
                continue;
            }
        };

        state.set_session_store(store.clone()).await;
        info!("session store connected; leaving degraded mode");
        delay = INITIAL_DELAY;

        supervise(&state, store.as_ref()).await;

        warn!("dropping session store after failed reconnects");
        state.clear_session_store().await;
        sleep(delay).await;
        delay = next_delay(delay);
    }
}

/// Poll the installed store until it stays unhealthy through every reconnect attempt.
async fn supervise(state: &SharedState, store: &dyn SessionStore) {
    loop {
        match store.health_check().await {
            Ok(()) => {
                if state.is_degraded() {
                    info!("session store healthy again; leaving degraded mode");
                    state.update_degraded(false);
                }
            }
            Err(err) => {
                warn!(error = %err, "session store health check failed; entering degraded mode");
                state.update_degraded(true);
                if !reconnect(store).await {
                    return;
                }
                info!("session store reconnected");
                state.update_degraded(false);
            }
        }
        sleep(HEALTH_POLL_INTERVAL).await;
    }
}

async fn reconnect(store: &dyn SessionStore) -> bool {
    let mut delay = INITIAL_DELAY;
    for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => return true,
            Err(err) => {
                warn!(attempt, error = %err, "session store reconnect attempt failed");
                sleep(delay).await;
                delay = next_delay(delay);
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use futures::future::BoxFuture;

    use super::*;
    use crate::{
        channel::RemoteSnapshot, dao::session_store::MemorySessionStore, model::QuizState,
        session::SessionId, state::AppState,
    };

    /// Memory store whose health can be switched off.
    struct FlakyStore {
        inner: MemorySessionStore,
        healthy: Arc<AtomicBool>,
    }

    impl FlakyStore {
        fn status(&self) -> BoxFuture<'static, Result<(), StorageError>> {
            let healthy = self.healthy.load(Ordering::SeqCst);
            Box::pin(async move {
                if healthy {
                    Ok(())
                } else {
                    Err(StorageError::unavailable(
                        "database offline".into(),
                        std::io::Error::other("offline"),
                    ))
                }
            })
        }
    }

    impl SessionStore for FlakyStore {
        fn load(
            &self,
            id: &SessionId,
        ) -> BoxFuture<'static, Result<Option<RemoteSnapshot>, StorageError>> {
            self.inner.load(id)
        }

        fn save(
            &self,
            id: &SessionId,
            state: QuizState,
            expected_revision: Option<u64>,
        ) -> BoxFuture<'static, Result<RemoteSnapshot, StorageError>> {
            self.inner.save(id, state, expected_revision)
        }

        fn health_check(&self) -> BoxFuture<'static, Result<(), StorageError>> {
            self.status()
        }

        fn try_reconnect(&self) -> BoxFuture<'static, Result<(), StorageError>> {
            self.status()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn toggles_degraded_mode_with_store_health() {
        let state = AppState::new();
        let healthy = Arc::new(AtomicBool::new(true));
        let store: Arc<dyn SessionStore> = Arc::new(FlakyStore {
            inner: MemorySessionStore::new(),
            healthy: healthy.clone(),
        });

        let mut degraded = state.degraded_watcher();
        tokio::spawn(run(state.clone(), move || {
            let store = store.clone();
            async move { Ok(store) }
        }));

        degraded.wait_for(|degraded| !*degraded).await.unwrap();

        healthy.store(false, Ordering::SeqCst);
        degraded.wait_for(|degraded| *degraded).await.unwrap();
        assert!(state.require_session_store().await.is_err());

        healthy.store(true, Ordering::SeqCst);
        degraded.wait_for(|degraded| !*degraded).await.unwrap();
        assert!(state.require_session_store().await.is_ok());
    }
}
