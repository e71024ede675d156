use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
    channel::{PublishAck, PublishRequest, RemoteSnapshot},
    error::ServiceError,
    model::QuizState,
    session::SessionId,
    state::SharedState,
};

/// Codes tried before giving up on finding an unused one.
const MAX_CREATE_ATTEMPTS: usize = 5;

/// Create a session under a fresh code, holding the initial state.
pub async fn create_session(state: &SharedState) -> Result<RemoteSnapshot, ServiceError> {
    let store = state.require_session_store().await?;

    for attempt in 1..=MAX_CREATE_ATTEMPTS {
        let id = SessionId::generate();
        match store.save(&id, QuizState::new(id.clone()), Some(0)).await {
            Ok(snapshot) => {
                info!(session_id = %id, attempt, "session created");
                state.sessions().advance(&id, snapshot.clone());
                return Ok(snapshot);
            }
            Err(err) => match ServiceError::from(err) {
                ServiceError::StaleRevision(_) => {
                    warn!(session_id = %id, attempt, "session code already taken; retrying");
                }
                other => return Err(other),
            },
        }
    }

    Err(ServiceError::CodesExhausted)
}

/// Latest snapshot of `id`.
pub async fn get_session(
    state: &SharedState,
    id: &SessionId,
) -> Result<RemoteSnapshot, ServiceError> {
    if let Some(snapshot) = state.sessions().latest(id) {
        return Ok(snapshot);
    }

    let store = state.require_session_store().await?;
    store
        .load(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("session `{id}`")))
}

/// Store a full snapshot of `id` and push it to every subscriber.
pub async fn publish(
    state: &SharedState,
    id: &SessionId,
    request: PublishRequest,
) -> Result<PublishAck, ServiceError> {
    if request.state.id != *id {
        return Err(ServiceError::InvalidInput(format!(
            "state id `{}` does not match session `{id}`",
            request.state.id
        )));
    }

    let store = state.require_session_store().await?;
    let snapshot = store
        .save(id, request.state, request.expected_revision)
        .await?;
    let revision = snapshot.revision;
    state.sessions().advance(id, snapshot);
    Ok(PublishAck { revision })
}

/// Receiver of the snapshots of `id`, already holding the latest stored value.
///
/// An unknown session yields an empty snapshot (`revision` 0, no state), which subscribers
/// read as "not found" while still receiving the first write.
pub async fn watch_session(
    state: &SharedState,
    id: &SessionId,
) -> Result<watch::Receiver<RemoteSnapshot>, ServiceError> {
    let receiver = state.sessions().subscribe(id);
    if state.sessions().latest(id).is_none() {
        let store = state.require_session_store().await?;
        if let Some(stored) = store.load(id).await? {
            state.sessions().advance(id, stored);
        }
    }
    Ok(receiver)
}

/// Drop the feed of `id` once its last subscriber is gone.
pub fn release(state: &SharedState, id: &SessionId) {
    state.sessions().release(id);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{dao::session_store::MemorySessionStore, state::AppState};

    async fn relay_state() -> SharedState {
        let state = AppState::new();
        state
            .set_session_store(Arc::new(MemorySessionStore::new()))
            .await;
        state
    }

    #[tokio::test]
    async fn degraded_relay_refuses_writes() {
        let state = AppState::new();
        let err = create_session(&state).await.unwrap_err();
        assert!(matches!(err, ServiceError::Degraded));
    }

    #[tokio::test]
    async fn publish_rejects_mismatched_state_id() {
        let state = relay_state().await;
        let created = create_session(&state).await.unwrap();
        let id = created.state.unwrap().id;

        let other = SessionId::validate("111111").unwrap();
        let err = publish(&state, &id, PublishRequest::replace(QuizState::new(other)))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn subscribers_see_latest_and_following_writes() {
        let state = relay_state().await;
        let created = create_session(&state).await.unwrap();
        let id = created.state.clone().unwrap().id;

        let mut rx = watch_session(&state, &id).await.unwrap();
        assert_eq!(rx.borrow_and_update().revision, 1);

        let mut next = created.state.unwrap();
        next.num_teams = 2;
        let ack = publish(&state, &id, PublishRequest::versioned(next, 1))
            .await
            .unwrap();
        assert_eq!(ack.revision, 2);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().state.as_ref().unwrap().num_teams, 2);

        let stale = publish(
            &state,
            &id,
            PublishRequest::versioned(QuizState::new(id.clone()), 1),
        )
        .await
        .unwrap_err();
        assert!(matches!(stale, ServiceError::StaleRevision(ref current) if current.revision == 2));
    }

    #[tokio::test]
    async fn unknown_session_is_not_found_but_watchable() {
        let state = relay_state().await;
        let id = SessionId::validate("999999").unwrap();
        assert!(matches!(
            get_session(&state, &id).await,
            Err(ServiceError::NotFound(_))
        ));

        let rx = watch_session(&state, &id).await.unwrap();
        assert_eq!(*rx.borrow(), RemoteSnapshot::default());
    }
}
