//! End-to-end scenarios: a real relay on a loopback port driven by the client library.

use std::{sync::Arc, time::Duration};

use quizpoint_sync::{
    channel::{RelayChannel, SyncChannel},
    client::{PresenceStatus, StoreView, SyncOptions, Synchronizer, WritePolicy},
    dao::session_store::MemorySessionStore,
    mutation::{Mutation, SettingsPatch},
    routes,
    session::SessionId,
    state::AppState,
};
use tokio::net::TcpListener;

async fn spawn_relay() -> String {
    let state = AppState::new();
    state
        .set_session_store(Arc::new(MemorySessionStore::new()))
        .await;
    let app = routes::router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    format!("http://{addr}")
}

fn client(base_url: &str, options: SyncOptions) -> Synchronizer {
    let channel: Arc<dyn SyncChannel> = Arc::new(RelayChannel::new(base_url).unwrap());
    Synchronizer::new(channel, options)
}

async fn settle(sync: &Synchronizer, check: impl Fn(&StoreView) -> bool) -> StoreView {
    let mut rx = sync.watch();
    tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|view| check(view)))
        .await
        .expect("view did not converge within a second")
        .unwrap()
        .clone()
}

fn short_presence() -> SyncOptions {
    SyncOptions {
        heartbeat_interval: Duration::from_millis(50),
        staleness_window: Duration::from_millis(400),
        ..SyncOptions::default()
    }
}

#[tokio::test]
async fn primary_and_monitor_stay_in_sync_over_the_relay() {
    let relay = spawn_relay().await;
    let primary = client(&relay, short_presence());
    let monitor = client(&relay, short_presence());

    let id = primary.create_session().await.unwrap();
    assert!(id.is_canonical());

    monitor.join(id.clone()).await.unwrap();
    let view = monitor.loaded().await;
    assert_eq!(view.state.as_ref().unwrap().num_teams, 0);

    primary.write(Mutation::set_num_teams(2).unwrap()).unwrap();
    settle(&monitor, |view| {
        view.state.as_ref().is_some_and(|state| state.num_teams == 2)
    })
    .await;

    let presence = primary.presence();
    let mut status = presence.subscribe();
    assert_eq!(*status.borrow(), PresenceStatus::Disconnected);

    let mut heartbeat = monitor.start_heartbeat().unwrap();
    tokio::time::timeout(
        Duration::from_secs(2),
        status.wait_for(|status| *status == PresenceStatus::Connected),
    )
    .await
    .unwrap()
    .unwrap();

    heartbeat.stop();
    tokio::time::timeout(
        Duration::from_secs(2),
        status.wait_for(|status| *status == PresenceStatus::Disconnected),
    )
    .await
    .unwrap()
    .unwrap();
}

#[tokio::test]
async fn unknown_session_loads_without_state_then_follows_first_write() {
    let relay = spawn_relay().await;
    let monitor = client(&relay, SyncOptions::default());
    let id = SessionId::validate("654321").unwrap();

    monitor.join(id.clone()).await.unwrap();
    let view = monitor.loaded().await;
    assert!(view.state.is_none());

    let channel = RelayChannel::new(&relay).unwrap();
    let mut state = quizpoint_sync::model::QuizState::new(id.clone());
    state.quiz_title = "Late start".into();
    channel
        .publish(&id, quizpoint_sync::channel::PublishRequest::replace(state))
        .await
        .unwrap();

    let view = settle(&monitor, |view| view.state.is_some()).await;
    assert_eq!(view.state.unwrap().quiz_title, "Late start");
}

#[tokio::test]
async fn late_joiner_receives_latest_value_without_new_writes() {
    let relay = spawn_relay().await;
    let primary = client(&relay, SyncOptions::default());
    let id = primary.create_session().await.unwrap();
    primary.write(Mutation::set_num_teams(4).unwrap()).unwrap();
    primary.flush().await;

    let late = client(&relay, SyncOptions::default());
    late.join(id).await.unwrap();
    let view = late.loaded().await;
    assert_eq!(view.state.unwrap().num_teams, 4);
}

#[tokio::test]
async fn leave_is_idempotent_and_silences_updates() {
    let relay = spawn_relay().await;
    let primary = client(&relay, SyncOptions::default());
    let monitor = client(&relay, SyncOptions::default());
    let id = primary.create_session().await.unwrap();
    monitor.join(id).await.unwrap();
    monitor.loaded().await;

    monitor.leave();
    monitor.leave();

    primary.write(Mutation::set_num_teams(3).unwrap()).unwrap();
    primary.flush().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(monitor.read().state.is_none());
}

fn retitle(title: &str) -> Mutation {
    Mutation::update_setting(SettingsPatch {
        quiz_title: Some(title.into()),
        ..SettingsPatch::default()
    })
}

async fn race(policy: WritePolicy) -> quizpoint_sync::model::QuizState {
    let relay = spawn_relay().await;
    let options = SyncOptions {
        write_policy: policy,
        ..SyncOptions::default()
    };
    let primary = client(&relay, options.clone());
    let second = client(&relay, options);
    let id = primary.create_session().await.unwrap();
    second.join(id.clone()).await.unwrap();
    primary.loaded().await;
    second.loaded().await;

    primary.write(Mutation::set_num_teams(3).unwrap()).unwrap();
    second.write(retitle("Derby night")).unwrap();
    primary.flush().await;
    second.flush().await;

    RelayChannel::new(&relay)
        .unwrap()
        .fetch(&id)
        .await
        .unwrap()
        .state
        .unwrap()
}

#[tokio::test]
async fn replace_policy_keeps_exactly_one_of_two_concurrent_writes() {
    let stored = race(WritePolicy::Replace).await;
    let kept_teams = stored.num_teams == 3;
    let kept_title = stored.quiz_title == "Derby night";
    assert!(kept_teams != kept_title, "unexpected merge: {stored:?}");
}

#[tokio::test]
async fn versioned_policy_keeps_both_concurrent_writes() {
    let stored = race(WritePolicy::Versioned).await;
    assert_eq!(stored.num_teams, 3);
    assert_eq!(stored.quiz_title, "Derby night");
}
