//! quizpoint relay entrypoint wiring REST, WebSocket, SSE and the session store.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use quizpoint_sync::{
    config::AppConfig,
    dao::{
        session_store::{MemorySessionStore, SessionStore},
        storage::StorageError,
    },
    routes,
    services::storage_supervisor,
    state::{AppState, SharedState},
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let app_state = AppState::with_config(AppConfig::load());
    spawn_storage(app_state.clone());

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting relay");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Start the storage supervisor on CouchDB when `COUCH_*` is configured, in memory otherwise.
fn spawn_storage(state: SharedState) {
    #[cfg(feature = "couch-store")]
    {
        use quizpoint_sync::dao::session_store::couchdb::{CouchConfig, CouchSessionStore};

        match CouchConfig::from_env() {
            Ok(Some(config)) => {
                info!(base_url = %config.base_url, database = %config.database, "using CouchDB session store");
                tokio::spawn(storage_supervisor::run(state, move || {
                    let config = config.clone();
                    async move {
                        let store = CouchSessionStore::connect(config).await?;
                        Ok::<Arc<dyn SessionStore>, StorageError>(Arc::new(store))
                    }
                }));
                return;
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, "ignoring CouchDB settings; sessions are kept in memory"),
        }
    }

    info!("no database configured; sessions are kept in memory");
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    tokio::spawn(storage_supervisor::run(state, move || {
        let store = store.clone();
        async move { Ok::<_, StorageError>(store) }
    }));
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
