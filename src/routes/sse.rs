use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;

use crate::{
    dto::sessions::SessionPath,
    error::AppError,
    routes::sessions::session_id,
    services::{session_service, sse_service},
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/sse/sessions/{id}",
    tag = "sse",
    params(SessionPath),
    responses(
        (status = 200, description = "Stream of `snapshot` events", content_type = "text/event-stream", body = String),
        (status = 503, description = "Storage unavailable"),
    )
)]
/// Stream the snapshots of one session to read-only displays.
pub async fn session_stream(
    State(state): State<SharedState>,
    Path(path): Path<SessionPath>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let id = session_id(path)?;
    let feed = session_service::watch_session(&state, &id).await?;
    info!(session_id = %id, "new session SSE connection");
    Ok(sse_service::to_sse_stream(state, id, feed))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/sse/sessions/{id}", get(session_stream))
}
