use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use validator::Validate;

use crate::{
    channel::{PublishAck, PublishRequest, RemoteSnapshot},
    dto::sessions::SessionPath,
    error::AppError,
    services::session_service,
    session::SessionId,
    state::SharedState,
};

/// Validate the path parameter and turn it into a session id.
pub(crate) fn session_id(path: SessionPath) -> Result<SessionId, AppError> {
    path.validate()?;
    SessionId::validate(&path.id).ok_or_else(|| AppError::BadRequest("empty session code".into()))
}

#[utoipa::path(
    post,
    path = "/sessions",
    tag = "sessions",
    responses(
        (status = 201, description = "Session created with its initial state", body = RemoteSnapshot),
        (status = 503, description = "Storage unavailable"),
    )
)]
/// Create a session under a fresh six-digit code.
pub async fn create_session(
    State(state): State<SharedState>,
) -> Result<(StatusCode, Json<RemoteSnapshot>), AppError> {
    let snapshot = session_service::create_session(&state).await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

#[utoipa::path(
    get,
    path = "/sessions/{id}",
    tag = "sessions",
    params(SessionPath),
    responses(
        (status = 200, description = "Latest snapshot of the session", body = RemoteSnapshot),
        (status = 404, description = "Unknown session"),
        (status = 503, description = "Storage unavailable"),
    )
)]
/// Read the latest snapshot of a session.
pub async fn get_session(
    State(state): State<SharedState>,
    Path(path): Path<SessionPath>,
) -> Result<Json<RemoteSnapshot>, AppError> {
    let id = session_id(path)?;
    let snapshot = session_service::get_session(&state, &id).await?;
    Ok(Json(snapshot))
}

#[utoipa::path(
    put,
    path = "/sessions/{id}",
    tag = "sessions",
    params(SessionPath),
    request_body = PublishRequest,
    responses(
        (status = 200, description = "Write accepted", body = PublishAck),
        (status = 400, description = "Invalid code or state id mismatch"),
        (status = 409, description = "Expected revision is stale; body is the current snapshot", body = RemoteSnapshot),
        (status = 503, description = "Storage unavailable"),
    )
)]
/// Replace the state of a session and push it to every subscriber.
pub async fn publish(
    State(state): State<SharedState>,
    Path(path): Path<SessionPath>,
    Json(request): Json<PublishRequest>,
) -> Result<Json<PublishAck>, AppError> {
    let id = session_id(path)?;
    let ack = session_service::publish(&state, &id, request).await?;
    Ok(Json(ack))
}

/// Configure the session REST endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", get(get_session).put(publish))
}
