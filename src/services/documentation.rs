use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification of the quizpoint relay.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sessions::create_session,
        crate::routes::sessions::get_session,
        crate::routes::sessions::publish,
        crate::routes::sse::session_stream,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::ws::SubscriberInboundMessage,
            crate::dto::ws::SubscriberOutboundMessage,
            crate::channel::RemoteSnapshot,
            crate::channel::PublishRequest,
            crate::channel::PublishAck,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sessions", description = "Session snapshots and publishing"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "subscribers", description = "WebSocket snapshot subscriptions"),
    )
)]
/// OpenAPI document of the relay.
pub struct ApiDoc;
