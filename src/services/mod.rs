/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Session lifecycle: creation, lookup, publishing and live feeds.
pub mod session_service;
/// Server-Sent Events streaming of session snapshots.
pub mod sse_service;
/// Storage connection supervisor toggling degraded mode.
pub mod storage_supervisor;
/// WebSocket subscriber handling.
pub mod websocket_service;
