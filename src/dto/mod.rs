/// Health check payloads.
pub mod health;
/// Session route parameters.
pub mod sessions;
/// Server-Sent Events payloads.
pub mod sse;
/// WebSocket subscriber messages.
pub mod ws;
