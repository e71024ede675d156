//! Shared-state synchronization for live quiz scoring, plus the relay serving it over the
//! network. Exposes modules for the binaries and integration tests.

pub mod channel;
pub mod client;
pub mod config;
/// Relay storage backends.
pub mod dao;
/// Wire payloads of the relay endpoints.
pub mod dto;
/// Error types of the client layer and the relay.
pub mod error;
pub mod export;
pub mod model;
pub mod mutation;
/// HTTP, WebSocket and SSE routes of the relay.
pub mod routes;
/// Relay business logic.
pub mod services;
pub mod session;
/// Shared relay state.
pub mod state;
