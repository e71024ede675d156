use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{channel::RemoteSnapshot, session::SessionId};

#[derive(Debug, Deserialize, Serialize, ToSchema)]
/// Messages accepted from subscriber WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubscriberInboundMessage {
    /// Must be the first frame: selects the session whose snapshots are pushed.
    Subscribe {
        /// Session to follow.
        session_id: SessionId,
    },
    /// Any other message type; ignored.
    #[serde(other)]
    Unknown,
}

impl SubscriberInboundMessage {
    /// Parse one text frame.
    pub fn from_json_str(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
/// Messages pushed to subscriber WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubscriberOutboundMessage {
    /// Current value of the session; replayed right after subscribing, then sent on every write.
    Snapshot {
        /// Session the snapshot belongs to.
        session_id: SessionId,
        /// Latest stored value.
        snapshot: RemoteSnapshot,
    },
    /// The relay could not serve the subscription; the socket is closed afterwards.
    Error {
        /// Reason shown to the client.
        message: String,
    },
}
