use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::state_machine::CompetitionStatus;

#[derive(Debug, Deserialize, Serialize, ToSchema)]
/// Messages accepted from room WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomInboundMessage {
    /// Must be the first message: subscribe to a competition room.
    JoinRoom {
        /// Room to join.
        competition_id: Uuid,
        /// Acting user, needed to post chat.
        #[serde(default)]
        user: Option<String>,
    },
    /// Post a chat line in the joined room.
    Chat {
        /// Message body.
        message: String,
    },
    /// Anything else; ignored.
    #[serde(other)]
    Unknown,
}

impl RoomInboundMessage {
    /// Parse a text frame.
    pub fn from_json_str(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
/// Control messages sent to room WebSocket clients besides room events.
pub enum RoomOutboundMessage {
    /// Acknowledges `join_room`.
    Joined {
        /// Room joined.
        competition_id: Uuid,
        /// Status at join time.
        status: CompetitionStatus,
    },
    /// The subscriber fell behind; re-fetch the competition.
    Resync {
        /// Events dropped.
        missed: u64,
    },
    /// A request over the socket failed.
    Error {
        /// Stable code.
        code: String,
        /// Human-readable message.
        message: String,
    },
}
