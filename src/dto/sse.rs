use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::state_machine::CompetitionStatus;

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    /// Optional SSE event type.
    pub event: Option<String>,
    /// Serialised data field.
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// First event sent to a room subscriber.
pub struct Handshake {
    /// Room joined.
    pub competition_id: Uuid,
    /// Status at subscription time.
    pub status: CompetitionStatus,
    /// Whether the backend is running without a storage backend connection.
    pub degraded: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Sent when a subscriber fell behind and missed events; it must re-fetch.
pub struct ResyncEvent {
    /// Number of events dropped for this subscriber.
    pub missed: u64,
}
