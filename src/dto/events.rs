//! Events pushed to every subscriber of a competition room.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::{dto::sse::ServerEvent, state::state_machine::EndTrigger};

/// Discrete named event of a competition room.
///
/// Serialised as `{"event": "<name>", "data": {...}}` on the WebSocket; on SSE the
/// name becomes the event type and `data` the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum RoomEvent {
    /// A user took a seat.
    ParticipantJoined(ParticipantJoinedEvent),
    /// A participant walked away.
    ParticipantLeft(ParticipantLeftEvent),
    /// The competition became active; clocks start now.
    CompetitionStarted(CompetitionStartedEvent),
    /// A participant's counted score changed.
    SubmissionUpdate(SubmissionUpdateEvent),
    /// The competition completed; the winner is final.
    CompetitionEnded(CompetitionEndedEvent),
    /// The creator deleted the competition.
    CompetitionCancelled(CompetitionCancelledEvent),
    /// New chat line.
    ChatMessage(ChatMessageEvent),
}

impl RoomEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            RoomEvent::ParticipantJoined(_) => "participantJoined",
            RoomEvent::ParticipantLeft(_) => "participantLeft",
            RoomEvent::CompetitionStarted(_) => "competitionStarted",
            RoomEvent::SubmissionUpdate(_) => "submissionUpdate",
            RoomEvent::CompetitionEnded(_) => "competitionEnded",
            RoomEvent::CompetitionCancelled(_) => "competitionCancelled",
            RoomEvent::ChatMessage(_) => "chatMessage",
        }
    }

    /// Rebuild an event from its SSE name and JSON data.
    pub fn from_parts(name: &str, data: &str) -> serde_json::Result<Self> {
        let data: Value = serde_json::from_str(data)?;
        serde_json::from_value(serde_json::json!({ "event": name, "data": data }))
    }

    /// Split the event into an SSE frame.
    pub fn to_server_event(&self) -> serde_json::Result<ServerEvent> {
        let mut value = serde_json::to_value(self)?;
        let data = value
            .get_mut("data")
            .map(Value::take)
            .unwrap_or_else(|| Value::Object(Default::default()));
        ServerEvent::json(Some(self.name().to_owned()), &data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Payload of `participantJoined`.
pub struct ParticipantJoinedEvent {
    /// Joining user.
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Payload of `participantLeft`.
pub struct ParticipantLeftEvent {
    /// Leaving user.
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Payload of `competitionStarted`.
pub struct CompetitionStartedEvent {
    /// Authoritative start instant every clock counts from.
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub actual_start_time: OffsetDateTime,
    /// Duration in minutes.
    pub time_limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Payload of `submissionUpdate`.
pub struct SubmissionUpdateEvent {
    /// Submitting participant.
    pub participant_id: String,
    /// New counted score.
    pub score: u32,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Payload of `competitionEnded`.
pub struct CompetitionEndedEvent {
    /// Winning user, `None` when nobody submitted.
    #[serde(default)]
    pub winner: Option<String>,
    /// Score of the winner.
    #[serde(default)]
    pub winner_score: Option<u32>,
    /// What ended the competition.
    #[serde(default)]
    pub trigger: Option<EndTrigger>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
/// Payload of `competitionCancelled`.
pub struct CompetitionCancelledEvent {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Payload of `chatMessage`.
pub struct ChatMessageEvent {
    /// Author.
    pub user: String,
    /// Body.
    pub message: String,
    /// Server receive time.
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub timestamp: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_frame_carries_name_and_bare_payload() {
        let event = RoomEvent::SubmissionUpdate(SubmissionUpdateEvent {
            participant_id: "bob".into(),
            score: 70,
        });
        let frame = event.to_server_event().unwrap();
        assert_eq!(frame.event.as_deref(), Some("submissionUpdate"));
        assert_eq!(frame.data, r#"{"participantId":"bob","score":70}"#);

        let back = RoomEvent::from_parts("submissionUpdate", &frame.data).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn ended_without_winner_serialises_empty_payload() {
        let event = RoomEvent::CompetitionEnded(CompetitionEndedEvent {
            winner: None,
            winner_score: None,
            trigger: None,
        });
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"event":"competitionEnded","data":{}}"#
        );
        assert_eq!(RoomEvent::from_parts("competitionEnded", "{}").unwrap(), event);
    }

    #[test]
    fn unknown_event_name_is_rejected() {
        assert!(RoomEvent::from_parts("buzz", "{}").is_err());
    }
}
