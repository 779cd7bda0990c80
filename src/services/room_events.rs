use time::OffsetDateTime;
use tracing::debug;

use crate::{
    dto::events::{
        ChatMessageEvent, CompetitionCancelledEvent, CompetitionEndedEvent,
        CompetitionStartedEvent, ParticipantJoinedEvent, ParticipantLeftEvent, RoomEvent,
        SubmissionUpdateEvent,
    },
    state::{
        SharedState,
        competition::{ChatMessage, CompetitionId, Winner},
        state_machine::EndTrigger,
    },
};

/// Announce a new seat holder.
pub fn broadcast_participant_joined(state: &SharedState, id: CompetitionId, username: &str) {
    publish(
        state,
        id,
        RoomEvent::ParticipantJoined(ParticipantJoinedEvent {
            username: username.to_owned(),
        }),
    );
}

/// Announce that a participant walked away.
pub fn broadcast_participant_left(state: &SharedState, id: CompetitionId, username: &str) {
    publish(
        state,
        id,
        RoomEvent::ParticipantLeft(ParticipantLeftEvent {
            username: username.to_owned(),
        }),
    );
}

/// Announce the start so every client begins its countdown.
pub fn broadcast_competition_started(
    state: &SharedState,
    id: CompetitionId,
    actual_start_time: OffsetDateTime,
    time_limit: u32,
) {
    publish(
        state,
        id,
        RoomEvent::CompetitionStarted(CompetitionStartedEvent {
            actual_start_time,
            time_limit,
        }),
    );
}

/// Announce a participant's new counted score.
pub fn broadcast_submission_update(
    state: &SharedState,
    id: CompetitionId,
    participant: &str,
    score: u32,
) {
    publish(
        state,
        id,
        RoomEvent::SubmissionUpdate(SubmissionUpdateEvent {
            participant_id: participant.to_owned(),
            score,
        }),
    );
}

/// Announce the authoritative end and its winner, then close the room.
pub fn broadcast_competition_ended(
    state: &SharedState,
    id: CompetitionId,
    winner: Option<&Winner>,
    trigger: EndTrigger,
) {
    publish(
        state,
        id,
        RoomEvent::CompetitionEnded(CompetitionEndedEvent {
            winner: winner.map(|winner| winner.user.clone()),
            winner_score: winner.map(|winner| winner.score),
            trigger: Some(trigger),
        }),
    );
    state.rooms().close(id);
}

/// Announce the deletion, then close the room.
pub fn broadcast_competition_cancelled(state: &SharedState, id: CompetitionId) {
    publish(
        state,
        id,
        RoomEvent::CompetitionCancelled(CompetitionCancelledEvent::default()),
    );
    state.rooms().close(id);
}

/// Relay a chat line.
pub fn broadcast_chat_message(state: &SharedState, id: CompetitionId, message: &ChatMessage) {
    publish(
        state,
        id,
        RoomEvent::ChatMessage(ChatMessageEvent {
            user: message.user.clone(),
            message: message.message.clone(),
            timestamp: message.timestamp,
        }),
    );
}

fn publish(state: &SharedState, id: CompetitionId, event: RoomEvent) {
    let name = event.name();
    let delivered = state.rooms().publish(id, event);
    debug!(competition_id = %id, event = name, delivered, "room event broadcast");
}
