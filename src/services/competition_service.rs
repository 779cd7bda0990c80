use time::OffsetDateTime;
use tracing::{info, warn};
use validator::Validate;

use crate::{
    dto::{
        competition::{
            ChatMessageView, CompetitionSnapshot, CreateCompetitionRequest,
            EndCompetitionResponse, WinnerView,
        },
        validation::{validate_chat_message, validate_username},
    },
    error::{CompetitionError, ServiceError},
    services::{room_events, submission_service::derive_winner},
    state::{
        Gate, SharedState, Update,
        competition::{
            ChatMessage, Competition, CompetitionId, CompetitionRecord, NewCompetition,
            ParticipantStatus,
        },
        run_transition,
        state_machine::{CompetitionEvent, CompetitionStatus, EndTrigger},
    },
};

/// Create a competition owned by `creator`. The creator is not seated.
pub async fn create(
    state: &SharedState,
    creator: &str,
    request: CreateCompetitionRequest,
) -> Result<CompetitionSnapshot, ServiceError> {
    validate_username(creator).map_err(|err| ServiceError::Unauthorized(err.to_string()))?;
    request.validate()?;

    let cap = state.config().max_participants_cap;
    if request.max_participants > cap {
        return Err(ServiceError::InvalidInput(format!(
            "maxParticipants must not exceed {cap}"
        )));
    }
    if request.invite_username.as_deref() == Some(creator) {
        return Err(ServiceError::InvalidInput(
            "the creator cannot invite themselves".into(),
        ));
    }

    let spec = NewCompetition::from(request);
    let record = CompetitionRecord::new(Competition::new(
        spec,
        creator.to_owned(),
        OffsetDateTime::now_utc(),
    ));
    let snapshot = CompetitionSnapshot::from(&record);

    state.insert_competition(record).await?;
    info!(
        competition_id = %snapshot.id,
        creator,
        kind = ?snapshot.competition_type,
        max_participants = snapshot.max_participants,
        "competition created"
    );
    Ok(snapshot)
}

/// Current snapshot of a competition.
pub async fn get(state: &SharedState, id: CompetitionId) -> Result<CompetitionSnapshot, ServiceError> {
    let record = state.read_competition(id).await?;
    Ok(CompetitionSnapshot::from(&record))
}

/// Every competition that was not deleted, oldest first.
pub async fn list(state: &SharedState) -> Result<Vec<CompetitionSnapshot>, ServiceError> {
    let records = state.list_competitions().await?;
    Ok(records
        .iter()
        .filter(|record| record.status() != CompetitionStatus::Cancelled)
        .map(CompetitionSnapshot::from)
        .collect())
}

/// Seat `user` in competition `id`.
pub async fn join(
    state: &SharedState,
    id: CompetitionId,
    user: &str,
) -> Result<CompetitionSnapshot, ServiceError> {
    let committed = state
        .update_competition(id, |record| {
            record.admit(user, OffsetDateTime::now_utc())?;
            Ok(Update::Changed(()))
        })
        .await
        .inspect_err(|err| warn!(competition_id = %id, user, error = %err, "join rejected"))?;

    info!(
        competition_id = %id,
        user,
        seats = committed.record.competition.participants.len(),
        "participant joined"
    );
    room_events::broadcast_participant_joined(state, id, user);
    Ok(CompetitionSnapshot::from(&committed.record))
}

/// Mark `user` as having left competition `id`.
pub async fn leave(
    state: &SharedState,
    id: CompetitionId,
    user: &str,
) -> Result<CompetitionSnapshot, ServiceError> {
    let committed = state
        .update_competition(id, |record| {
            record.release(user)?;
            Ok(Update::Changed(()))
        })
        .await?;

    info!(competition_id = %id, user, "participant left");
    room_events::broadcast_participant_left(state, id, user);
    Ok(CompetitionSnapshot::from(&committed.record))
}

/// Start competition `id`. Only the creator may start; repeating the call on an
/// active competition returns it unchanged.
pub async fn start(
    state: &SharedState,
    id: CompetitionId,
    requester: &str,
) -> Result<CompetitionSnapshot, ServiceError> {
    let required = state.config().min_start_participants;

    let transitioned = run_transition(
        state,
        id,
        CompetitionEvent::Start,
        |record| {
            if !record.competition.is_creator(requester) {
                return Err(CompetitionError::Forbidden.into());
            }
            match record.status() {
                CompetitionStatus::Pending => {}
                CompetitionStatus::Active => return Ok(Gate::Skip(())),
                CompetitionStatus::Completed | CompetitionStatus::Cancelled => {
                    return Err(CompetitionError::NotPending.into());
                }
            }
            let seated = record
                .competition
                .participants
                .values()
                .filter(|participant| participant.is_seated())
                .count();
            if seated < required {
                return Err(CompetitionError::InsufficientParticipants { required }.into());
            }
            Ok(Gate::Proceed)
        },
        |competition, _plan| {
            competition.actual_start_time = Some(OffsetDateTime::now_utc());
            Ok(())
        },
    )
    .await?;

    let competition = &transitioned.record.competition;
    if transitioned.transitioned {
        if let Some(actual_start_time) = competition.actual_start_time {
            room_events::broadcast_competition_started(
                state,
                id,
                actual_start_time,
                competition.time_limit_minutes,
            );
        }
    }

    Ok(CompetitionSnapshot::from(&transitioned.record))
}

/// End competition `id`.
///
/// Idempotent: anything but an `active` competition is returned as it is, with
/// its stored winner. `requester` is `None` for server-initiated ends.
pub async fn end(
    state: &SharedState,
    id: CompetitionId,
    requester: Option<&str>,
    trigger: EndTrigger,
) -> Result<EndCompetitionResponse, ServiceError> {
    let transitioned = run_transition(
        state,
        id,
        CompetitionEvent::End(trigger),
        |record| {
            if record.status() != CompetitionStatus::Active {
                return Ok(Gate::Skip(()));
            }

            let competition = &record.competition;
            match trigger {
                EndTrigger::CreatorManual => {
                    if !requester.is_some_and(|user| competition.is_creator(user)) {
                        return Err(CompetitionError::Forbidden.into());
                    }
                }
                // client clocks are advisory; whichever expires first ends it
                EndTrigger::Deadline => {}
                EndTrigger::AllSubmitted => {
                    if !competition.all_seated_submitted() {
                        return Ok(Gate::Skip(()));
                    }
                }
            }
            Ok(Gate::Proceed)
        },
        |competition, _plan| {
            complete(competition, trigger);
            Ok(())
        },
    )
    .await?;

    let competition = &transitioned.record.competition;
    if transitioned.transitioned {
        info!(
            competition_id = %id,
            trigger = ?trigger,
            winner = ?competition.winner.as_ref().map(|winner| &winner.user),
            "competition ended"
        );
        room_events::broadcast_competition_ended(state, id, competition.winner.as_ref(), trigger);
    }

    Ok(EndCompetitionResponse {
        competition: CompetitionSnapshot::from(&transitioned.record),
        winner: competition.winner.as_ref().map(WinnerView::from),
        transitioned: transitioned.transitioned,
    })
}

/// Freeze the outcome: winner computed once, seated participants completed.
fn complete(competition: &mut Competition, trigger: EndTrigger) {
    competition.winner = derive_winner(competition.participants.values());
    for participant in competition.participants.values_mut() {
        if participant.is_seated() {
            participant.status = ParticipantStatus::Completed;
        }
    }
    competition.end_trigger = Some(trigger);
    competition.ended_at = Some(OffsetDateTime::now_utc());
}

/// Delete competition `id`. Creator only, never while active.
pub async fn remove(
    state: &SharedState,
    id: CompetitionId,
    requester: &str,
) -> Result<(), ServiceError> {
    run_transition(
        state,
        id,
        CompetitionEvent::Cancel,
        |record| {
            if !record.competition.is_creator(requester) {
                return Err(CompetitionError::Forbidden.into());
            }
            match record.status() {
                CompetitionStatus::Pending | CompetitionStatus::Completed => Ok(Gate::Proceed),
                CompetitionStatus::Active | CompetitionStatus::Cancelled => {
                    Err(CompetitionError::NotRemovable.into())
                }
            }
        },
        |_competition, _plan| Ok(()),
    )
    .await?;

    info!(competition_id = %id, requester, "competition removed");
    room_events::broadcast_competition_cancelled(state, id);
    Ok(())
}

/// Invite `username` to competition `id`.
pub async fn invite(
    state: &SharedState,
    id: CompetitionId,
    requester: &str,
    username: &str,
) -> Result<CompetitionSnapshot, ServiceError> {
    validate_username(username)?;
    if username == requester {
        return Err(ServiceError::InvalidInput(
            "the creator cannot invite themselves".into(),
        ));
    }

    let committed = state
        .update_competition(id, |record| {
            let issued = record.invite(requester, username, OffsetDateTime::now_utc())?;
            Ok(if issued {
                Update::Changed(())
            } else {
                Update::Unchanged(())
            })
        })
        .await?;

    if committed.changed {
        info!(competition_id = %id, invitee = username, "invitation issued");
    }
    Ok(CompetitionSnapshot::from(&committed.record))
}

/// Accept or decline the invitation of `user` to competition `id`.
pub async fn respond_invitation(
    state: &SharedState,
    id: CompetitionId,
    user: &str,
    accept: bool,
) -> Result<CompetitionSnapshot, ServiceError> {
    let committed = state
        .update_competition(id, |record| {
            record.respond_invitation(user, accept, OffsetDateTime::now_utc())?;
            Ok(Update::Changed(()))
        })
        .await?;

    info!(competition_id = %id, user, accept, "invitation answered");
    Ok(CompetitionSnapshot::from(&committed.record))
}

/// Append a chat line and relay it to the room.
pub async fn post_chat(
    state: &SharedState,
    id: CompetitionId,
    user: &str,
    message: &str,
) -> Result<ChatMessageView, ServiceError> {
    let max_chars = state.config().max_chat_length;
    validate_chat_message(message, max_chars)?;
    let body = message.trim().to_owned();

    let committed = state
        .update_competition(id, |record| {
            if record.status() == CompetitionStatus::Cancelled {
                return Err(ServiceError::InvalidState(
                    "competition was cancelled".into(),
                ));
            }
            let competition = &mut record.competition;
            if !competition.is_creator(user) && !competition.participants.contains_key(user) {
                return Err(CompetitionError::NotParticipant.into());
            }

            let entry = ChatMessage {
                user: user.to_owned(),
                message: body,
                timestamp: OffsetDateTime::now_utc(),
            };
            competition.chat_messages.push(entry.clone());
            Ok(Update::Changed(entry))
        })
        .await?;

    room_events::broadcast_chat_message(state, id, &committed.value);
    Ok(ChatMessageView::from(&committed.value))
}

/// Full chat log of competition `id`, oldest first.
pub async fn chat_history(
    state: &SharedState,
    id: CompetitionId,
) -> Result<Vec<ChatMessageView>, ServiceError> {
    let record = state.read_competition(id).await?;
    Ok(record
        .competition
        .chat_messages
        .iter()
        .map(ChatMessageView::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;
    use crate::{
        config::AppConfig,
        dto::{events::RoomEvent, submission::SubmitRequest},
        services::submission_service,
        state::{AppState, competition::CompetitionType},
    };

    fn request(kind: CompetitionType, seats: u32) -> CreateCompetitionRequest {
        CreateCompetitionRequest {
            title: "Lunch duel".into(),
            description: String::new(),
            competition_type: kind,
            challenge_id: "palindromes".into(),
            start_time: OffsetDateTime::now_utc() + Duration::hours(1),
            time_limit: 30,
            max_participants: seats,
            is_public: true,
            prize_pool: None,
            invite_username: None,
        }
    }

    async fn duel(state: &SharedState) -> CompetitionId {
        let snapshot = create(state, "alice", request(CompetitionType::OneVsOne, 2))
            .await
            .unwrap();
        join(state, snapshot.id, "alice").await.unwrap();
        join(state, snapshot.id, "bob").await.unwrap();
        snapshot.id
    }

    #[tokio::test]
    async fn create_rejects_invalid_specs() {
        let state = AppState::in_memory(AppConfig::default());
        let err = create(&state, "alice", request(CompetitionType::OneVsOne, 4))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));

        let mut past = request(CompetitionType::Group, 4);
        past.start_time = OffsetDateTime::now_utc() - Duration::minutes(5);
        assert!(create(&state, "alice", past).await.is_err());
        assert_eq!(state.loaded_competitions(), 0);
    }

    #[tokio::test]
    async fn join_broadcasts_to_the_room() {
        let state = AppState::in_memory(AppConfig::default());
        let snapshot = create(&state, "alice", request(CompetitionType::Group, 4))
            .await
            .unwrap();
        let mut room = state.rooms().subscribe(snapshot.id);

        join(&state, snapshot.id, "bob").await.unwrap();
        match room.recv().await.unwrap() {
            RoomEvent::ParticipantJoined(event) => assert_eq!(event.username, "bob"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn only_creator_starts() {
        let state = AppState::in_memory(AppConfig::default());
        let id = duel(&state).await;
        let err = start(&state, id, "bob").await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Competition(CompetitionError::Forbidden)
        ));

        let started = start(&state, id, "alice").await.unwrap();
        assert_eq!(started.status, CompetitionStatus::Active);
        assert!(started.actual_start_time.is_some());
    }

    #[tokio::test]
    async fn start_requires_participants() {
        let state = AppState::in_memory(AppConfig::default());
        let snapshot = create(&state, "alice", request(CompetitionType::Group, 4))
            .await
            .unwrap();
        let err = start(&state, snapshot.id, "alice").await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Competition(CompetitionError::InsufficientParticipants { required: 1 })
        ));
    }

    #[tokio::test]
    async fn repeated_start_returns_the_active_snapshot() {
        let state = AppState::in_memory(AppConfig::default());
        let id = duel(&state).await;
        let first = start(&state, id, "alice").await.unwrap();
        let second = start(&state, id, "alice").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn deadline_end_from_a_fast_clock_still_completes() {
        let state = AppState::in_memory(AppConfig::default());
        let id = duel(&state).await;
        start(&state, id, "alice").await.unwrap();

        // the server deadline is still minutes away
        let response = end(&state, id, Some("bob"), EndTrigger::Deadline)
            .await
            .unwrap();
        assert!(response.transitioned);
        assert_eq!(response.competition.status, CompetitionStatus::Completed);

        let err = submission_service::submit(
            &state,
            id,
            "bob",
            SubmitRequest {
                code: "late".into(),
                language: "rust".into(),
                is_auto_submitted: false,
                reported_score: Some(10),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Competition(CompetitionError::NotActive)
        ));
    }

    #[tokio::test]
    async fn manual_end_is_creator_only() {
        let state = AppState::in_memory(AppConfig::default());
        let id = duel(&state).await;
        start(&state, id, "alice").await.unwrap();

        let err = end(&state, id, Some("bob"), EndTrigger::CreatorManual)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Competition(CompetitionError::Forbidden)
        ));

        let response = end(&state, id, Some("alice"), EndTrigger::CreatorManual)
            .await
            .unwrap();
        assert!(response.transitioned);
        assert_eq!(response.competition.status, CompetitionStatus::Completed);
        assert!(response.winner.is_none());
        assert!(
            response
                .competition
                .participants
                .iter()
                .all(|participant| participant.status == ParticipantStatus::Completed)
        );
    }

    #[tokio::test]
    async fn end_on_pending_is_a_noop() {
        let state = AppState::in_memory(AppConfig::default());
        let id = duel(&state).await;
        let response = end(&state, id, None, EndTrigger::Deadline).await.unwrap();
        assert!(!response.transitioned);
        assert_eq!(response.competition.status, CompetitionStatus::Pending);
    }

    #[tokio::test]
    async fn remove_rules() {
        let state = AppState::in_memory(AppConfig::default());
        let id = duel(&state).await;

        assert!(matches!(
            remove(&state, id, "bob").await.unwrap_err(),
            ServiceError::Competition(CompetitionError::Forbidden)
        ));

        start(&state, id, "alice").await.unwrap();
        assert!(matches!(
            remove(&state, id, "alice").await.unwrap_err(),
            ServiceError::Competition(CompetitionError::NotRemovable)
        ));

        end(&state, id, Some("alice"), EndTrigger::CreatorManual)
            .await
            .unwrap();
        remove(&state, id, "alice").await.unwrap();
        assert_eq!(
            get(&state, id).await.unwrap().status,
            CompetitionStatus::Cancelled
        );
        assert!(list(&state).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn chat_requires_membership_and_is_trimmed() {
        let state = AppState::in_memory(AppConfig::default());
        let id = duel(&state).await;

        let err = post_chat(&state, id, "mallory", "hi").await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Competition(CompetitionError::NotParticipant)
        ));
        assert!(post_chat(&state, id, "bob", "   ").await.is_err());

        let posted = post_chat(&state, id, "bob", "  good luck  ").await.unwrap();
        assert_eq!(posted.message, "good luck");
        assert_eq!(chat_history(&state, id).await.unwrap(), vec![posted]);
    }

    #[tokio::test]
    async fn persistence_failure_leaves_competition_untouched() {
        use std::sync::Arc;

        use crate::dao::competition_store::MemoryCompetitionStore;

        let store = MemoryCompetitionStore::new();
        let state = AppState::with_store(AppConfig::default(), Arc::new(store.clone()));
        let id = duel(&state).await;

        store.set_offline(true);
        assert!(matches!(
            start(&state, id, "alice").await.unwrap_err(),
            ServiceError::Unavailable(_)
        ));
        store.set_offline(false);

        let snapshot = get(&state, id).await.unwrap();
        assert_eq!(snapshot.status, CompetitionStatus::Pending);
        assert!(snapshot.actual_start_time.is_none());
        assert_eq!(snapshot.version, 0);

        start(&state, id, "alice").await.unwrap();
    }
}
