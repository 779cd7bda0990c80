mod common;

use std::collections::HashSet;

use code_arena_back::{
    client::clock::remaining_ms,
    dto::submission::SubmitRequest,
    error::{CompetitionError, ServiceError},
    services::{competition_service, submission_service},
    state::{
        AppState,
        competition::CompetitionType,
        state_machine::{CompetitionStatus, EndTrigger},
    },
};
use time::{Duration, OffsetDateTime};

use common::{backdate_start, config, overdue_duel, request, seated_duel};

fn submission(score: u32) -> SubmitRequest {
    SubmitRequest {
        code: format!("return {score}"),
        language: "python".into(),
        is_auto_submitted: false,
        reported_score: Some(score),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_joins_never_exceed_capacity() {
    let state = AppState::in_memory(config());
    let id = competition_service::create(&state, "host", request(CompetitionType::Group, 5, 30))
        .await
        .unwrap()
        .id;

    let handles: Vec<_> = (0..20)
        .map(|n| {
            let state = state.clone();
            tokio::spawn(async move { competition_service::join(&state, id, &format!("user{n}")).await })
        })
        .collect();

    let mut joined = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => joined += 1,
            Err(err) => assert!(matches!(
                err,
                ServiceError::Competition(CompetitionError::Full)
            )),
        }
    }

    let snapshot = competition_service::get(&state, id).await.unwrap();
    assert_eq!(joined, 5);
    assert_eq!(snapshot.participants.len(), 5);
    let unique: HashSet<_> = snapshot.participants.iter().map(|p| &p.username).collect();
    assert_eq!(unique.len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_transition_once() {
    let state = AppState::in_memory(config());
    let id = seated_duel(&state, "host", 30).await;

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let state = state.clone();
            tokio::spawn(async move { competition_service::start(&state, id, "host").await })
        })
        .collect();

    let mut snapshots = Vec::new();
    for handle in handles {
        snapshots.push(handle.await.unwrap().unwrap());
    }

    let first = &snapshots[0];
    assert_eq!(first.status, CompetitionStatus::Active);
    assert_eq!(first.version, 1);
    assert!(snapshots.iter().all(|snapshot| snapshot == first));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_expiry_ends_once_with_one_winner() {
    let state = AppState::in_memory(config());
    let id = overdue_duel(&state, "host").await;

    submission_service::submit(&state, id, "alice", submission(40)).await.unwrap();
    submission_service::submit(&state, id, "bob", submission(70)).await.unwrap();

    let handles: Vec<_> = ["alice", "bob", "alice", "bob", "host", "bob"]
        .into_iter()
        .map(|user| {
            let state = state.clone();
            tokio::spawn(async move {
                competition_service::end(&state, id, Some(user), EndTrigger::Deadline).await
            })
        })
        .collect();

    let mut responses = Vec::new();
    for handle in handles {
        responses.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(responses.iter().filter(|r| r.transitioned).count(), 1);
    let first = &responses[0];
    assert!(responses.iter().all(|r| r.competition == first.competition));
    assert!(responses.iter().all(|r| r.winner == first.winner));
    assert_eq!(first.competition.status, CompetitionStatus::Completed);
    assert_eq!(first.winner.as_ref().map(|w| w.username.as_str()), Some("bob"));
    assert_eq!(first.competition.version, 2);

    // a late call still answers with the frozen outcome
    let late = competition_service::end(&state, id, Some("alice"), EndTrigger::Deadline)
        .await
        .unwrap();
    assert!(!late.transitioned);
    assert_eq!(late.competition, first.competition);
}

#[tokio::test]
async fn submissions_outside_active_are_rejected_without_effect() {
    let state = AppState::in_memory(config());
    let id = seated_duel(&state, "host", 30).await;

    let err = submission_service::submit(&state, id, "alice", submission(90))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Competition(CompetitionError::NotActive)));

    competition_service::start(&state, id, "host").await.unwrap();
    competition_service::end(&state, id, Some("host"), EndTrigger::CreatorManual)
        .await
        .unwrap();

    let err = submission_service::submit(&state, id, "alice", submission(90))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Competition(CompetitionError::NotActive)));

    let snapshot = competition_service::get(&state, id).await.unwrap();
    let alice = snapshot.participant("alice").unwrap();
    assert_eq!(alice.score, 0);
    assert_eq!(alice.submission_count, 0);
    assert!(snapshot.winner.is_none());
}

#[tokio::test]
async fn duel_clocks_agree_after_start() {
    let state = AppState::in_memory(config());
    let id = seated_duel(&state, "alice", 30).await;
    competition_service::start(&state, id, "alice").await.unwrap();

    let alice_view = competition_service::get(&state, id).await.unwrap();
    let bob_view = competition_service::get(&state, id).await.unwrap();
    let start_a = alice_view.actual_start_time.unwrap();
    let start_b = bob_view.actual_start_time.unwrap();
    assert_eq!(start_a, start_b);

    let now = OffsetDateTime::now_utc();
    let a = remaining_ms(start_a, alice_view.time_limit, now);
    let b = remaining_ms(start_b, bob_view.time_limit, now + Duration::milliseconds(500));
    assert!(a.abs_diff(b) <= 1_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deadline_race_crowns_the_higher_last_score() {
    let state = AppState::in_memory(config());
    let id = seated_duel(&state, "alice", 30).await;
    competition_service::start(&state, id, "alice").await.unwrap();

    submission_service::submit(&state, id, "alice", submission(80)).await.unwrap();
    submission_service::submit(&state, id, "bob", submission(90)).await.unwrap();
    // last submission counts, not the best one
    submission_service::submit(&state, id, "bob", submission(20)).await.unwrap();

    backdate_start(&state, id, Duration::minutes(30) + Duration::seconds(1)).await;

    let (a, b) = tokio::join!(
        competition_service::end(&state, id, Some("alice"), EndTrigger::Deadline),
        competition_service::end(&state, id, Some("bob"), EndTrigger::Deadline),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(a.transitioned ^ b.transitioned);
    assert_eq!(a.winner, b.winner);
    assert_eq!(a.winner.unwrap().username, "alice");
}

#[tokio::test]
async fn outsider_cannot_join_running_duel() {
    let state = AppState::in_memory(config());
    let id = seated_duel(&state, "alice", 30).await;
    competition_service::start(&state, id, "alice").await.unwrap();

    let err = competition_service::join(&state, id, "carol").await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Competition(CompetitionError::NotJoinable)
    ));
    let snapshot = competition_service::get(&state, id).await.unwrap();
    assert_eq!(snapshot.participants.len(), 2);
}

#[tokio::test]
async fn restart_restores_in_flight_competitions() {
    use std::sync::Arc;

    use code_arena_back::dao::competition_store::MemoryCompetitionStore;

    let store = Arc::new(MemoryCompetitionStore::new());
    let first = AppState::with_store(config(), store.clone());
    let id = seated_duel(&first, "alice", 30).await;
    competition_service::start(&first, id, "alice").await.unwrap();

    let second = AppState::with_store(config(), store);
    assert_eq!(second.hydrate_from_store().await.unwrap(), 1);
    let snapshot = competition_service::get(&second, id).await.unwrap();
    assert_eq!(snapshot.status, CompetitionStatus::Active);
    assert_eq!(snapshot.version, 1);

    let again = competition_service::start(&second, id, "alice").await.unwrap();
    assert_eq!(again.status, CompetitionStatus::Active);
    assert_eq!(again.version, 1);
}

#[tokio::test]
async fn start_is_refused_once_the_competition_is_over() {
    let state = AppState::in_memory(config());
    let finished = overdue_duel(&state, "host").await;
    competition_service::end(&state, finished, None, EndTrigger::Deadline)
        .await
        .unwrap();
    let err = competition_service::start(&state, finished, "host")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Competition(CompetitionError::NotPending)));

    let deleted = seated_duel(&state, "host", 30).await;
    competition_service::remove(&state, deleted, "host").await.unwrap();
    let err = competition_service::start(&state, deleted, "host")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Competition(CompetitionError::NotPending)));
}

#[tokio::test]
async fn every_attempt_is_logged_outside_the_competition() {
    let state = AppState::in_memory(config());
    let id = seated_duel(&state, "host", 30).await;
    competition_service::start(&state, id, "host").await.unwrap();

    for score in [40, 10, 70] {
        submission_service::submit(&state, id, "alice", submission(score))
            .await
            .unwrap();
    }

    let log = state.submission_log(id).await.unwrap();
    let codes: Vec<_> = log.iter().map(|entry| entry.submission.code.as_str()).collect();
    assert_eq!(codes, vec!["return 40", "return 10", "return 70"]);

    // the document only keeps the counted attempt, without its code
    let record = state.read_competition(id).await.unwrap();
    assert_eq!(record.competition.counted_submissions.len(), 1);
    assert_eq!(record.competition.counted_submissions["alice"].score, 70);
    let document = serde_json::to_string(&record.competition).unwrap();
    assert!(!document.contains("return 40"));
    assert!(!document.contains("return 70"));
}

#[tokio::test]
async fn finished_competitions_leave_memory_and_close_their_room() {
    use code_arena_back::dto::events::RoomEvent;
    use tokio::sync::broadcast::error::RecvError;

    let state = AppState::in_memory(config());
    let id = overdue_duel(&state, "host").await;
    let (mut receiver, record) = state.join_room(id).await.unwrap();
    assert_eq!(record.status(), CompetitionStatus::Active);
    assert_eq!(state.loaded_competitions(), 1);

    competition_service::end(&state, id, None, EndTrigger::Deadline)
        .await
        .unwrap();

    assert!(matches!(
        receiver.recv().await,
        Ok(RoomEvent::CompetitionEnded(_))
    ));
    assert!(matches!(receiver.recv().await, Err(RecvError::Closed)));
    assert_eq!(state.rooms().open_rooms(), 0);
    assert_eq!(state.loaded_competitions(), 0);

    // late subscribers get a stream that is already over
    let (mut late, record) = state.join_room(id).await.unwrap();
    assert_eq!(record.status(), CompetitionStatus::Completed);
    assert!(matches!(late.recv().await, Err(RecvError::Closed)));
    assert_eq!(state.rooms().open_rooms(), 0);
    assert_eq!(state.loaded_competitions(), 0);

    let snapshot = competition_service::get(&state, id).await.unwrap();
    assert_eq!(snapshot.status, CompetitionStatus::Completed);
}

#[tokio::test]
async fn local_subscription_to_a_finished_competition_ends_at_once() {
    use code_arena_back::client::{CompetitionApi, LocalCompetitionApi};
    use futures::StreamExt;

    let state = AppState::in_memory(config());
    let id = overdue_duel(&state, "host").await;
    competition_service::end(&state, id, None, EndTrigger::Deadline)
        .await
        .unwrap();

    let api = LocalCompetitionApi::new(state.clone(), "alice");
    let mut stream = api.subscribe(id).await.unwrap();
    let next = tokio::time::timeout(std::time::Duration::from_secs(1), stream.next())
        .await
        .unwrap();
    assert!(next.is_none());
}
