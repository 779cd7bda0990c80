mod common;

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use code_arena_back::{
    client::{
        ApiError, CompetitionApi, CompetitionController, ControllerCommand, ControllerOptions,
        ControllerUpdate, LocalCompetitionApi, RoomStream,
        controller::EMPTY_SUBMISSION_MARKER,
    },
    dto::{
        competition::{CompetitionSnapshot, EndCompetitionResponse},
        submission::{SubmissionResponse, SubmitRequest},
    },
    error::{CompetitionError, ServiceError},
    services::{
        competition_service, submission_service,
        scoring::{ScoringError, SolutionAttempt, SolutionScorer},
    },
    state::{
        AppState, SharedState,
        competition::CompetitionId,
        state_machine::{CompetitionStatus, EndTrigger},
    },
};
use futures::future::BoxFuture;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use common::{backdate_start, config, overdue_duel, seated_duel};

/// Scores an attempt by the length of its code.
struct LengthScorer;

impl SolutionScorer for LengthScorer {
    fn score(&self, attempt: SolutionAttempt) -> BoxFuture<'static, Result<u32, ScoringError>> {
        let score = attempt.code.trim().len().min(1000) as u32;
        Box::pin(async move { Ok(score) })
    }
}

struct Mounted {
    updates: mpsc::Receiver<ControllerUpdate>,
    commands: mpsc::Sender<ControllerCommand>,
    handle: JoinHandle<Result<(), ApiError>>,
    _editor: watch::Sender<String>,
}

impl Mounted {
    async fn wait_for<F>(&mut self, mut matches: F) -> ControllerUpdate
    where
        F: FnMut(&ControllerUpdate) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let update = self.updates.recv().await.expect("controller stopped");
                if matches(&update) {
                    return update;
                }
            }
        })
        .await
        .expect("timed out waiting for controller update")
    }

    async fn unmount(self) {
        self.commands.send(ControllerCommand::Unmount).await.unwrap();
        drop(self.updates);
        self.handle.await.unwrap().unwrap();
    }
}

fn mount(api: Arc<dyn CompetitionApi>, id: CompetitionId, user: &str, code: &str) -> Mounted {
    let (editor_tx, editor_rx) = watch::channel(code.to_owned());
    let (updates_tx, updates) = mpsc::channel(256);
    let (commands, commands_rx) = mpsc::channel(8);

    let mut options = ControllerOptions::new(user, "rust");
    options.tick = Duration::from_millis(10);
    let controller = CompetitionController::new(api, id, options, editor_rx, updates_tx);

    Mounted {
        updates,
        commands,
        handle: tokio::spawn(controller.run(commands_rx)),
        _editor: editor_tx,
    }
}

fn local(state: &SharedState, user: &str) -> Arc<dyn CompetitionApi> {
    Arc::new(LocalCompetitionApi::new(state.clone(), user))
}

fn is_ended(update: &ControllerUpdate) -> bool {
    matches!(update, ControllerUpdate::Ended { .. })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn both_clocks_expire_and_the_competition_ends_once() {
    let state = AppState::with_scorer(config(), Arc::new(LengthScorer));
    let id = overdue_duel(&state, "host").await;

    let mut alice = mount(local(&state, "alice"), id, "alice", "fn solve() -> u32 { 42 }");
    let mut bob = mount(local(&state, "bob"), id, "bob", "fn solve() {}");

    let ControllerUpdate::Ended { winner: alice_saw } = alice.wait_for(is_ended).await else {
        unreachable!()
    };
    let ControllerUpdate::Ended { winner: bob_saw } = bob.wait_for(is_ended).await else {
        unreachable!()
    };
    assert_eq!(alice_saw, bob_saw);

    let record = state.read_competition(id).await.unwrap();
    assert_eq!(record.status(), CompetitionStatus::Completed);
    assert_eq!(record.machine.version(), 2);
    assert_eq!(record.competition.end_trigger, Some(EndTrigger::Deadline));
    for participant in record.competition.participants.values() {
        assert!(participant.submission_count <= 1);
    }
    assert_eq!(
        record.competition.winner.as_ref().map(|winner| winner.user.clone()),
        alice_saw.map(|winner| winner.username)
    );

    alice.unmount().await;
    bob.unmount().await;
}

#[tokio::test]
async fn empty_editor_auto_submits_the_marker() {
    let state = AppState::in_memory(config());
    let id = overdue_duel(&state, "host").await;

    let mut bob = mount(local(&state, "bob"), id, "bob", "   ");
    let auto = bob
        .wait_for(|update| matches!(update, ControllerUpdate::AutoSubmitted(_)))
        .await;
    let ControllerUpdate::AutoSubmitted(response) = auto else {
        unreachable!()
    };
    assert!(response.participant.auto_submitted);

    let ControllerUpdate::Ended { winner } = bob.wait_for(is_ended).await else {
        unreachable!()
    };
    assert_eq!(winner.map(|winner| winner.username), Some("bob".to_string()));

    let record = state.read_competition(id).await.unwrap();
    let counted = &record.competition.counted_submissions["bob"];
    assert!(counted.is_auto_submitted);
    assert_eq!(counted.code_bytes, EMPTY_SUBMISSION_MARKER.len());

    let log = state.submission_log(id).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].submission.code, EMPTY_SUBMISSION_MARKER);

    bob.unmount().await;
}

#[tokio::test]
async fn spectators_end_without_submitting() {
    let state = AppState::in_memory(config());
    let id = overdue_duel(&state, "host").await;

    let mut host = mount(local(&state, "host"), id, "host", "print('spectating')");
    host.wait_for(is_ended).await;

    let record = state.read_competition(id).await.unwrap();
    assert!(state.submission_log(id).await.unwrap().is_empty());
    assert!(record.competition.winner.is_none());
    assert_eq!(record.status(), CompetitionStatus::Completed);

    host.unmount().await;
}

#[tokio::test]
async fn authoritative_end_stops_the_clock_before_expiry() {
    let state = AppState::in_memory(config());
    let id = seated_duel(&state, "alice", 30).await;
    competition_service::start(&state, id, "alice").await.unwrap();

    let mut bob = mount(local(&state, "bob"), id, "bob", "fn main() {}");
    bob.wait_for(|update| matches!(update, ControllerUpdate::Countdown(_)))
        .await;

    competition_service::end(&state, id, Some("alice"), EndTrigger::CreatorManual)
        .await
        .unwrap();
    bob.wait_for(is_ended).await;

    // submissions are refused once the end is known
    bob.commands.send(ControllerCommand::Submit).await.unwrap();
    let record = state.read_competition(id).await.unwrap();
    assert_eq!(record.competition.participants["bob"].submission_count, 0);

    bob.unmount().await;
    let record = state.read_competition(id).await.unwrap();
    assert_eq!(record.competition.participants["bob"].submission_count, 0);
}

#[tokio::test]
async fn manual_submission_is_counted() {
    let state = AppState::with_scorer(config(), Arc::new(LengthScorer));
    let id = seated_duel(&state, "alice", 30).await;
    competition_service::start(&state, id, "alice").await.unwrap();

    let mut bob = mount(local(&state, "bob"), id, "bob", "abc");
    bob.wait_for(|update| matches!(update, ControllerUpdate::Snapshot(_)))
        .await;
    bob.commands.send(ControllerCommand::Submit).await.unwrap();

    let ControllerUpdate::Submitted(response) = bob
        .wait_for(|update| matches!(update, ControllerUpdate::Submitted(_)))
        .await
    else {
        unreachable!()
    };
    assert_eq!(response.score, 3);
    assert!(!response.participant.auto_submitted);

    bob.unmount().await;
}

/// Delegates to the in-process adapter but fails the first `failures` end calls.
struct FlakyEnd {
    inner: LocalCompetitionApi,
    failures: usize,
    end_calls: Arc<AtomicUsize>,
}

impl CompetitionApi for FlakyEnd {
    fn fetch(&self, id: CompetitionId) -> BoxFuture<'static, Result<CompetitionSnapshot, ApiError>> {
        self.inner.fetch(id)
    }

    fn submit(
        &self,
        id: CompetitionId,
        request: SubmitRequest,
    ) -> BoxFuture<'static, Result<SubmissionResponse, ApiError>> {
        self.inner.submit(id, request)
    }

    fn end(
        &self,
        id: CompetitionId,
        trigger: EndTrigger,
    ) -> BoxFuture<'static, Result<EndCompetitionResponse, ApiError>> {
        let call = self.end_calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Box::pin(async { Err(ApiError::Transport("connection reset".into())) });
        }
        self.inner.end(id, trigger)
    }

    fn subscribe(&self, id: CompetitionId) -> BoxFuture<'static, Result<RoomStream, ApiError>> {
        self.inner.subscribe(id)
    }
}

#[tokio::test]
async fn a_single_transport_failure_is_retried() {
    let state = AppState::in_memory(config());
    let id = overdue_duel(&state, "host").await;
    let end_calls = Arc::new(AtomicUsize::new(0));
    let api = Arc::new(FlakyEnd {
        inner: LocalCompetitionApi::new(state.clone(), "alice"),
        failures: 1,
        end_calls: end_calls.clone(),
    });

    let mut alice = mount(api, id, "alice", "fn main() {}");
    alice.wait_for(is_ended).await;
    assert_eq!(end_calls.load(Ordering::SeqCst), 2);

    alice.unmount().await;
}

#[tokio::test]
async fn persistent_failure_is_surfaced_once() {
    let state = AppState::in_memory(config());
    let id = overdue_duel(&state, "host").await;
    let end_calls = Arc::new(AtomicUsize::new(0));
    let api = Arc::new(FlakyEnd {
        inner: LocalCompetitionApi::new(state.clone(), "alice"),
        failures: usize::MAX,
        end_calls: end_calls.clone(),
    });

    let mut alice = mount(api, id, "alice", "fn main() {}");
    let failed = alice
        .wait_for(|update| matches!(update, ControllerUpdate::Failed { .. }))
        .await;
    let ControllerUpdate::Failed { operation, error } = failed else {
        unreachable!()
    };
    assert_eq!(operation, "end");
    assert!(error.is_retryable());

    // one-shot: the expired clock is not re-armed and end is not retried again
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(end_calls.load(Ordering::SeqCst), 2);
    let record = state.read_competition(id).await.unwrap();
    assert_eq!(record.status(), CompetitionStatus::Active);

    alice.unmount().await;
}

/// Client whose clock runs `skew` ahead of the server.
struct FastClock {
    inner: LocalCompetitionApi,
    skew: time::Duration,
}

impl CompetitionApi for FastClock {
    fn fetch(&self, id: CompetitionId) -> BoxFuture<'static, Result<CompetitionSnapshot, ApiError>> {
        let fetched = self.inner.fetch(id);
        let skew = self.skew;
        Box::pin(async move {
            let mut snapshot = fetched.await?;
            snapshot.actual_start_time = snapshot.actual_start_time.map(|start| start - skew);
            Ok(snapshot)
        })
    }

    fn submit(
        &self,
        id: CompetitionId,
        request: SubmitRequest,
    ) -> BoxFuture<'static, Result<SubmissionResponse, ApiError>> {
        self.inner.submit(id, request)
    }

    fn end(
        &self,
        id: CompetitionId,
        trigger: EndTrigger,
    ) -> BoxFuture<'static, Result<EndCompetitionResponse, ApiError>> {
        self.inner.end(id, trigger)
    }

    fn subscribe(&self, id: CompetitionId) -> BoxFuture<'static, Result<RoomStream, ApiError>> {
        self.inner.subscribe(id)
    }
}

#[tokio::test]
async fn clock_ahead_of_the_server_still_ends_the_competition() {
    let state = AppState::in_memory(config());
    let id = seated_duel(&state, "host", 1).await;
    competition_service::start(&state, id, "host").await.unwrap();
    // server deadline three seconds from now
    backdate_start(&state, id, time::Duration::seconds(57)).await;

    let api = Arc::new(FastClock {
        inner: LocalCompetitionApi::new(state.clone(), "alice"),
        skew: time::Duration::seconds(5),
    });
    let mut alice = mount(api, id, "alice", "fn solve() {}");
    alice
        .wait_for(|update| matches!(update, ControllerUpdate::AutoSubmitted(_)))
        .await;
    alice.wait_for(is_ended).await;

    let record = state.read_competition(id).await.unwrap();
    assert_eq!(record.status(), CompetitionStatus::Completed);
    assert_eq!(record.competition.end_trigger, Some(EndTrigger::Deadline));

    // nothing can change the winner once it is frozen
    let late = submission_service::submit(
        &state,
        id,
        "bob",
        SubmitRequest {
            code: "fn solve() { better() }".into(),
            language: "rust".into(),
            is_auto_submitted: false,
            reported_score: Some(1000),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(
        late,
        ServiceError::Competition(CompetitionError::NotActive)
    ));

    alice.unmount().await;
}

/// Answers the first end request with the unchanged active competition.
struct StillActiveOnce {
    inner: LocalCompetitionApi,
    end_calls: Arc<AtomicUsize>,
}

impl CompetitionApi for StillActiveOnce {
    fn fetch(&self, id: CompetitionId) -> BoxFuture<'static, Result<CompetitionSnapshot, ApiError>> {
        self.inner.fetch(id)
    }

    fn submit(
        &self,
        id: CompetitionId,
        request: SubmitRequest,
    ) -> BoxFuture<'static, Result<SubmissionResponse, ApiError>> {
        self.inner.submit(id, request)
    }

    fn end(
        &self,
        id: CompetitionId,
        trigger: EndTrigger,
    ) -> BoxFuture<'static, Result<EndCompetitionResponse, ApiError>> {
        if self.end_calls.fetch_add(1, Ordering::SeqCst) == 0 {
            let fetched = self.inner.fetch(id);
            return Box::pin(async move {
                Ok(EndCompetitionResponse {
                    competition: fetched.await?,
                    winner: None,
                    transitioned: false,
                })
            });
        }
        self.inner.end(id, trigger)
    }

    fn subscribe(&self, id: CompetitionId) -> BoxFuture<'static, Result<RoomStream, ApiError>> {
        self.inner.subscribe(id)
    }
}

#[tokio::test]
async fn end_answered_as_still_active_is_asked_again() {
    let state = AppState::in_memory(config());
    let id = overdue_duel(&state, "host").await;
    let end_calls = Arc::new(AtomicUsize::new(0));
    let api = Arc::new(StillActiveOnce {
        inner: LocalCompetitionApi::new(state.clone(), "bob"),
        end_calls: end_calls.clone(),
    });

    let mut bob = mount(api, id, "bob", "fn main() {}");
    bob.wait_for(is_ended).await;
    assert_eq!(end_calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        state.read_competition(id).await.unwrap().status(),
        CompetitionStatus::Completed
    );

    // the deferred request is one-shot
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(end_calls.load(Ordering::SeqCst), 2);

    bob.unmount().await;
}
