use std::{future::pending, sync::Arc, time::Duration};

use futures::StreamExt;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::{
    client::{
        api::{ApiError, CompetitionApi, RoomSignal, RoomStream, with_single_retry},
        clock::{CountdownClock, Tick},
    },
    dto::{
        competition::{CompetitionSnapshot, WinnerView},
        events::RoomEvent,
        submission::{SubmissionResponse, SubmitRequest},
    },
    state::{
        competition::{CompetitionId, ParticipantStatus},
        state_machine::{CompetitionStatus, EndTrigger},
    },
};

/// Code sent by an auto-submission when the editor is empty.
pub const EMPTY_SUBMISSION_MARKER: &str = "// no code submitted before the deadline";

/// Default clock re-evaluation period.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Instruction from the view owning the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerCommand {
    /// Submit the editor buffer now.
    Submit,
    /// The view went away; tear down.
    Unmount,
}

/// Notification pushed to the view.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerUpdate {
    /// Fresh authoritative snapshot.
    Snapshot(CompetitionSnapshot),
    /// Time left on the local clock.
    Countdown(Duration),
    /// A room event, forwarded as received.
    Event(RoomEvent),
    /// A manual submission was counted.
    Submitted(SubmissionResponse),
    /// The deadline auto-submission was counted.
    AutoSubmitted(SubmissionResponse),
    /// The competition is over; no further submission will be attempted.
    Ended {
        /// Frozen winner, `None` when nobody submitted.
        winner: Option<WinnerView>,
    },
    /// The competition was deleted.
    Cancelled,
    /// A request failed even after its retry. The clock keeps running.
    Failed {
        /// Operation that failed.
        operation: &'static str,
        /// Last error seen.
        error: ApiError,
    },
}

/// Per-view settings.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Local user; auto-submission only happens when they hold a seat.
    pub user: String,
    /// Language reported with submissions.
    pub language: String,
    /// Clock re-evaluation period.
    pub tick: Duration,
}

impl ControllerOptions {
    /// Options for `user` writing `language`, ticking every second.
    pub fn new(user: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            language: language.into(),
            tick: DEFAULT_TICK,
        }
    }
}

/// Client-side orchestrator of one competition view.
///
/// Keeps at most one [`CountdownClock`], turns its expiry into one
/// auto-submission followed by a deadline end request, and re-fetches the
/// competition on every room signal.
pub struct CompetitionController {
    api: Arc<dyn CompetitionApi>,
    id: CompetitionId,
    options: ControllerOptions,
    editor: watch::Receiver<String>,
    updates: mpsc::Sender<ControllerUpdate>,
    clock: Option<CountdownClock>,
    snapshot: Option<CompetitionSnapshot>,
    auto_submit_triggered: bool,
    end_retry_at: Option<OffsetDateTime>,
    finished: bool,
}

impl CompetitionController {
    /// Controller for competition `id`. `editor` mirrors the local code buffer.
    pub fn new(
        api: Arc<dyn CompetitionApi>,
        id: CompetitionId,
        options: ControllerOptions,
        editor: watch::Receiver<String>,
        updates: mpsc::Sender<ControllerUpdate>,
    ) -> Self {
        Self {
            api,
            id,
            options,
            editor,
            updates,
            clock: None,
            snapshot: None,
            auto_submit_triggered: false,
            end_retry_at: None,
            finished: false,
        }
    }

    /// Drive the view until [`ControllerCommand::Unmount`] or the command channel closes.
    ///
    /// Fails only when the initial subscription or fetch cannot be made.
    pub async fn run(mut self, mut commands: mpsc::Receiver<ControllerCommand>) -> Result<(), ApiError> {
        // subscribe before the first fetch so no event between the two is lost
        let mut room: Option<RoomStream> = Some(self.api.subscribe(self.id).await?);
        let initial = with_single_retry("fetch", || self.api.fetch(self.id)).await?;
        self.reconcile(initial).await;

        let mut ticker = tokio::time::interval(self.options.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(competition_id = %self.id, user = %self.options.user, "competition view mounted");

        loop {
            tokio::select! {
                signal = next_signal(&mut room) => {
                    match signal {
                        Some(signal) => self.on_signal(signal).await,
                        None => {
                            debug!(competition_id = %self.id, "room stream closed");
                            room = None;
                        }
                    }
                }
                _ = ticker.tick(), if self.clock.is_some() || self.end_retry_at.is_some() => {
                    self.on_tick(OffsetDateTime::now_utc()).await;
                }
                command = commands.recv() => {
                    match command {
                        Some(ControllerCommand::Submit) => self.submit_manually().await,
                        Some(ControllerCommand::Unmount) | None => break,
                    }
                }
            }
        }

        self.clock = None;
        info!(competition_id = %self.id, user = %self.options.user, "competition view unmounted");
        Ok(())
    }

    async fn on_signal(&mut self, signal: RoomSignal) {
        match signal {
            RoomSignal::Event(event) => {
                match &event {
                    RoomEvent::CompetitionStarted(started) => {
                        if !self.finished && self.clock.is_none() {
                            self.clock = Some(CountdownClock::new(
                                started.actual_start_time,
                                started.time_limit,
                            ));
                        }
                    }
                    RoomEvent::CompetitionEnded(_) | RoomEvent::CompetitionCancelled(_) => {
                        // authoritative end wins over the local clock
                        self.clock = None;
                    }
                    _ => {}
                }
                self.emit(ControllerUpdate::Event(event)).await;
            }
            RoomSignal::Resync => debug!(competition_id = %self.id, "room resync requested"),
        }
        self.refresh().await;
    }

    async fn on_tick(&mut self, now: OffsetDateTime) {
        if self.end_retry_at.is_some_and(|at| at <= now) {
            self.end_retry_at = None;
            if !self.finished {
                debug!(competition_id = %self.id, "asking again for the deadline end");
                self.request_deadline_end(false).await;
            }
            return;
        }

        let Some(clock) = self.clock.as_mut() else {
            return;
        };
        match clock.tick(now) {
            Tick::Running(remaining) => self.emit(ControllerUpdate::Countdown(remaining)).await,
            Tick::Expired => {
                self.clock = None;
                self.emit(ControllerUpdate::Countdown(Duration::ZERO)).await;
                self.on_expired().await;
            }
            Tick::Spent => {}
        }
    }

    async fn on_expired(&mut self) {
        if self.auto_submit_triggered || self.finished {
            return;
        }
        self.auto_submit_triggered = true;
        info!(competition_id = %self.id, user = %self.options.user, "countdown expired");

        if self.is_seated() {
            let code = {
                let buffer = self.editor.borrow();
                if buffer.trim().is_empty() {
                    EMPTY_SUBMISSION_MARKER.to_owned()
                } else {
                    buffer.clone()
                }
            };
            let request = SubmitRequest {
                code,
                language: self.options.language.clone(),
                is_auto_submitted: true,
                reported_score: None,
            };
            match self.send_submission(request).await {
                Ok(response) => self.emit(ControllerUpdate::AutoSubmitted(response)).await,
                // somebody else's end got there first
                Err(err) if err.code() == Some("NOT_ACTIVE") => {
                    debug!(competition_id = %self.id, "auto-submission arrived after the end");
                }
                Err(error) => {
                    self.emit(ControllerUpdate::Failed {
                        operation: "submit",
                        error,
                    })
                    .await
                }
            }
        }

        self.request_deadline_end(true).await;
    }

    /// Ask the server to end at the deadline.
    ///
    /// A clock running ahead of the server may get a still-active answer; with
    /// `may_defer` one more request is scheduled for the server's own deadline.
    async fn request_deadline_end(&mut self, may_defer: bool) {
        let api = self.api.clone();
        let id = self.id;
        match with_single_retry("end", || api.end(id, EndTrigger::Deadline)).await {
            Ok(response) => {
                debug!(competition_id = %id, transitioned = response.transitioned, "deadline end acknowledged");
                let still_active = response.competition.status == CompetitionStatus::Active;
                if still_active && may_defer {
                    let now = OffsetDateTime::now_utc();
                    let at = response
                        .competition
                        .deadline
                        .map_or(now, |deadline| deadline.max(now));
                    info!(competition_id = %id, retry_at = %at, "server still active after expiry; will ask again");
                    self.end_retry_at = Some(at);
                }
                self.reconcile(response.competition).await;
            }
            Err(error) => {
                warn!(competition_id = %id, error = %error, "deadline end failed");
                self.emit(ControllerUpdate::Failed {
                    operation: "end",
                    error,
                })
                .await;
            }
        }
    }

    async fn submit_manually(&mut self) {
        if self.finished {
            debug!(competition_id = %self.id, "ignoring submission after the end");
            return;
        }
        let request = SubmitRequest {
            code: self.editor.borrow().clone(),
            language: self.options.language.clone(),
            is_auto_submitted: false,
            reported_score: None,
        };
        match self.send_submission(request).await {
            Ok(response) => self.emit(ControllerUpdate::Submitted(response)).await,
            Err(error) => {
                self.emit(ControllerUpdate::Failed {
                    operation: "submit",
                    error,
                })
                .await
            }
        }
    }

    async fn send_submission(&self, request: SubmitRequest) -> Result<SubmissionResponse, ApiError> {
        with_single_retry("submit", || self.api.submit(self.id, request.clone())).await
    }

    async fn refresh(&mut self) {
        match with_single_retry("fetch", || self.api.fetch(self.id)).await {
            Ok(snapshot) => self.reconcile(snapshot).await,
            Err(err) => warn!(competition_id = %self.id, error = %err, "re-fetch failed"),
        }
    }

    async fn reconcile(&mut self, snapshot: CompetitionSnapshot) {
        match snapshot.status {
            CompetitionStatus::Active => {
                if !self.finished && !self.auto_submit_triggered && self.clock.is_none() {
                    self.clock = CountdownClock::for_snapshot(&snapshot);
                }
            }
            CompetitionStatus::Completed => {
                self.clock = None;
                self.end_retry_at = None;
                if !self.finished {
                    self.finished = true;
                    info!(
                        competition_id = %self.id,
                        winner = ?snapshot.winner.as_ref().map(|winner| &winner.username),
                        "competition ended"
                    );
                    self.emit(ControllerUpdate::Ended {
                        winner: snapshot.winner.clone(),
                    })
                    .await;
                }
            }
            CompetitionStatus::Cancelled => {
                self.clock = None;
                self.end_retry_at = None;
                if !self.finished {
                    self.finished = true;
                    self.emit(ControllerUpdate::Cancelled).await;
                }
            }
            CompetitionStatus::Pending => {}
        }

        self.snapshot = Some(snapshot.clone());
        self.emit(ControllerUpdate::Snapshot(snapshot)).await;
    }

    fn is_seated(&self) -> bool {
        self.snapshot
            .as_ref()
            .and_then(|snapshot| snapshot.participant(&self.options.user))
            .is_some_and(|participant| participant.status != ParticipantStatus::Left)
    }

    async fn emit(&self, update: ControllerUpdate) {
        // a view that stopped listening is about to unmount
        let _ = self.updates.send(update).await;
    }
}

async fn next_signal(room: &mut Option<RoomStream>) -> Option<RoomSignal> {
    match room {
        Some(stream) => stream.next().await,
        None => pending().await,
    }
}
