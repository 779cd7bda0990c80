//! Runtime representation of a competition and its roster.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    error::{CompetitionError, ServiceError},
    state::state_machine::{
        CompetitionEvent, CompetitionStateMachine, CompetitionStatus, EndTrigger, Plan,
    },
};

/// Identifier of a competition.
pub type CompetitionId = Uuid;
/// Reference to a platform user (their username).
pub type UserRef = String;

/// Format of the competition. Only affects seat validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum CompetitionType {
    /// Head-to-head duel; exactly two seats.
    #[serde(rename = "1v1")]
    OneVsOne,
    /// Free-for-all group.
    #[serde(rename = "group")]
    Group,
    /// Bracket-style tournament round.
    #[serde(rename = "tournament")]
    Tournament,
}

/// Seat status of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    /// Competing (or waiting for the start).
    Active,
    /// The competition ended with this participant still seated.
    Completed,
    /// Walked away; excluded from the winner.
    Left,
}

/// A seat in a competition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Who holds the seat.
    pub user: UserRef,
    /// Seat status.
    pub status: ParticipantStatus,
    /// Score of the counted submission.
    pub score: u32,
    /// Number of submissions made, counted or not.
    pub submission_count: u32,
    /// Time of the counted submission.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_submission_time: Option<OffsetDateTime>,
    /// Whether the counted submission was sent automatically at expiry.
    pub auto_submitted: bool,
    /// When the seat was taken.
    #[serde(with = "time::serde::rfc3339")]
    pub joined_at: OffsetDateTime,
}

impl Participant {
    fn new(user: UserRef, joined_at: OffsetDateTime) -> Self {
        Self {
            user,
            status: ParticipantStatus::Active,
            score: 0,
            submission_count: 0,
            last_submission_time: None,
            auto_submitted: false,
            joined_at,
        }
    }

    /// Whether the seat is still occupied.
    pub fn is_seated(&self) -> bool {
        self.status != ParticipantStatus::Left
    }

    /// Whether this participant has a counted submission.
    pub fn has_submitted(&self) -> bool {
        self.last_submission_time.is_some()
    }
}

/// A scored attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    /// Submitting participant.
    pub participant: UserRef,
    /// Source code as sent from the editor.
    pub code: String,
    /// Language identifier.
    pub language: String,
    /// Arrival time on the server.
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
    /// Sent by the countdown expiry rather than the user.
    pub is_auto_submitted: bool,
    /// Score assigned by the scorer.
    pub score: u32,
}

/// What the competition keeps about a counted attempt. The code itself only
/// lives in the submission log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountedSubmission {
    /// Language identifier.
    pub language: String,
    /// Arrival time on the server.
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
    /// Sent by the countdown expiry rather than the user.
    pub is_auto_submitted: bool,
    /// Score assigned by the scorer.
    pub score: u32,
    /// Size of the submitted code in bytes.
    pub code_bytes: usize,
}

impl From<&Submission> for CountedSubmission {
    fn from(submission: &Submission) -> Self {
        Self {
            language: submission.language.clone(),
            submitted_at: submission.submitted_at,
            is_auto_submitted: submission.is_auto_submitted,
            score: submission.score,
            code_bytes: submission.code.len(),
        }
    }
}

/// Answer state of an invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    /// Waiting for the invitee.
    Pending,
    /// Invitee may join.
    Accepted,
    /// Invitee refused.
    Declined,
}

/// Invitation to a (usually private) competition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    /// Invited user.
    pub user: UserRef,
    /// Answer state.
    pub status: InvitationStatus,
    /// When the invitation was issued.
    #[serde(with = "time::serde::rfc3339")]
    pub invited_at: OffsetDateTime,
    /// When the invitee answered.
    #[serde(with = "time::serde::rfc3339::option")]
    pub responded_at: Option<OffsetDateTime>,
}

/// Entry of the append-only chat log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author.
    pub user: UserRef,
    /// Message body.
    pub message: String,
    /// Server receive time.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Frozen outcome of a completed competition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Winner {
    /// Winning participant.
    pub user: UserRef,
    /// Winning score.
    pub score: u32,
    /// Time of the winning submission.
    #[serde(with = "time::serde::rfc3339")]
    pub last_submission_time: OffsetDateTime,
}

/// Validated parameters for a new competition.
#[derive(Debug, Clone)]
pub struct NewCompetition {
    /// Display title.
    pub title: String,
    /// Free-form description.
    pub description: String,
    /// Format.
    pub competition_type: CompetitionType,
    /// External challenge reference.
    pub challenge_id: String,
    /// Scheduled start.
    pub start_time: OffsetDateTime,
    /// Duration in minutes once started.
    pub time_limit_minutes: u32,
    /// Seat count.
    pub max_participants: u32,
    /// Open to everyone or invitation-only.
    pub is_public: bool,
    /// Optional prize description.
    pub prize_pool: Option<String>,
    /// Friend to invite right away.
    pub invite_user: Option<UserRef>,
}

/// Competition data, excluding the lifecycle status which the state machine owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Competition {
    /// Stable identifier.
    pub id: CompetitionId,
    /// Display title.
    pub title: String,
    /// Free-form description.
    pub description: String,
    /// Format.
    pub competition_type: CompetitionType,
    /// External challenge reference.
    pub challenge_id: String,
    /// User allowed to start, end manually and delete.
    pub creator: UserRef,
    /// Ordered roster keyed by user.
    pub participants: IndexMap<UserRef, Participant>,
    /// Invitations keyed by invitee.
    pub invitations: IndexMap<UserRef, Invitation>,
    /// Seat count.
    pub max_participants: u32,
    /// Duration in minutes once started.
    pub time_limit_minutes: u32,
    /// Scheduled start.
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    /// Set when the competition becomes active.
    #[serde(with = "time::serde::rfc3339::option")]
    pub actual_start_time: Option<OffsetDateTime>,
    /// Open to everyone or invitation-only.
    pub is_public: bool,
    /// Optional prize description.
    pub prize_pool: Option<String>,
    /// Append-only chat log.
    pub chat_messages: Vec<ChatMessage>,
    /// Counted submission per participant (last one wins).
    pub counted_submissions: IndexMap<UserRef, CountedSubmission>,
    /// Frozen at end.
    pub winner: Option<Winner>,
    /// Reason the competition ended.
    pub end_trigger: Option<EndTrigger>,
    /// When the competition ended.
    #[serde(with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Competition {
    /// Build a fresh competition owned by `creator`.
    pub fn new(spec: NewCompetition, creator: UserRef, now: OffsetDateTime) -> Self {
        let mut invitations = IndexMap::new();
        if let Some(invitee) = spec.invite_user {
            invitations.insert(
                invitee.clone(),
                Invitation {
                    user: invitee,
                    status: InvitationStatus::Pending,
                    invited_at: now,
                    responded_at: None,
                },
            );
        }

        Self {
            id: Uuid::new_v4(),
            title: spec.title,
            description: spec.description,
            competition_type: spec.competition_type,
            challenge_id: spec.challenge_id,
            creator,
            participants: IndexMap::new(),
            invitations,
            max_participants: spec.max_participants,
            time_limit_minutes: spec.time_limit_minutes,
            start_time: spec.start_time,
            actual_start_time: None,
            is_public: spec.is_public,
            prize_pool: spec.prize_pool,
            chat_messages: Vec::new(),
            counted_submissions: IndexMap::new(),
            winner: None,
            end_trigger: None,
            ended_at: None,
            created_at: now,
        }
    }

    /// Instant at which every client clock reaches zero.
    pub fn deadline(&self) -> Option<OffsetDateTime> {
        self.actual_start_time
            .map(|start| start + Duration::minutes(i64::from(self.time_limit_minutes)))
    }

    /// Whether `user` created this competition.
    pub fn is_creator(&self, user: &str) -> bool {
        self.creator == user
    }

    /// Seated participant for `user`, if any.
    pub fn seated(&self, user: &str) -> Option<&Participant> {
        self.participants
            .get(user)
            .filter(|participant| participant.is_seated())
    }

    /// Whether every seated participant has a counted submission.
    pub fn all_seated_submitted(&self) -> bool {
        let mut seated = self.participants.values().filter(|p| p.is_seated()).peekable();
        seated.peek().is_some() && seated.all(Participant::has_submitted)
    }

    fn has_accepted_invitation(&self, user: &str) -> bool {
        self.invitations
            .get(user)
            .is_some_and(|invitation| invitation.status == InvitationStatus::Accepted)
    }
}

/// A competition together with its lifecycle machine; the unit guarded by the
/// per-competition lock.
#[derive(Debug, Clone)]
pub struct CompetitionRecord {
    /// Lifecycle machine owning the status.
    pub machine: CompetitionStateMachine,
    /// Competition data.
    pub competition: Competition,
}

impl CompetitionRecord {
    /// Wrap a freshly created competition in a pending machine.
    pub fn new(competition: Competition) -> Self {
        Self {
            machine: CompetitionStateMachine::new(),
            competition,
        }
    }

    /// Identifier of the wrapped competition.
    pub fn id(&self) -> CompetitionId {
        self.competition.id
    }

    /// Current lifecycle status.
    pub fn status(&self) -> CompetitionStatus {
        self.machine.status()
    }

    /// Plan `event`, run `work` on the competition, then apply the plan.
    ///
    /// On a `work` failure the plan is aborted and the error returned; the
    /// caller discards the draft so nothing is partially applied.
    pub fn transition<T, F>(&mut self, event: CompetitionEvent, work: F) -> Result<T, ServiceError>
    where
        F: FnOnce(&mut Competition, &Plan) -> Result<T, ServiceError>,
    {
        let plan = self.machine.plan(event)?;

        match work(&mut self.competition, &plan) {
            Ok(value) => {
                self.machine.apply(plan.id)?;
                Ok(value)
            }
            Err(err) => {
                self.machine.abort(plan.id)?;
                Err(err)
            }
        }
    }

    /// Seat `user`, enforcing status, invitation and capacity rules.
    pub fn admit(&mut self, user: &str, now: OffsetDateTime) -> Result<(), CompetitionError> {
        let competition = &mut self.competition;

        if competition.seated(user).is_some() {
            return Err(CompetitionError::AlreadyJoined);
        }

        if self.machine.status() != CompetitionStatus::Pending {
            return Err(CompetitionError::NotJoinable);
        }

        if !competition.is_public
            && !competition.is_creator(user)
            && !competition.has_accepted_invitation(user)
        {
            return Err(CompetitionError::NotInvited);
        }

        if let Some(previous) = competition.participants.get_mut(user) {
            previous.status = ParticipantStatus::Active;
            previous.joined_at = now;
            return Ok(());
        }

        if competition.participants.len() >= competition.max_participants as usize {
            return Err(CompetitionError::Full);
        }

        competition
            .participants
            .insert(user.to_owned(), Participant::new(user.to_owned(), now));
        Ok(())
    }

    /// Mark `user` as having left.
    pub fn release(&mut self, user: &str) -> Result<(), CompetitionError> {
        if !matches!(
            self.machine.status(),
            CompetitionStatus::Pending | CompetitionStatus::Active
        ) {
            return Err(CompetitionError::NotJoinable);
        }

        let participant = self
            .competition
            .participants
            .get_mut(user)
            .filter(|participant| participant.is_seated())
            .ok_or(CompetitionError::NotParticipant)?;
        participant.status = ParticipantStatus::Left;
        Ok(())
    }

    /// Check that `user` may submit right now.
    pub fn ensure_can_submit(&self, user: &str) -> Result<(), CompetitionError> {
        if self.machine.status() != CompetitionStatus::Active {
            return Err(CompetitionError::NotActive);
        }
        if self.competition.seated(user).is_none() {
            return Err(CompetitionError::NotParticipant);
        }
        Ok(())
    }

    /// Replace the counted submission of its participant and update their score.
    ///
    /// Appending the attempt to the submission log is up to the caller.
    pub fn record_submission(
        &mut self,
        submission: &Submission,
    ) -> Result<Participant, CompetitionError> {
        self.ensure_can_submit(&submission.participant)?;

        let competition = &mut self.competition;
        let participant = competition
            .participants
            .get_mut(&submission.participant)
            .ok_or(CompetitionError::NotParticipant)?;

        participant.score = submission.score;
        participant.submission_count += 1;
        participant.last_submission_time = Some(submission.submitted_at);
        participant.auto_submitted = submission.is_auto_submitted;
        let updated = participant.clone();

        competition.counted_submissions.insert(
            submission.participant.clone(),
            CountedSubmission::from(submission),
        );

        Ok(updated)
    }

    /// Issue (or re-issue) an invitation. Creator only, while pending.
    pub fn invite(
        &mut self,
        requester: &str,
        invitee: &str,
        now: OffsetDateTime,
    ) -> Result<bool, CompetitionError> {
        if !self.competition.is_creator(requester) {
            return Err(CompetitionError::Forbidden);
        }
        if self.machine.status() != CompetitionStatus::Pending {
            return Err(CompetitionError::NotPending);
        }

        let invitations = &mut self.competition.invitations;
        match invitations.get_mut(invitee) {
            Some(existing) if existing.status != InvitationStatus::Declined => Ok(false),
            Some(existing) => {
                existing.status = InvitationStatus::Pending;
                existing.invited_at = now;
                existing.responded_at = None;
                Ok(true)
            }
            None => {
                invitations.insert(
                    invitee.to_owned(),
                    Invitation {
                        user: invitee.to_owned(),
                        status: InvitationStatus::Pending,
                        invited_at: now,
                        responded_at: None,
                    },
                );
                Ok(true)
            }
        }
    }

    /// Record the invitee's answer.
    pub fn respond_invitation(
        &mut self,
        user: &str,
        accept: bool,
        now: OffsetDateTime,
    ) -> Result<(), CompetitionError> {
        if self.machine.status() != CompetitionStatus::Pending {
            return Err(CompetitionError::NotPending);
        }

        let invitation = self
            .competition
            .invitations
            .get_mut(user)
            .ok_or(CompetitionError::NotInvited)?;
        invitation.status = if accept {
            InvitationStatus::Accepted
        } else {
            InvitationStatus::Declined
        };
        invitation.responded_at = Some(now);
        Ok(())
    }
}
