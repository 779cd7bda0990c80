use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::state::{
    competition::{
        ChatMessage, CompetitionRecord, CompetitionType, Invitation, InvitationStatus,
        NewCompetition, Participant, ParticipantStatus, Winner,
    },
    state_machine::{CompetitionStatus, EndTrigger},
};

/// Payload used to create a competition.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_create_request"))]
pub struct CreateCompetitionRequest {
    /// Display title.
    #[validate(length(min = 1, max = 120))]
    pub title: String,
    /// Free-form description.
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub description: String,
    /// `1v1`, `group` or `tournament`.
    #[serde(rename = "type")]
    pub competition_type: CompetitionType,
    /// External challenge reference.
    #[validate(length(min = 1, max = 128))]
    pub challenge_id: String,
    /// Scheduled start, must lie in the future.
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub start_time: OffsetDateTime,
    /// Duration in minutes.
    #[validate(range(min = 15, max = 1440))]
    pub time_limit: u32,
    /// Seat count.
    #[validate(range(min = 2))]
    pub max_participants: u32,
    /// Open to everyone (default) or invitation-only.
    #[serde(default = "default_public")]
    pub is_public: bool,
    /// Optional prize description.
    #[serde(default)]
    #[validate(length(max = 200))]
    pub prize_pool: Option<String>,
    /// Friend to invite right away (friend challenge flow).
    #[serde(default)]
    #[validate(length(min = 1, max = 64))]
    pub invite_username: Option<String>,
}

fn default_public() -> bool {
    true
}

fn validate_create_request(request: &CreateCompetitionRequest) -> Result<(), ValidationError> {
    if request.competition_type == CompetitionType::OneVsOne && request.max_participants != 2 {
        let mut err = ValidationError::new("one_vs_one_seats");
        err.message = Some("1v1 competitions must have exactly 2 participants".into());
        return Err(err);
    }

    if request.start_time <= OffsetDateTime::now_utc() {
        let mut err = ValidationError::new("start_time_past");
        err.message = Some("startTime must be in the future".into());
        return Err(err);
    }

    if request.title.trim().is_empty() {
        let mut err = ValidationError::new("title_blank");
        err.message = Some("title must not be blank".into());
        return Err(err);
    }

    Ok(())
}

impl From<CreateCompetitionRequest> for NewCompetition {
    fn from(value: CreateCompetitionRequest) -> Self {
        Self {
            title: value.title.trim().to_owned(),
            description: value.description,
            competition_type: value.competition_type,
            challenge_id: value.challenge_id,
            start_time: value.start_time,
            time_limit_minutes: value.time_limit,
            max_participants: value.max_participants,
            is_public: value.is_public,
            prize_pool: value.prize_pool,
            invite_user: value.invite_username,
        }
    }
}

/// Request body of `POST /competitions/{id}/end`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndCompetitionRequest {
    /// Why the end is requested.
    pub trigger: EndTrigger,
}

/// Request body of `POST /competitions/{id}/invitations`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InviteRequest {
    /// User to invite.
    #[validate(length(min = 1, max = 64))]
    pub username: String,
}

/// Request body of `POST /competitions/{id}/invitations/respond`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RespondInvitationRequest {
    /// `true` to accept, `false` to decline.
    pub accept: bool,
}

/// Request body of `POST /competitions/{id}/chat`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// Message body; trimmed before storage.
    pub message: String,
}

/// Public view of a seat.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    /// Seat holder.
    pub username: String,
    /// Seat status.
    pub status: ParticipantStatus,
    /// Counted score.
    pub score: u32,
    /// Submissions made.
    pub submission_count: u32,
    /// Time of the counted submission.
    #[serde(default, with = "time::serde::rfc3339::option")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub last_submission_time: Option<OffsetDateTime>,
    /// Counted submission was automatic.
    pub auto_submitted: bool,
    /// When the seat was taken.
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub joined_at: OffsetDateTime,
}

impl From<&Participant> for ParticipantView {
    fn from(value: &Participant) -> Self {
        Self {
            username: value.user.clone(),
            status: value.status,
            score: value.score,
            submission_count: value.submission_count,
            last_submission_time: value.last_submission_time,
            auto_submitted: value.auto_submitted,
            joined_at: value.joined_at,
        }
    }
}

/// Frozen winner of a completed competition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WinnerView {
    /// Winning user.
    pub username: String,
    /// Winning score.
    pub score: u32,
    /// Time of the winning submission.
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub last_submission_time: OffsetDateTime,
}

impl From<&Winner> for WinnerView {
    fn from(value: &Winner) -> Self {
        Self {
            username: value.user.clone(),
            score: value.score,
            last_submission_time: value.last_submission_time,
        }
    }
}

/// Invitation state as seen by clients.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InvitationView {
    /// Invitee.
    pub username: String,
    /// Answer state.
    pub status: InvitationStatus,
    /// Issue time.
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub invited_at: OffsetDateTime,
    /// Answer time.
    #[serde(default, with = "time::serde::rfc3339::option")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub responded_at: Option<OffsetDateTime>,
}

impl From<&Invitation> for InvitationView {
    fn from(value: &Invitation) -> Self {
        Self {
            username: value.user.clone(),
            status: value.status,
            invited_at: value.invited_at,
            responded_at: value.responded_at,
        }
    }
}

/// Read-only snapshot of a competition handed to clients.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompetitionSnapshot {
    /// Identifier.
    pub id: Uuid,
    /// Display title.
    pub title: String,
    /// Free-form description.
    pub description: String,
    /// Format.
    #[serde(rename = "type")]
    pub competition_type: CompetitionType,
    /// External challenge reference.
    pub challenge_id: String,
    /// Creator username.
    pub creator: String,
    /// Lifecycle status.
    pub status: CompetitionStatus,
    /// Roster in join order.
    pub participants: Vec<ParticipantView>,
    /// Issued invitations.
    pub invitations: Vec<InvitationView>,
    /// Seat count.
    pub max_participants: u32,
    /// Duration in minutes.
    pub time_limit: u32,
    /// Scheduled start.
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub start_time: OffsetDateTime,
    /// Set once active.
    #[serde(default, with = "time::serde::rfc3339::option")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub actual_start_time: Option<OffsetDateTime>,
    /// `actualStartTime + timeLimit`.
    #[serde(default, with = "time::serde::rfc3339::option")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub deadline: Option<OffsetDateTime>,
    /// Open or invitation-only.
    pub is_public: bool,
    /// Optional prize description.
    pub prize_pool: Option<String>,
    /// Frozen winner once completed.
    pub winner: Option<WinnerView>,
    /// Why the competition ended.
    pub end_trigger: Option<EndTrigger>,
    /// When it ended.
    #[serde(default, with = "time::serde::rfc3339::option")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub ended_at: Option<OffsetDateTime>,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub created_at: OffsetDateTime,
    /// Transitions applied so far.
    pub version: u64,
}

impl CompetitionSnapshot {
    /// Seat of `username`, if any.
    pub fn participant(&self, username: &str) -> Option<&ParticipantView> {
        self.participants
            .iter()
            .find(|participant| participant.username == username)
    }
}

impl From<&CompetitionRecord> for CompetitionSnapshot {
    fn from(record: &CompetitionRecord) -> Self {
        let competition = &record.competition;
        Self {
            id: competition.id,
            title: competition.title.clone(),
            description: competition.description.clone(),
            competition_type: competition.competition_type,
            challenge_id: competition.challenge_id.clone(),
            creator: competition.creator.clone(),
            status: record.status(),
            participants: competition
                .participants
                .values()
                .map(ParticipantView::from)
                .collect(),
            invitations: competition
                .invitations
                .values()
                .map(InvitationView::from)
                .collect(),
            max_participants: competition.max_participants,
            time_limit: competition.time_limit_minutes,
            start_time: competition.start_time,
            actual_start_time: competition.actual_start_time,
            deadline: competition.deadline(),
            is_public: competition.is_public,
            prize_pool: competition.prize_pool.clone(),
            winner: competition.winner.as_ref().map(WinnerView::from),
            end_trigger: competition.end_trigger,
            ended_at: competition.ended_at,
            created_at: competition.created_at,
            version: record.machine.version(),
        }
    }
}

/// Outcome of an `end` request.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndCompetitionResponse {
    /// Competition after the request.
    pub competition: CompetitionSnapshot,
    /// Stored winner, if any.
    pub winner: Option<WinnerView>,
    /// Whether this request performed the `active → completed` transition.
    pub transitioned: bool,
}

/// Row of a leaderboard.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    /// 1-based position.
    pub rank: usize,
    /// Participant.
    pub username: String,
    /// Counted score.
    pub score: u32,
    /// Time of the counted submission.
    #[serde(default, with = "time::serde::rfc3339::option")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub last_submission_time: Option<OffsetDateTime>,
    /// Seat status.
    pub status: ParticipantStatus,
}

/// Chat line as returned by the history endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageView {
    /// Author.
    pub user: String,
    /// Body.
    pub message: String,
    /// Server receive time.
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub timestamp: OffsetDateTime,
}

impl From<&ChatMessage> for ChatMessageView {
    fn from(value: &ChatMessage) -> Self {
        Self {
            user: value.user.clone(),
            message: value.message.clone(),
            timestamp: value.timestamp,
        }
    }
}
