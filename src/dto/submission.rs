use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dto::competition::{ParticipantView, WinnerView},
    state::state_machine::CompetitionStatus,
};

/// Body of `POST /competitions/{id}/submissions`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    /// Editor buffer at submission time.
    #[validate(length(max = 200000))]
    pub code: String,
    /// Language identifier understood by the scorer.
    #[validate(length(min = 1, max = 32))]
    pub language: String,
    /// Sent by the countdown expiry rather than the user.
    #[serde(default)]
    pub is_auto_submitted: bool,
    /// Score computed by an external runner. Ignored unless `trust_reported_scores` is on.
    #[serde(default)]
    #[validate(range(max = 1000))]
    pub reported_score: Option<u32>,
}

/// Outcome of a counted submission.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResponse {
    /// Score assigned to this submission.
    pub score: u32,
    /// Participant after bookkeeping.
    pub participant: ParticipantView,
    /// Competition status after the submission.
    pub status: CompetitionStatus,
    /// Set when this submission completed the competition.
    pub winner: Option<WinnerView>,
}
