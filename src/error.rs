use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::{ValidationError, ValidationErrors};

use crate::{
    dao::storage::StorageError,
    state::{AbortError, ApplyError, PlanError},
};

/// Domain conflicts raised by competition lifecycle operations.
///
/// These never change state: the caller can re-read the competition and retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompetitionError {
    /// The user already holds an active seat in the competition.
    #[error("user already joined this competition")]
    AlreadyJoined,
    /// Every seat is taken.
    #[error("competition is full")]
    Full,
    /// The competition no longer accepts participants.
    #[error("competition is not open for joining")]
    NotJoinable,
    /// Private competition and the user holds no accepted invitation.
    #[error("user is not invited to this competition")]
    NotInvited,
    /// Only the creator may perform this action.
    #[error("only the competition creator may perform this action")]
    Forbidden,
    /// The competition has already left the pending state.
    #[error("competition is not pending")]
    NotPending,
    /// Not enough participants to start.
    #[error("competition needs at least {required} participant(s) to start")]
    InsufficientParticipants {
        /// Minimum number of participants required.
        required: usize,
    },
    /// Submissions are only accepted while the competition is active.
    #[error("competition is not active")]
    NotActive,
    /// The user has no active seat in the competition.
    #[error("user is not a participant of this competition")]
    NotParticipant,
    /// Active competitions must end before they can be deleted.
    #[error("competition can only be removed while pending or completed")]
    NotRemovable,
    /// The state machine rejected the requested transition.
    #[error("{0}")]
    InvalidTransition(String),
}

impl CompetitionError {
    /// Stable machine-readable code exposed in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            CompetitionError::AlreadyJoined => "ALREADY_JOINED",
            CompetitionError::Full => "FULL",
            CompetitionError::NotJoinable => "NOT_JOINABLE",
            CompetitionError::NotInvited => "NOT_INVITED",
            CompetitionError::Forbidden => "FORBIDDEN",
            CompetitionError::NotPending => "NOT_PENDING",
            CompetitionError::InsufficientParticipants { .. } => "INSUFFICIENT_PARTICIPANTS",
            CompetitionError::NotActive => "NOT_ACTIVE",
            CompetitionError::NotParticipant => "NOT_PARTICIPANT",
            CompetitionError::NotRemovable => "NOT_REMOVABLE",
            CompetitionError::InvalidTransition(_) => "INVALID_TRANSITION",
        }
    }
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Request carries no usable identity.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Lifecycle rule rejected the operation.
    #[error(transparent)]
    Competition(#[from] CompetitionError),
    /// The external scorer failed to grade a submission.
    #[error("scoring failed: {0}")]
    Scoring(String),
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::InvalidInput(format!("validation failed: {}", err))
    }
}

impl From<ValidationError> for ServiceError {
    fn from(err: ValidationError) -> Self {
        ServiceError::InvalidInput(err.to_string())
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Missing or unusable identity.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Lifecycle rule rejection carrying its stable code.
    #[error("{0}")]
    Rejected(CompetitionError),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Upstream collaborator failure.
    #[error("bad gateway: {0}")]
    BadGateway(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::InvalidState(message) => AppError::Conflict(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::Competition(err) => AppError::Rejected(err),
            ServiceError::Scoring(message) => AppError::BadGateway(message),
            ServiceError::Timeout => AppError::ServiceUnavailable("operation timed out".into()),
        }
    }
}

/// JSON error payload shared by every route.
#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl AppError {
    /// Stable machine-readable code, as carried in the error body.
    pub fn code(&self) -> &'static str {
        self.status_and_code().1
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            AppError::Rejected(err @ CompetitionError::Forbidden) => {
                (StatusCode::FORBIDDEN, err.code())
            }
            AppError::Rejected(err) => (StatusCode::CONFLICT, err.code()),
            AppError::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE"),
            AppError::BadGateway(_) => (StatusCode::BAD_GATEWAY, "SCORING_FAILED"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = self.status_and_code();

        let payload = Json(ErrorBody {
            code,
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

impl From<PlanError> for ServiceError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::AlreadyPending => {
                ServiceError::InvalidState("state transition already pending".into())
            }
            PlanError::InvalidTransition(invalid) => {
                CompetitionError::InvalidTransition(invalid.to_string()).into()
            }
        }
    }
}

impl From<ApplyError> for ServiceError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::NoPending => ServiceError::InvalidState("no transition is pending".into()),
            ApplyError::IdMismatch { .. } => {
                ServiceError::InvalidState("pending transition does not match".into())
            }
            ApplyError::StatusMismatch { expected, actual } => ServiceError::InvalidState(format!(
                "status changed during transition (expected {expected:?}, got {actual:?})"
            )),
            ApplyError::VersionMismatch { expected, actual } => {
                ServiceError::InvalidState(format!(
                    "state version mismatch during transition (expected {expected}, got {actual})"
                ))
            }
        }
    }
}

impl From<AbortError> for ServiceError {
    fn from(err: AbortError) -> Self {
        match err {
            AbortError::NoPending => ServiceError::InvalidState("no pending transition".into()),
            AbortError::IdMismatch { .. } => {
                ServiceError::InvalidState("transition plan does not match".into())
            }
        }
    }
}
