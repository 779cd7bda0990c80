use std::future::Future;

use futures::{future::BoxFuture, stream::BoxStream};
use thiserror::Error;
use tracing::warn;

use crate::{
    dto::{
        competition::{CompetitionSnapshot, EndCompetitionResponse},
        events::RoomEvent,
        submission::{SubmissionResponse, SubmitRequest},
    },
    error::{AppError, ServiceError},
    state::{competition::CompetitionId, state_machine::EndTrigger},
};

/// Failure seen by a client talking to the competition backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The request did not get an authoritative answer; it may be retried.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The backend refused the request.
    #[error("{code}: {message}")]
    Rejected {
        /// Stable error code, e.g. `NOT_ACTIVE`.
        code: String,
        /// Human-readable reason.
        message: String,
    },
}

impl ApiError {
    /// Whether repeating the request could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Transport(_))
    }

    /// Stable code of a rejection.
    pub fn code(&self) -> Option<&str> {
        match self {
            ApiError::Rejected { code, .. } => Some(code),
            ApiError::Transport(_) => None,
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(_) | ServiceError::Degraded | ServiceError::Timeout => {
                ApiError::Transport(err.to_string())
            }
            other => {
                let app = AppError::from(other);
                ApiError::Rejected {
                    code: app.code().to_owned(),
                    message: app.to_string(),
                }
            }
        }
    }
}

/// Item of a room subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomSignal {
    /// A room event; treat it as a hint to re-fetch.
    Event(RoomEvent),
    /// Events were missed; re-fetch.
    Resync,
}

/// Stream of room signals; ends when the room or the connection closes.
pub type RoomStream = BoxStream<'static, RoomSignal>;

/// Calls a competition view needs, made on behalf of one user.
pub trait CompetitionApi: Send + Sync {
    /// Authoritative snapshot.
    fn fetch(&self, id: CompetitionId) -> BoxFuture<'static, Result<CompetitionSnapshot, ApiError>>;
    /// Submit a solution as the acting user.
    fn submit(
        &self,
        id: CompetitionId,
        request: SubmitRequest,
    ) -> BoxFuture<'static, Result<SubmissionResponse, ApiError>>;
    /// Request the end of the competition.
    fn end(
        &self,
        id: CompetitionId,
        trigger: EndTrigger,
    ) -> BoxFuture<'static, Result<EndCompetitionResponse, ApiError>>;
    /// Subscribe to the competition room.
    fn subscribe(&self, id: CompetitionId) -> BoxFuture<'static, Result<RoomStream, ApiError>>;
}

/// Run `op`, repeating it once when the first attempt fails with a transport error.
pub async fn with_single_retry<T, F, Fut>(what: &str, mut op: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    match op().await {
        Err(err) if err.is_retryable() => {
            warn!(operation = what, error = %err, "request failed; retrying once");
            op().await
        }
        other => other,
    }
}
