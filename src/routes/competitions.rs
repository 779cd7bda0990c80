use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::{
        competition::{
            ChatMessageView, ChatRequest, CompetitionSnapshot, CreateCompetitionRequest,
            EndCompetitionRequest, EndCompetitionResponse, InviteRequest, LeaderboardEntry,
            RespondInvitationRequest,
        },
        submission::{SubmissionResponse, SubmitRequest},
    },
    error::AppError,
    routes::session::ActingUser,
    services::{competition_service, submission_service},
    state::{SharedState, state_machine::EndTrigger},
};

/// Competition lifecycle, submission, invitation and chat endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/competitions", get(list_competitions).post(create_competition))
        .route(
            "/competitions/{id}",
            get(get_competition).delete(delete_competition),
        )
        .route("/competitions/{id}/leaderboard", get(leaderboard))
        .route("/competitions/{id}/join", post(join_competition))
        .route("/competitions/{id}/leave", post(leave_competition))
        .route("/competitions/{id}/start", post(start_competition))
        .route("/competitions/{id}/submissions", post(submit_solution))
        .route("/competitions/{id}/end", post(end_competition))
        .route("/competitions/{id}/invitations", post(invite_user))
        .route(
            "/competitions/{id}/invitations/respond",
            post(respond_invitation),
        )
        .route("/competitions/{id}/chat", get(chat_history).post(post_chat))
}

/// Create a competition owned by the acting user.
#[utoipa::path(
    post,
    path = "/competitions",
    tag = "competition",
    params(("X-User-Id" = String, Header, description = "Acting user")),
    request_body = CreateCompetitionRequest,
    responses(
        (status = 200, description = "Competition created", body = CompetitionSnapshot),
        (status = 400, description = "Invalid competition settings")
    )
)]
pub async fn create_competition(
    State(state): State<SharedState>,
    user: ActingUser,
    Json(payload): Json<CreateCompetitionRequest>,
) -> Result<Json<CompetitionSnapshot>, AppError> {
    Ok(Json(
        competition_service::create(&state, user.name(), payload).await?,
    ))
}

/// List competitions that were not deleted.
#[utoipa::path(
    get,
    path = "/competitions",
    tag = "competition",
    responses((status = 200, description = "Known competitions", body = [CompetitionSnapshot]))
)]
pub async fn list_competitions(
    State(state): State<SharedState>,
) -> Result<Json<Vec<CompetitionSnapshot>>, AppError> {
    Ok(Json(competition_service::list(&state).await?))
}

/// Retrieve a competition snapshot.
#[utoipa::path(
    get,
    path = "/competitions/{id}",
    tag = "competition",
    params(("id" = String, Path, description = "Competition identifier")),
    responses(
        (status = 200, description = "Competition", body = CompetitionSnapshot),
        (status = 404, description = "Unknown competition")
    )
)]
pub async fn get_competition(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CompetitionSnapshot>, AppError> {
    Ok(Json(competition_service::get(&state, id).await?))
}

/// Delete a pending or completed competition.
#[utoipa::path(
    delete,
    path = "/competitions/{id}",
    tag = "competition",
    params(
        ("X-User-Id" = String, Header, description = "Acting user"),
        ("id" = String, Path, description = "Competition identifier")
    ),
    responses(
        (status = 204, description = "Competition deleted"),
        (status = 403, description = "Only the creator may delete"),
        (status = 409, description = "Competition is running")
    )
)]
pub async fn delete_competition(
    State(state): State<SharedState>,
    user: ActingUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    competition_service::remove(&state, id, user.name()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Ranked standings of the seated participants.
#[utoipa::path(
    get,
    path = "/competitions/{id}/leaderboard",
    tag = "competition",
    params(("id" = String, Path, description = "Competition identifier")),
    responses((status = 200, description = "Leaderboard", body = [LeaderboardEntry]))
)]
pub async fn leaderboard(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<LeaderboardEntry>>, AppError> {
    Ok(Json(submission_service::leaderboard(&state, id).await?))
}

/// Take a seat in a pending competition.
#[utoipa::path(
    post,
    path = "/competitions/{id}/join",
    tag = "competition",
    params(
        ("X-User-Id" = String, Header, description = "Acting user"),
        ("id" = String, Path, description = "Competition identifier")
    ),
    responses(
        (status = 200, description = "Joined", body = CompetitionSnapshot),
        (status = 409, description = "ALREADY_JOINED, FULL, NOT_JOINABLE or NOT_INVITED")
    )
)]
pub async fn join_competition(
    State(state): State<SharedState>,
    user: ActingUser,
    Path(id): Path<Uuid>,
) -> Result<Json<CompetitionSnapshot>, AppError> {
    Ok(Json(competition_service::join(&state, id, user.name()).await?))
}

/// Give up a seat.
#[utoipa::path(
    post,
    path = "/competitions/{id}/leave",
    tag = "competition",
    params(
        ("X-User-Id" = String, Header, description = "Acting user"),
        ("id" = String, Path, description = "Competition identifier")
    ),
    responses((status = 200, description = "Left", body = CompetitionSnapshot))
)]
pub async fn leave_competition(
    State(state): State<SharedState>,
    user: ActingUser,
    Path(id): Path<Uuid>,
) -> Result<Json<CompetitionSnapshot>, AppError> {
    Ok(Json(competition_service::leave(&state, id, user.name()).await?))
}

/// Start a pending competition; creator only.
#[utoipa::path(
    post,
    path = "/competitions/{id}/start",
    tag = "competition",
    params(
        ("X-User-Id" = String, Header, description = "Acting user"),
        ("id" = String, Path, description = "Competition identifier")
    ),
    responses(
        (status = 200, description = "Competition active", body = CompetitionSnapshot),
        (status = 403, description = "Only the creator may start"),
        (status = 409, description = "NOT_PENDING or INSUFFICIENT_PARTICIPANTS")
    )
)]
pub async fn start_competition(
    State(state): State<SharedState>,
    user: ActingUser,
    Path(id): Path<Uuid>,
) -> Result<Json<CompetitionSnapshot>, AppError> {
    Ok(Json(competition_service::start(&state, id, user.name()).await?))
}

/// Submit a solution for the acting participant.
#[utoipa::path(
    post,
    path = "/competitions/{id}/submissions",
    tag = "competition",
    params(
        ("X-User-Id" = String, Header, description = "Acting user"),
        ("id" = String, Path, description = "Competition identifier")
    ),
    request_body = SubmitRequest,
    responses(
        (status = 200, description = "Submission counted", body = SubmissionResponse),
        (status = 409, description = "NOT_ACTIVE or NOT_PARTICIPANT")
    )
)]
pub async fn submit_solution(
    State(state): State<SharedState>,
    user: ActingUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<SubmitRequest>,
) -> Result<Json<SubmissionResponse>, AppError> {
    Ok(Json(
        submission_service::submit(&state, id, user.name(), payload).await?,
    ))
}

/// End an active competition. Ending a finished competition is a no-op.
#[utoipa::path(
    post,
    path = "/competitions/{id}/end",
    tag = "competition",
    params(
        ("X-User-Id" = Option<String>, Header, description = "Acting user; required for creatorManual"),
        ("id" = String, Path, description = "Competition identifier")
    ),
    request_body = EndCompetitionRequest,
    responses(
        (status = 200, description = "Competition outcome", body = EndCompetitionResponse),
        (status = 403, description = "Manual end by someone other than the creator")
    )
)]
pub async fn end_competition(
    State(state): State<SharedState>,
    user: Option<ActingUser>,
    Path(id): Path<Uuid>,
    Json(payload): Json<EndCompetitionRequest>,
) -> Result<Json<EndCompetitionResponse>, AppError> {
    let requester = user.as_ref().map(ActingUser::name);
    if payload.trigger == EndTrigger::CreatorManual && requester.is_none() {
        return Err(AppError::Unauthorized(
            "manual end requires the `X-User-Id` header".into(),
        ));
    }
    Ok(Json(
        competition_service::end(&state, id, requester, payload.trigger).await?,
    ))
}

/// Invite a user to a competition; creator only.
#[utoipa::path(
    post,
    path = "/competitions/{id}/invitations",
    tag = "competition",
    params(
        ("X-User-Id" = String, Header, description = "Acting user"),
        ("id" = String, Path, description = "Competition identifier")
    ),
    request_body = InviteRequest,
    responses((status = 200, description = "Invitation issued", body = CompetitionSnapshot))
)]
pub async fn invite_user(
    State(state): State<SharedState>,
    user: ActingUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<InviteRequest>,
) -> Result<Json<CompetitionSnapshot>, AppError> {
    payload.validate()?;
    Ok(Json(
        competition_service::invite(&state, id, user.name(), &payload.username).await?,
    ))
}

/// Accept or decline an invitation.
#[utoipa::path(
    post,
    path = "/competitions/{id}/invitations/respond",
    tag = "competition",
    params(
        ("X-User-Id" = String, Header, description = "Acting user"),
        ("id" = String, Path, description = "Competition identifier")
    ),
    request_body = RespondInvitationRequest,
    responses((status = 200, description = "Invitation answered", body = CompetitionSnapshot))
)]
pub async fn respond_invitation(
    State(state): State<SharedState>,
    user: ActingUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<RespondInvitationRequest>,
) -> Result<Json<CompetitionSnapshot>, AppError> {
    Ok(Json(
        competition_service::respond_invitation(&state, id, user.name(), payload.accept).await?,
    ))
}

/// Post a chat line to the competition room.
#[utoipa::path(
    post,
    path = "/competitions/{id}/chat",
    tag = "competition",
    params(
        ("X-User-Id" = String, Header, description = "Acting user"),
        ("id" = String, Path, description = "Competition identifier")
    ),
    request_body = ChatRequest,
    responses((status = 200, description = "Message stored", body = ChatMessageView))
)]
pub async fn post_chat(
    State(state): State<SharedState>,
    user: ActingUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatMessageView>, AppError> {
    Ok(Json(
        competition_service::post_chat(&state, id, user.name(), &payload.message).await?,
    ))
}

/// Chat history, oldest first.
#[utoipa::path(
    get,
    path = "/competitions/{id}/chat",
    tag = "competition",
    params(("id" = String, Path, description = "Competition identifier")),
    responses((status = 200, description = "Chat log", body = [ChatMessageView]))
)]
pub async fn chat_history(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ChatMessageView>>, AppError> {
    Ok(Json(competition_service::chat_history(&state, id).await?))
}
