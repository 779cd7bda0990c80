use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Code Arena Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::room_stream,
        crate::routes::websocket::ws_handler,
        crate::routes::competitions::create_competition,
        crate::routes::competitions::list_competitions,
        crate::routes::competitions::get_competition,
        crate::routes::competitions::delete_competition,
        crate::routes::competitions::leaderboard,
        crate::routes::competitions::join_competition,
        crate::routes::competitions::leave_competition,
        crate::routes::competitions::start_competition,
        crate::routes::competitions::submit_solution,
        crate::routes::competitions::end_competition,
        crate::routes::competitions::invite_user,
        crate::routes::competitions::respond_invitation,
        crate::routes::competitions::post_chat,
        crate::routes::competitions::chat_history,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::competition::CreateCompetitionRequest,
            crate::dto::competition::EndCompetitionRequest,
            crate::dto::competition::InviteRequest,
            crate::dto::competition::RespondInvitationRequest,
            crate::dto::competition::ChatRequest,
            crate::dto::competition::CompetitionSnapshot,
            crate::dto::competition::ParticipantView,
            crate::dto::competition::WinnerView,
            crate::dto::competition::InvitationView,
            crate::dto::competition::EndCompetitionResponse,
            crate::dto::competition::LeaderboardEntry,
            crate::dto::competition::ChatMessageView,
            crate::dto::submission::SubmitRequest,
            crate::dto::submission::SubmissionResponse,
            crate::dto::events::ParticipantJoinedEvent,
            crate::dto::events::ParticipantLeftEvent,
            crate::dto::events::CompetitionStartedEvent,
            crate::dto::events::SubmissionUpdateEvent,
            crate::dto::events::CompetitionEndedEvent,
            crate::dto::events::CompetitionCancelledEvent,
            crate::dto::events::ChatMessageEvent,
            crate::dto::sse::Handshake,
            crate::dto::sse::ResyncEvent,
            crate::dto::ws::RoomInboundMessage,
            crate::dto::ws::RoomOutboundMessage,
            crate::state::state_machine::CompetitionStatus,
            crate::state::state_machine::EndTrigger,
            crate::state::competition::CompetitionType,
            crate::state::competition::ParticipantStatus,
            crate::state::competition::InvitationStatus,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "competition", description = "Competition lifecycle, submissions, invitations and chat"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "rooms", description = "WebSocket room subscriptions"),
    )
)]
pub struct ApiDoc;
