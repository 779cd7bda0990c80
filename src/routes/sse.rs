use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;
use uuid::Uuid;

use crate::{error::AppError, services::sse_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/competitions/{id}/events",
    tag = "sse",
    params(("id" = String, Path, description = "Competition identifier")),
    responses(
        (status = 200, description = "Room event stream", content_type = "text/event-stream", body = String),
        (status = 404, description = "Unknown competition")
    )
)]
/// Stream the realtime events of one competition room.
pub async fn room_stream(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let (receiver, handshake) = sse_service::subscribe_room(&state, id).await?;
    info!(competition_id = %id, "new room SSE connection");
    Ok(sse_service::to_sse_stream(id, handshake, receiver))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/competitions/{id}/events", get(room_stream))
}
