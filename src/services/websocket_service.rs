use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{
    sync::{
        broadcast::error::RecvError,
        mpsc,
    },
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    dto::{
        events::RoomEvent,
        validation::validate_username,
        ws::{RoomInboundMessage, RoomOutboundMessage},
    },
    error::{AppError, ServiceError},
    services::competition_service,
    state::{SharedState, competition::CompetitionId},
};

const IDENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Failures while serving a room socket, distinct from HTTP-facing errors.
#[derive(Debug, Error)]
enum RoomSocketError {
    /// Writer channel closed; the connection must be torn down.
    #[error("connection closed")]
    ConnectionClosed,
    /// Chat attempted by a socket that joined without a user.
    #[error("chat requires a user in join_room")]
    Anonymous,
    /// Operation rejected by the service layer.
    #[error(transparent)]
    Service(#[from] ServiceError),
}

struct RoomSession {
    competition_id: CompetitionId,
    user: Option<String>,
}

/// Handle the full lifecycle of a room WebSocket connection.
///
/// The first frame must be `join_room` and arrive within ten seconds. The socket
/// then receives every event of that room and may post chat lines.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let initial_message = match tokio::time::timeout(IDENT_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(Message::Close(_)))) => {
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Ok(_))) => {
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Err(err))) => {
            warn!(error = %err, "websocket receive error");
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(None) | Err(_) => {
            warn!("websocket join timed out");
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let session = match join_room(&state, &initial_message).await {
        Ok(session) => session,
        Err(err) => {
            warn!(error = %err, "rejecting room websocket");
            let _ = send_error(&outbound_tx, err);
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };
    let competition_id = session.competition_id;

    // Subscribe before acknowledging so nothing published after `joined` is missed.
    let (mut room, status) = match state.join_room(competition_id).await {
        Ok((room, record)) => (room, record.status()),
        Err(err) => {
            let _ = send_error(&outbound_tx, RoomSocketError::from(err));
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };
    let joined = RoomOutboundMessage::Joined {
        competition_id,
        status,
    };
    if send_message_to_websocket(&outbound_tx, &joined).is_err() {
        finalize(writer_task, outbound_tx).await;
        return;
    }

    info!(competition_id = %competition_id, user = ?session.user, "room websocket joined");

    loop {
        tokio::select! {
            inbound = receiver.next() => {
                let Some(message) = inbound else { break };
                match message {
                    Ok(Message::Text(text)) => {
                        if let Err(err) = handle_text(&state, &session, &text).await {
                            if matches!(err, RoomSocketError::ConnectionClosed) {
                                break;
                            }
                            warn!(competition_id = %competition_id, error = %err, "room websocket request failed");
                            if send_error(&outbound_tx, err).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        let _ = outbound_tx.send(Message::Pong(payload));
                    }
                    Ok(Message::Close(frame)) => {
                        let _ = outbound_tx.send(Message::Close(frame));
                        break;
                    }
                    Ok(Message::Binary(_)) | Ok(Message::Pong(_)) => {}
                    Err(err) => {
                        warn!(competition_id = %competition_id, error = %err, "websocket error");
                        break;
                    }
                }
            }
            event = room.recv() => {
                if forward_room_event(competition_id, event, &outbound_tx).is_err() {
                    break;
                }
            }
        }
    }

    info!(competition_id = %competition_id, "room websocket disconnected");
    finalize(writer_task, outbound_tx).await;
}

async fn join_room(state: &SharedState, text: &str) -> Result<RoomSession, RoomSocketError> {
    let inbound = RoomInboundMessage::from_json_str(text)
        .map_err(|err| ServiceError::InvalidInput(err.to_string()))?;

    let RoomInboundMessage::JoinRoom {
        competition_id,
        user,
    } = inbound
    else {
        return Err(ServiceError::InvalidInput("first message must be join_room".into()).into());
    };

    if let Some(user) = user.as_deref() {
        validate_username(user).map_err(|err| ServiceError::Unauthorized(err.to_string()))?;
    }
    state.read_competition(competition_id).await?;

    Ok(RoomSession {
        competition_id,
        user,
    })
}

async fn handle_text(
    state: &SharedState,
    session: &RoomSession,
    text: &str,
) -> Result<(), RoomSocketError> {
    let message = RoomInboundMessage::from_json_str(text)
        .map_err(|err| ServiceError::InvalidInput(err.to_string()))?;

    match message {
        RoomInboundMessage::Chat { message } => {
            let user = session.user.as_deref().ok_or(RoomSocketError::Anonymous)?;
            // the resulting chatMessage event reaches this socket through the room
            competition_service::post_chat(state, session.competition_id, user, &message).await?;
            Ok(())
        }
        RoomInboundMessage::JoinRoom { .. } => {
            debug!(competition_id = %session.competition_id, "ignoring duplicate join_room");
            Ok(())
        }
        RoomInboundMessage::Unknown => {
            debug!(competition_id = %session.competition_id, "ignoring unknown message");
            Ok(())
        }
    }
}

fn forward_room_event(
    competition_id: CompetitionId,
    event: Result<RoomEvent, RecvError>,
    tx: &mpsc::UnboundedSender<Message>,
) -> Result<(), RoomSocketError> {
    match event {
        Ok(event) => send_message_to_websocket(tx, &event),
        Err(RecvError::Lagged(missed)) => {
            debug!(competition_id = %competition_id, missed, "room websocket lagged");
            send_message_to_websocket(tx, &RoomOutboundMessage::Resync { missed })
        }
        // room closed after cancellation
        Err(RecvError::Closed) => Err(RoomSocketError::ConnectionClosed),
    }
}

fn send_error(
    tx: &mpsc::UnboundedSender<Message>,
    err: RoomSocketError,
) -> Result<(), RoomSocketError> {
    let (code, message) = match err {
        RoomSocketError::Service(service) => {
            let app = AppError::from(service);
            (app.code().to_string(), app.to_string())
        }
        other => ("BAD_REQUEST".to_string(), other.to_string()),
    };
    send_message_to_websocket(tx, &RoomOutboundMessage::Error { code, message })
}

/// Serialize a payload and push it onto the provided WebSocket sender.
///
/// Serialization failures are logged and swallowed; a closed writer is reported.
fn send_message_to_websocket<T>(
    tx: &mpsc::UnboundedSender<Message>,
    value: &T,
) -> Result<(), RoomSocketError>
where
    T: ?Sized + serde::Serialize + std::fmt::Debug,
{
    let payload = match serde_json::to_string(value) {
        Ok(p) => p,
        Err(err) => {
            warn!(error = %err, "failed to serialize message `{value:?}`");
            return Ok(());
        }
    };

    tx.send(Message::Text(payload.into()))
        .map_err(|_| RoomSocketError::ConnectionClosed)
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
