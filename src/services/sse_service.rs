use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::{
    dto::{
        events::RoomEvent,
        sse::{Handshake, ResyncEvent, ServerEvent},
    },
    error::ServiceError,
    state::{SharedState, competition::CompetitionId},
};

const EVENT_HANDSHAKE: &str = "handshake";
const EVENT_RESYNC: &str = "resync";

/// Subscribe to the room of competition `id`, returning the receiver and the
/// handshake to send first. Unknown competitions are rejected; finished ones
/// get the handshake and a stream that ends right after it.
pub async fn subscribe_room(
    state: &SharedState,
    id: CompetitionId,
) -> Result<(broadcast::Receiver<RoomEvent>, ServerEvent), ServiceError> {
    let (receiver, record) = state.join_room(id).await?;
    let handshake = ServerEvent::json(
        Some(EVENT_HANDSHAKE.to_string()),
        &Handshake {
            competition_id: id,
            status: record.status(),
            degraded: state.is_degraded(),
        },
    )
    .map_err(|err| ServiceError::InvalidState(err.to_string()))?;
    Ok((receiver, handshake))
}

/// Convert a room receiver into an SSE response, forwarding events and
/// cleaning up once the client disconnects.
///
/// A subscriber that falls behind gets a `resync` event telling it to re-fetch.
pub fn to_sse_stream(
    id: CompetitionId,
    handshake: ServerEvent,
    mut receiver: broadcast::Receiver<RoomEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    // forwarder task: reads from broadcast and pushes into mpsc
    tokio::spawn(async move {
        if tx.send(Ok(to_event(handshake))).await.is_err() {
            return;
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    let frame = match recv_result {
                        Ok(room_event) => match room_event.to_server_event() {
                            Ok(frame) => frame,
                            Err(err) => {
                                warn!(competition_id = %id, error = %err, "failed to serialise room event");
                                continue;
                            }
                        },
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(missed)) => {
                            debug!(competition_id = %id, missed, "SSE subscriber lagged");
                            match ServerEvent::json(Some(EVENT_RESYNC.to_string()), &ResyncEvent { missed }) {
                                Ok(frame) => frame,
                                Err(_) => continue,
                            }
                        }
                    };

                    if tx.send(Ok(to_event(frame))).await.is_err() {
                        break;
                    }
                }
            }
        }

        info!(competition_id = %id, "room SSE stream disconnected");
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn to_event(payload: ServerEvent) -> Event {
    let mut event = Event::default().data(payload.data);
    if let Some(name) = payload.event {
        event = event.event(name);
    }
    event
}
