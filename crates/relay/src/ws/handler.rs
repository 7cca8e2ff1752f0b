use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::Uri,
    response::IntoResponse,
};
use tracing::{debug, warn};

use crate::metrics;
use crate::room::RoomId;
use crate::ws::router::{log_route_error, route_frame};
use crate::ws::session::{self, ConnectionSession, JoinedSession, Outbound};
use crate::RelayState;

pub(crate) async fn ws_route(
    ws: WebSocketUpgrade,
    State(state): State<RelayState>,
    uri: Uri,
) -> impl IntoResponse {
    let room_id = RoomId::from_path(uri.path());
    ws.max_message_size(state.max_frame_bytes)
        .max_frame_size(state.max_frame_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state, room_id))
}

async fn handle_socket(mut socket: WebSocket, state: RelayState, room_id: RoomId) {
    let JoinedSession { room, session, mut outbound } = session::join(&state.rooms, room_id).await;

    loop {
        tokio::select! {
            _ = session.terminated() => break,
            queued = outbound.recv() => {
                let Some(queued) = queued else {
                    break;
                };
                let message = match queued {
                    Outbound::Binary(frame) => Message::Binary(frame),
                    Outbound::Ping => Message::Ping(Bytes::new()),
                };
                if !send_unless_terminated(&mut socket, &session, message).await {
                    break;
                }
            }
            incoming = socket.recv() => {
                let Some(incoming) = incoming else {
                    break;
                };
                let message = match incoming {
                    Ok(message) => message,
                    Err(error) => {
                        debug!(connection_id = %session.id(), error = %error, "websocket read failed");
                        break;
                    }
                };

                match message {
                    Message::Binary(frame) => {
                        let started_at = Instant::now();
                        match route_frame(&room, &session, frame).await {
                            Ok(outcome) => metrics::record_ws_request(
                                outcome.class.as_str(),
                                false,
                                started_at.elapsed().as_millis() as u64,
                            ),
                            Err(error) => {
                                log_route_error(&room, &session, &error);
                                metrics::record_ws_request(
                                    error.class_label(),
                                    true,
                                    started_at.elapsed().as_millis() as u64,
                                );
                            }
                        }
                    }
                    Message::Text(_) => {
                        warn!(
                            room_id = %room.id(),
                            connection_id = %session.id(),
                            "dropping text frame"
                        );
                        metrics::record_ws_request("invalid", true, 0);
                    }
                    Message::Pong(_) => session.mark_alive(),
                    Message::Ping(payload) => {
                        session.mark_alive();
                        if !send_unless_terminated(&mut socket, &session, Message::Pong(payload)).await {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                }
            }
        }
    }

    session::leave(&room, &session).await;
}

/// Write one message, giving up early if the session is terminated while
/// the write is stalled on a peer that stopped reading.
async fn send_unless_terminated(
    socket: &mut WebSocket,
    session: &ConnectionSession,
    message: Message,
) -> bool {
    tokio::select! {
        sent = socket.send(message) => sent.is_ok(),
        _ = session.terminated() => false,
    }
}
