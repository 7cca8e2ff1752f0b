// Outbound delivery to the connections of one room.

use axum::body::Bytes;
use tracing::debug;

use crate::room::Room;
use crate::ws::session::ConnectionId;

/// Enqueue `frame` for every writable connection in `room` except `exclude`.
///
/// Connections that are closing are skipped without error. Returns the
/// number of connections the frame was enqueued for.
pub async fn broadcast(room: &Room, exclude: Option<ConnectionId>, frame: Bytes) -> usize {
    let recipients = room.connections().await;

    let mut sent_count = 0;
    for recipient in recipients {
        if Some(recipient.id()) == exclude {
            continue;
        }
        if recipient.send(frame.clone()) {
            sent_count += 1;
        } else {
            debug!(
                room_id = %room.id(),
                connection_id = %recipient.id(),
                "skipping connection that is no longer writable"
            );
        }
    }

    sent_count
}

/// Enqueue `frame` for the single connection whose identity is `identity`.
///
/// The sender itself is never a valid target. Returns whether the frame
/// was enqueued.
pub async fn send_to(room: &Room, sender: ConnectionId, identity: &str, frame: Bytes) -> bool {
    match room.find_by_identity(identity).await {
        Some(recipient) if recipient.id() != sender => recipient.send(frame),
        _ => false,
    }
}
