// Inbound frame routing.
//
// Each binary frame is decoded by its leading tag and handed to the
// owning sub-protocol. Anything that fails to decode or merge is
// dropped; the connection stays open.

use axum::body::Bytes;
use duet_common::protocol::frame::{encode_signal, encode_sync};
use duet_common::protocol::{decode_frame, Frame, FrameClass, FrameError};
use thiserror::Error;
use tracing::{debug, warn};

use crate::awareness::AwarenessError;
use crate::replica::ReplicaError;
use crate::room::Room;
use crate::ws::fanout;
use crate::ws::session::ConnectionSession;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Replica(#[from] ReplicaError),
    #[error(transparent)]
    Awareness(#[from] AwarenessError),
    #[error("failed to encode signal: {0}")]
    SignalEncode(serde_json::Error),
    #[error("sender closed before its {0} frame was applied")]
    SenderClosed(FrameClass),
}

impl RouteError {
    /// Metric label for the frame family the error belongs to.
    pub fn class_label(&self) -> &'static str {
        match self {
            Self::Frame(FrameError::Payload { class, .. }) => class.as_str(),
            Self::Frame(error) if error.is_signal() => FrameClass::Signal.as_str(),
            Self::Frame(_) => "invalid",
            Self::Replica(_) => FrameClass::Sync.as_str(),
            Self::Awareness(_) => FrameClass::Awareness.as_str(),
            Self::SignalEncode(_) => FrameClass::Signal.as_str(),
            Self::SenderClosed(class) => class.as_str(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteOutcome {
    pub class: FrameClass,
    /// A direct reply was enqueued for the sender.
    pub replied: bool,
    /// Number of other connections the frame was enqueued for.
    pub delivered: usize,
}

/// Route one inbound binary frame from `sender`.
///
/// Frames from a sender that was terminated while this frame waited on the
/// room lock are dropped, so nothing it sends can outlive its `leave`.
pub async fn route_frame(
    room: &Room,
    sender: &ConnectionSession,
    frame: Bytes,
) -> Result<RouteOutcome, RouteError> {
    let decoded = decode_frame(&frame)?;
    let class = decoded.class();

    let mut state = room.lock_state().await;
    if sender.is_terminated() {
        return Err(RouteError::SenderClosed(class));
    }

    match decoded {
        Frame::Sync(message) => {
            let reply = state.replica.apply_and_diff(message)?;
            let replied = match reply {
                Some(reply) => sender.send(encode_sync(reply).into()),
                None => false,
            };
            let delivered = fanout::broadcast(room, Some(sender.id()), frame).await;
            Ok(RouteOutcome { class, replied, delivered })
        }
        Frame::Awareness(update) => {
            state.awareness.apply_update(update, sender.id())?;
            let delivered = fanout::broadcast(room, Some(sender.id()), frame).await;
            Ok(RouteOutcome { class, replied: false, delivered })
        }
        Frame::Signal(mut envelope) => {
            // Encoded under the lock to keep signals ordered with the room's other frames.
            envelope.from = sender.client_identity().to_owned();
            let stamped: Bytes = encode_signal(&envelope).map_err(RouteError::SignalEncode)?.into();
            let delivered = match envelope.target() {
                Some(target) => {
                    let sent = fanout::send_to(room, sender.id(), target, stamped).await;
                    if !sent {
                        debug!(
                            room_id = %room.id(),
                            from = %sender.client_identity(),
                            to = target,
                            kind = envelope.kind.as_str(),
                            "signal target is not in the room"
                        );
                    }
                    usize::from(sent)
                }
                None => fanout::broadcast(room, Some(sender.id()), stamped).await,
            };
            Ok(RouteOutcome { class, replied: false, delivered })
        }
    }
}

/// Log a dropped frame at a level matching how interesting the failure is.
pub fn log_route_error(room: &Room, sender: &ConnectionSession, error: &RouteError) {
    match error {
        RouteError::Frame(frame_error) if frame_error.is_signal() => debug!(
            room_id = %room.id(),
            connection_id = %sender.id(),
            error = %frame_error,
            "dropping malformed signal"
        ),
        RouteError::SenderClosed(class) => debug!(
            room_id = %room.id(),
            connection_id = %sender.id(),
            class = class.as_str(),
            "dropping frame from closed connection"
        ),
        RouteError::Frame(frame_error) => warn!(
            room_id = %room.id(),
            connection_id = %sender.id(),
            error = %frame_error,
            "dropping undecodable frame"
        ),
        other => warn!(
            room_id = %room.id(),
            connection_id = %sender.id(),
            class = other.class_label(),
            error = %other,
            "dropping rejected frame"
        ),
    }
}
