// Per-connection session state and the room join/leave lifecycle.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use duet_common::protocol::frame::{encode_awareness, encode_state_summary};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::metrics;
use crate::room::{Room, RoomId, RoomRegistry};
use crate::ws::fanout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Work queued for a connection's socket writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Binary(Bytes),
    Ping,
}

/// One accepted WebSocket connection.
///
/// The socket task owns the receiving half of `outbound`; everything else
/// talks to the connection by enqueueing onto it.
#[derive(Debug)]
pub struct ConnectionSession {
    id: ConnectionId,
    room_id: RoomId,
    client_identity: String,
    is_alive: AtomicBool,
    terminated: AtomicBool,
    terminate_signal: Notify,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionSession {
    pub fn new(room_id: RoomId) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let id = ConnectionId::new();
        let (outbound, receiver) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            id,
            room_id,
            client_identity: id.to_string(),
            is_alive: AtomicBool::new(true),
            terminated: AtomicBool::new(false),
            terminate_signal: Notify::new(),
            outbound,
        });
        (session, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Stable identity other peers use to address this connection.
    pub fn client_identity(&self) -> &str {
        &self.client_identity
    }

    /// Whether frames enqueued now can still reach the socket.
    pub fn is_writable(&self) -> bool {
        !self.terminated.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }

    /// Enqueue a frame. Returns false when the connection is closing.
    pub fn send(&self, frame: Bytes) -> bool {
        self.is_writable() && self.outbound.send(Outbound::Binary(frame)).is_ok()
    }

    pub fn ping(&self) -> bool {
        self.is_writable() && self.outbound.send(Outbound::Ping).is_ok()
    }

    pub fn is_alive(&self) -> bool {
        self.is_alive.load(Ordering::SeqCst)
    }

    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::SeqCst);
    }

    /// Clear the alive flag ahead of a probe, returning its previous value.
    pub fn begin_probe(&self) -> bool {
        self.is_alive.swap(false, Ordering::SeqCst)
    }

    pub fn terminate(&self) {
        if !self.terminated.swap(true, Ordering::SeqCst) {
            self.terminate_signal.notify_one();
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Resolves once [`terminate`](Self::terminate) has been called.
    pub async fn terminated(&self) {
        if self.is_terminated() {
            return;
        }
        self.terminate_signal.notified().await;
    }
}

/// A connection registered in its room, plus the queue its writer drains.
pub struct JoinedSession {
    pub room: Arc<Room>,
    pub session: Arc<ConnectionSession>,
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
}

/// Register a new connection in `room_id`, creating the room on first use.
///
/// The joiner's queue is primed with the replica's state summary and the
/// full awareness snapshot before any broadcast can reach it.
pub async fn join(registry: &RoomRegistry, room_id: RoomId) -> JoinedSession {
    let room = registry.resolve(&room_id).await;
    let (session, outbound) = ConnectionSession::new(room_id);

    {
        let state = room.lock_state().await;
        session.send(encode_state_summary(state.replica.state_summary()).into());
        match state.awareness.full_snapshot() {
            Ok(snapshot) => {
                session.send(encode_awareness(snapshot).into());
            }
            Err(error) => {
                warn!(room_id = %room.id(), error = %error, "failed to encode awareness snapshot");
            }
        }
        room.insert_connection(Arc::clone(&session)).await;
    }

    metrics::connection_opened();
    info!(
        room_id = %room.id(),
        connection_id = %session.id(),
        "connection joined room"
    );

    JoinedSession { room, session, outbound }
}

/// Deregister a connection and retract the presence it introduced.
///
/// Safe to call more than once. Presence is cleared on every call; the
/// first call also closes the session and updates metrics.
pub async fn leave(room: &Room, session: &ConnectionSession) {
    let mut state = room.lock_state().await;
    let removed = room.remove_connection(session.id()).await.is_some();
    session.terminate();

    match state.awareness.remove_connection(session.id()) {
        Ok(Some(removal)) => {
            let delivered = fanout::broadcast(room, None, encode_awareness(removal).into()).await;
            debug!(
                room_id = %room.id(),
                connection_id = %session.id(),
                delivered,
                "broadcast awareness removal"
            );
        }
        Ok(None) => {}
        Err(error) => {
            warn!(
                room_id = %room.id(),
                connection_id = %session.id(),
                error = %error,
                "failed to encode awareness removal"
            );
        }
    }
    drop(state);

    if removed {
        metrics::connection_closed();
        info!(room_id = %room.id(), connection_id = %session.id(), "connection left room");
    }
}
