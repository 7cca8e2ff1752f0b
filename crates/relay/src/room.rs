// Room registry.
//
// A room is the unit of isolation: one replica, one awareness registry
// and the set of connections currently joined. Rooms are created on
// first reference and live for the rest of the process.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::info;

use crate::awareness::AwarenessRegistry;
use crate::metrics;
use crate::replica::ReplicaHandle;
use crate::ws::session::{ConnectionId, ConnectionSession};

pub const DEFAULT_ROOM_ID: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(Arc<str>);

impl RoomId {
    /// A blank id names the default room.
    pub fn new(id: impl AsRef<str>) -> Self {
        let id = id.as_ref();
        if id.is_empty() {
            Self(Arc::from(DEFAULT_ROOM_ID))
        } else {
            Self(Arc::from(id))
        }
    }

    /// Derive a room id from a request path by dropping its leading `/`.
    pub fn from_path(path: &str) -> Self {
        Self::new(path.strip_prefix('/').unwrap_or(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Document and presence state, mutated only under the room lock.
pub struct RoomState {
    pub replica: ReplicaHandle,
    pub awareness: AwarenessRegistry,
}

pub struct Room {
    id: RoomId,
    created_at: DateTime<Utc>,
    state: Mutex<RoomState>,
    connections: RwLock<HashMap<ConnectionId, Arc<ConnectionSession>>>,
}

impl Room {
    pub fn new(id: RoomId) -> Self {
        let replica = ReplicaHandle::new();
        let awareness = AwarenessRegistry::new(replica.doc().clone());
        Self {
            id,
            created_at: Utc::now(),
            state: Mutex::new(RoomState { replica, awareness }),
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Serializes every mutation of the room's replica and awareness.
    ///
    /// Frames produced by a mutation are enqueued while the guard is held,
    /// so all recipients observe one room's outbound frames in the same
    /// order. The connection set lock is only ever taken after this one.
    pub async fn lock_state(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock().await
    }

    pub(crate) async fn insert_connection(&self, session: Arc<ConnectionSession>) {
        self.connections.write().await.insert(session.id(), session);
    }

    pub(crate) async fn remove_connection(
        &self,
        id: ConnectionId,
    ) -> Option<Arc<ConnectionSession>> {
        self.connections.write().await.remove(&id)
    }

    pub async fn connections(&self) -> Vec<Arc<ConnectionSession>> {
        self.connections.read().await.values().cloned().collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn find_by_identity(&self, identity: &str) -> Option<Arc<ConnectionSession>> {
        self.connections
            .read()
            .await
            .values()
            .find(|session| session.client_identity() == identity)
            .cloned()
    }
}

#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<RoomId, Arc<Room>>>,
}

impl RoomRegistry {
    /// Return the room named `id`, creating it if this is the first reference.
    ///
    /// Concurrent first references observe the same room.
    pub async fn resolve(&self, id: &RoomId) -> Arc<Room> {
        if let Some(room) = self.rooms.read().await.get(id) {
            return Arc::clone(room);
        }

        let mut rooms = self.rooms.write().await;
        match rooms.entry(id.clone()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let room = Arc::new(Room::new(id.clone()));
                entry.insert(Arc::clone(&room));
                metrics::increment_rooms_created();
                info!(room_id = %id, rooms = rooms.len(), "room created");
                room
            }
        }
    }

    /// Look up a room without creating it.
    pub async fn get(&self, id: &RoomId) -> Option<Arc<Room>> {
        self.rooms.read().await.get(id).cloned()
    }

    pub async fn rooms(&self) -> Vec<Arc<Room>> {
        self.rooms.read().await.values().cloned().collect()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
