// Per-room presence registry.
//
// Wraps a yrs `Awareness` over the room document and remembers which
// awareness client ids each connection introduced, so a disconnect can
// clear exactly those entries.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use thiserror::Error;
use yrs::sync::{Awareness, AwarenessUpdate};
use yrs::Doc;

use crate::ws::session::ConnectionId;

/// Awareness client ids share the document client id space.
pub type AwarenessClientId = u64;

#[derive(Debug, Error)]
pub enum AwarenessError {
    #[error("failed to apply awareness update: {0}")]
    Apply(String),
    #[error("failed to encode awareness state: {0}")]
    Encode(String),
}

/// One live presence entry, as exposed to inspection endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresencePeer {
    pub client_id: AwarenessClientId,
    pub clock: u32,
    pub state: serde_json::Value,
}

pub struct AwarenessRegistry {
    awareness: Awareness,
    controlled: HashMap<ConnectionId, HashSet<AwarenessClientId>>,
}

impl AwarenessRegistry {
    pub fn new(doc: Doc) -> Self {
        Self { awareness: Awareness::new(doc), controlled: HashMap::new() }
    }

    /// Every live client state, for a joiner. Removed clients are omitted.
    pub fn full_snapshot(&self) -> Result<AwarenessUpdate, AwarenessError> {
        self.awareness.update().map_err(|error| AwarenessError::Encode(error.to_string()))
    }

    /// Merge a client-originated delta and attribute its entries to `origin`.
    ///
    /// Entries follow the usual awareness clock rules: a state replaces the
    /// stored one only when its clock is newer, and a null state at the
    /// current clock removes the entry. An id stays with the connection that
    /// first announced it, so another connection updating it cannot take
    /// over its cleanup. Returns the ids whose state changed.
    pub fn apply_update(
        &mut self,
        update: AwarenessUpdate,
        origin: ConnectionId,
    ) -> Result<Vec<AwarenessClientId>, AwarenessError> {
        let summary = self
            .awareness
            .apply_update_summary(update)
            .map_err(|error| AwarenessError::Apply(error.to_string()))?;
        let Some(summary) = summary else {
            return Ok(Vec::new());
        };

        for client_id in &summary.removed {
            for owned in self.controlled.values_mut() {
                owned.remove(client_id);
            }
        }

        let claimed: Vec<AwarenessClientId> = summary
            .added
            .iter()
            .chain(summary.updated.iter())
            .copied()
            .filter(|client_id| !self.owned_by_other(*client_id, origin))
            .collect();
        self.controlled.entry(origin).or_default().extend(claimed);

        Ok(summary.all_changes())
    }

    /// Drop a single client's state.
    pub fn remove_client(&mut self, client_id: AwarenessClientId) {
        self.awareness.remove_state(client_id);
        for owned in self.controlled.values_mut() {
            owned.remove(&client_id);
        }
    }

    /// Drop every state `origin` introduced and return the removal delta
    /// to broadcast, or `None` if the connection never announced any.
    pub fn remove_connection(
        &mut self,
        origin: ConnectionId,
    ) -> Result<Option<AwarenessUpdate>, AwarenessError> {
        let Some(owned) = self.controlled.remove(&origin) else {
            return Ok(None);
        };
        if owned.is_empty() {
            return Ok(None);
        }

        let mut client_ids: Vec<_> = owned.into_iter().collect();
        client_ids.sort_unstable();
        for client_id in &client_ids {
            self.awareness.remove_state(*client_id);
        }

        self.awareness
            .update_with_clients(client_ids)
            .map(Some)
            .map_err(|error| AwarenessError::Encode(error.to_string()))
    }

    fn owned_by_other(&self, client_id: AwarenessClientId, origin: ConnectionId) -> bool {
        self.controlled
            .iter()
            .any(|(connection, owned)| *connection != origin && owned.contains(&client_id))
    }

    pub fn controlled_by(&self, origin: ConnectionId) -> Vec<AwarenessClientId> {
        let mut ids: Vec<_> =
            self.controlled.get(&origin).map(|owned| owned.iter().copied().collect()).unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Live (non-removed) presence entries, ordered by client id.
    pub fn peers(&self) -> Vec<PresencePeer> {
        let mut peers: Vec<PresencePeer> = self
            .awareness
            .iter()
            .filter_map(|(client_id, state)| {
                let raw = state.data?;
                let value: serde_json::Value = serde_json::from_str(raw.as_ref()).ok()?;
                if value.is_null() {
                    return None;
                }
                Some(PresencePeer { client_id, clock: state.clock, state: value })
            })
            .collect();
        peers.sort_by_key(|peer| peer.client_id);
        peers
    }
}
