// Authoritative per-room document replica.
//
// The relay keeps one yrs document per room. Clients converge against
// it through the sync sub-protocol; the bootstrap path writes into it
// directly and fans the resulting update out.

use thiserror::Error;
use yrs::sync::SyncMessage;
use yrs::updates::decoder::Decode;
use yrs::{
    Doc, GetString, Map, MapRef, ReadTxn, StateVector, Text, TextRef, Transact, TransactionMut,
    Update,
};

/// Shared text holding the editor buffer.
pub const PRIMARY_TEXT: &str = "monaco";
/// Shared map holding problem metadata written at bootstrap.
pub const META_MAP: &str = "meta";

#[derive(Debug, Error)]
pub enum ReplicaError {
    #[error("failed to decode document update: {0}")]
    Decode(#[from] yrs::encoding::read::Error),
    #[error("failed to apply document update: {0}")]
    Apply(String),
}

/// Handle to a room's document.
///
/// Cloning the handle shares the underlying document. Callers serialize
/// access through the owning room's state lock.
#[derive(Clone)]
pub struct ReplicaHandle {
    doc: Doc,
}

impl ReplicaHandle {
    pub fn new() -> Self {
        Self { doc: Doc::new() }
    }

    /// Create a replica with a fixed client id (for deterministic tests).
    pub fn with_client_id(client_id: u64) -> Self {
        Self { doc: Doc::with_client_id(client_id) }
    }

    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    /// Compact summary of everything this replica has observed.
    pub fn state_summary(&self) -> StateVector {
        self.doc.transact().state_vector()
    }

    /// Merge an incoming sync message.
    ///
    /// A state summary yields the delta the peer is missing. Deltas and
    /// updates are merged and yield nothing. Merging is idempotent, so
    /// replayed updates leave the replica unchanged.
    pub fn apply_and_diff(&self, message: SyncMessage) -> Result<Option<SyncMessage>, ReplicaError> {
        match message {
            SyncMessage::SyncStep1(remote) => {
                let delta = self.doc.transact().encode_state_as_update_v1(&remote);
                Ok(Some(SyncMessage::SyncStep2(delta)))
            }
            SyncMessage::SyncStep2(update) | SyncMessage::Update(update) => {
                self.apply_update(&update)?;
                Ok(None)
            }
        }
    }

    pub fn apply_update(&self, payload: &[u8]) -> Result<(), ReplicaError> {
        let update = Update::decode_v1(payload)?;
        self.doc
            .transact_mut()
            .apply_update(update)
            .map_err(|error| ReplicaError::Apply(error.to_string()))
    }

    /// Length of the primary text in the document's native units.
    pub fn text_len(&self) -> u32 {
        let text = self.doc.get_or_insert_text(PRIMARY_TEXT);
        text.len(&self.doc.transact())
    }

    pub fn text_content(&self) -> String {
        let text = self.doc.get_or_insert_text(PRIMARY_TEXT);
        text.get_string(&self.doc.transact())
    }

    pub fn meta_string(&self, key: &str) -> Option<String> {
        let meta = self.doc.get_or_insert_map(META_MAP);
        let txn = self.doc.transact();
        meta.get(&txn, key).map(|value| value.to_string(&txn))
    }

    /// Run `write` in one local transaction if the primary text is empty.
    ///
    /// Returns the encoded update the transaction produced, or `None`
    /// when the text already has content and nothing was written.
    pub fn transact_if_empty<F>(&self, write: F) -> Option<Vec<u8>>
    where
        F: FnOnce(&mut TransactionMut<'_>, &TextRef, &MapRef),
    {
        // Root types must be resolved before the write transaction opens.
        let text = self.doc.get_or_insert_text(PRIMARY_TEXT);
        let meta = self.doc.get_or_insert_map(META_MAP);

        let mut txn = self.doc.transact_mut();
        if text.len(&txn) > 0 {
            return None;
        }
        write(&mut txn, &text, &meta);
        Some(txn.encode_update_v1())
    }
}

impl Default for ReplicaHandle {
    fn default() -> Self {
        Self::new()
    }
}
