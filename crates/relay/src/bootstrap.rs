// Room bootstrap.
//
// Writes generated problem content into a room's replica exactly once
// and pushes the resulting update to anyone already connected.

use duet_common::protocol::frame::encode_update;
use duet_common::seed::{normalize_language, SeedContent};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;
use yrs::{Map, MapRef, Text, TextRef, TransactionMut};

use crate::metrics;
use crate::room::{RoomId, RoomRegistry};
use crate::ws::fanout;

/// Length of generated session room ids.
pub const SESSION_ID_LEN: usize = 7;
const SESSION_ID_ATTEMPTS: usize = 8;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("room id must not be blank")]
    BlankRoomId,
    #[error("seed content must not be empty")]
    EmptyContent,
    #[error("seed language must not be blank")]
    BlankLanguage,
    #[error("room {0} already has content")]
    AlreadySeeded(RoomId),
    #[error("could not allocate an unused session id")]
    IdExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedReceipt {
    pub room_id: RoomId,
    pub language: &'static str,
    /// Connections the seed update was pushed to.
    pub delivered: usize,
}

pub fn validate_seed(seed: &SeedContent) -> Result<(), BootstrapError> {
    if seed.content.is_empty() {
        return Err(BootstrapError::EmptyContent);
    }
    if seed.language.trim().is_empty() {
        return Err(BootstrapError::BlankLanguage);
    }
    Ok(())
}

/// Seed `room_id` with `seed` if its primary text is still empty.
///
/// The emptiness check and the write happen under the room lock, so of
/// several concurrent seeds exactly one succeeds.
pub async fn seed_room(
    rooms: &RoomRegistry,
    room_id: &str,
    seed: &SeedContent,
) -> Result<SeedReceipt, BootstrapError> {
    if room_id.trim().is_empty() {
        return Err(BootstrapError::BlankRoomId);
    }
    validate_seed(seed)?;
    let room_id = RoomId::new(room_id);
    let room = rooms.resolve(&room_id).await;
    let language = normalize_language(&seed.language);

    let state = room.lock_state().await;
    let update = state
        .replica
        .transact_if_empty(|txn, text, meta| write_seed(txn, text, meta, seed, language))
        .ok_or_else(|| BootstrapError::AlreadySeeded(room_id.clone()))?;
    let delivered = fanout::broadcast(&room, None, encode_update(update).into()).await;
    drop(state);

    metrics::increment_seeds_applied();
    info!(room_id = %room_id, language, delivered, "room seeded");

    Ok(SeedReceipt { room_id, language, delivered })
}

/// Seed a freshly allocated room and return its id.
pub async fn create_session(
    rooms: &RoomRegistry,
    seed: &SeedContent,
) -> Result<SeedReceipt, BootstrapError> {
    validate_seed(seed)?;
    for _ in 0..SESSION_ID_ATTEMPTS {
        let candidate = generate_session_id();
        if rooms.get(&RoomId::new(&candidate)).await.is_some() {
            continue;
        }
        match seed_room(rooms, &candidate, seed).await {
            Err(BootstrapError::AlreadySeeded(_)) => continue,
            other => return other,
        }
    }
    Err(BootstrapError::IdExhausted)
}

/// Short lowercase alphanumeric id suitable for sharing in a URL.
pub fn generate_session_id() -> String {
    Uuid::new_v4().simple().to_string()[..SESSION_ID_LEN].to_owned()
}

fn write_seed(
    txn: &mut TransactionMut<'_>,
    text: &TextRef,
    meta: &MapRef,
    seed: &SeedContent,
    language: &'static str,
) {
    text.insert(txn, 0, seed.initial_text());

    meta.insert(txn, "language", language);
    if let Some(title) = &seed.title {
        meta.insert(txn, "title", title.as_str());
    }
    if let Some(difficulty) = &seed.difficulty {
        meta.insert(txn, "difficulty", difficulty.as_str());
    }
    if let Some(question) = &seed.question {
        meta.insert(txn, "question", question.as_str());
    }
    if !seed.hints.is_empty() {
        if let Ok(hints) = serde_json::to_string(&seed.hints) {
            meta.insert(txn, "hints", hints);
        }
    }
    if let Some(complexity) = &seed.complexity {
        if let Ok(complexity) = serde_json::to_string(complexity) {
            meta.insert(txn, "complexity", complexity);
        }
    }
    if let Some(starter_code) = seed.starter_code.as_deref().filter(|code| !code.is_empty()) {
        meta.insert(txn, "starterCode", starter_code);
        meta.insert(txn, "fullSolution", seed.content.as_str());
    }
}
