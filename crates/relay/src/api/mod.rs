// REST surface used by the content-generation service and operators.
//
// - PUT  /v1/rooms/{room_id}/seed   seed a room once
// - POST /v1/sessions               allocate and seed a new room
// - GET  /v1/rooms/{room_id}        inspect a live room

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use duet_common::seed::SeedContent;
use serde::Serialize;
use serde_json::json;

use crate::bootstrap::{self, BootstrapError};
use crate::error::{ErrorCode, RelayError};
use crate::room::RoomId;
use crate::validation::ValidatedJson;
use crate::RelayState;

#[derive(Debug, Serialize)]
struct SeedResponse {
    room_id: String,
    seeded: bool,
}

#[derive(Debug, Serialize)]
struct SessionResponse {
    room_id: String,
}

#[derive(Debug, Serialize)]
struct RoomResponse {
    room_id: String,
    connections: usize,
    content_length: u32,
    language: Option<String>,
    presence: usize,
    created_at: chrono::DateTime<chrono::Utc>,
}

pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/v1/rooms/{room_id}/seed", put(seed_room))
        .route("/v1/rooms/{room_id}", get(get_room))
        .route("/v1/sessions", post(create_session))
        .with_state(state)
}

async fn seed_room(
    State(state): State<RelayState>,
    Path(room_id): Path<String>,
    ValidatedJson(seed): ValidatedJson<SeedContent>,
) -> Result<impl IntoResponse, RelayError> {
    let receipt = bootstrap::seed_room(&state.rooms, &room_id, &seed).await?;
    Ok((
        StatusCode::CREATED,
        Json(SeedResponse { room_id: receipt.room_id.to_string(), seeded: true }),
    ))
}

async fn create_session(
    State(state): State<RelayState>,
    ValidatedJson(seed): ValidatedJson<SeedContent>,
) -> Result<impl IntoResponse, RelayError> {
    let receipt = bootstrap::create_session(&state.rooms, &seed).await?;
    Ok((StatusCode::CREATED, Json(SessionResponse { room_id: receipt.room_id.to_string() })))
}

async fn get_room(
    State(state): State<RelayState>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomResponse>, RelayError> {
    let room_id = RoomId::new(&room_id);
    let Some(room) = state.rooms.get(&room_id).await else {
        return Err(RelayError::new(ErrorCode::NotFound, format!("room {room_id} not found")));
    };

    let (content_length, language, presence) = {
        let room_state = room.lock_state().await;
        (
            room_state.replica.text_len(),
            room_state.replica.meta_string("language"),
            room_state.awareness.peers().len(),
        )
    };

    Ok(Json(RoomResponse {
        room_id: room_id.to_string(),
        connections: room.connection_count().await,
        content_length,
        language,
        presence,
        created_at: room.created_at(),
    }))
}

impl From<BootstrapError> for RelayError {
    fn from(error: BootstrapError) -> Self {
        match &error {
            BootstrapError::BlankRoomId
            | BootstrapError::EmptyContent
            | BootstrapError::BlankLanguage => {
                RelayError::new(ErrorCode::ValidationFailed, error.to_string())
            }
            BootstrapError::AlreadySeeded(room_id) => {
                RelayError::new(ErrorCode::RoomAlreadySeeded, error.to_string())
                    .with_details(json!({ "room_id": room_id.as_str() }))
            }
            BootstrapError::IdExhausted => {
                RelayError::new(ErrorCode::InternalError, error.to_string())
            }
        }
    }
}
