// WebSocket relay: any path upgrades into the room named by that path.

pub mod fanout;
pub mod handler;
pub mod router;
pub mod session;

use axum::{routing::get, Router};

use crate::RelayState;

pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/", get(handler::ws_route))
        .route("/{*path}", get(handler::ws_route))
        .with_state(state)
}
