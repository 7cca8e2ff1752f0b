//! Room relay hub.
//!
//! Clients connect over WebSocket to `/<room>` and exchange document sync,
//! presence and call-signaling frames with everyone else in that room. The
//! relay keeps an authoritative replica and presence registry per room and
//! exposes a small REST surface for seeding and inspecting rooms.

pub mod api;
pub mod awareness;
pub mod bootstrap;
pub mod config;
pub mod cors;
pub mod error;
pub mod liveness;
pub mod metrics;
pub mod replica;
pub mod room;
pub mod validation;
pub mod ws;

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::RelayConfig;
use crate::error::{
    attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope,
    ErrorCode, RelayError,
};
use crate::liveness::LivenessMonitor;
use crate::metrics::RelayMetrics;
use crate::room::RoomRegistry;
use crate::validation::MAX_REST_BODY_BYTES;

/// Shared state handed to every route.
#[derive(Clone)]
pub struct RelayState {
    pub rooms: Arc<RoomRegistry>,
    pub max_frame_bytes: usize,
}

impl RelayState {
    pub fn new(config: &RelayConfig) -> Self {
        Self { rooms: Arc::new(RoomRegistry::default()), max_frame_bytes: config.max_frame_bytes }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::new(&RelayConfig::default())
    }
}

pub fn build_router(state: RelayState, config: &RelayConfig) -> Router {
    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .route("/metrics", get(render_metrics))
            .merge(api::router(state.clone()))
            .merge(ws::router(state)),
    )
    .layer(cors::cors_layer(config.cors_origins.as_deref()))
}

fn apply_middleware(router: Router) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REST_BODY_BYTES))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

/// Serve the relay on `listener` until `shutdown` resolves.
///
/// The liveness monitor runs for as long as the server does.
pub async fn serve<F>(
    listener: TcpListener,
    state: RelayState,
    config: &RelayConfig,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    metrics::set_global_metrics(Arc::new(RelayMetrics::default()));

    let monitor =
        LivenessMonitor::new(Arc::clone(&state.rooms), config.heartbeat_interval).spawn();
    let app = build_router(state, config);

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("relay server exited unexpectedly");

    monitor.abort();
    result
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn render_metrics() -> Response {
    match metrics::global_metrics() {
        Some(metrics) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            metrics.render_prometheus(),
        )
            .into_response(),
        None => RelayError::new(ErrorCode::InternalError, "metrics are not initialized")
            .into_response(),
    }
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            RelayError::from_code(ErrorCode::InternalError).into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;
    attach_request_id_header(&mut response, &request_id);

    let latency_ms = started_at.elapsed().as_millis() as u64;
    if let Some(metrics) = metrics::global_metrics() {
        metrics.record_http_request(method.as_str(), &path, response.status().as_u16(), latency_ms);
    }

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms,
        "request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
        routing::{get, post},
        Router,
    };
    use tower::ServiceExt;

    use super::{apply_middleware, build_router, RelayState, MAX_REST_BODY_BYTES};
    use crate::config::RelayConfig;

    fn test_router() -> Router {
        build_router(RelayState::for_tests(), &RelayConfig::default())
    }

    #[tokio::test]
    async fn health_check_has_request_id_header() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .expect("healthz request should build"),
            )
            .await
            .expect("healthz request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn incoming_request_id_is_echoed() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/v1/rooms/missing")
                    .header("x-request-id", "req-42")
                    .body(Body::empty())
                    .expect("room request should build"),
            )
            .await
            .expect("room request should succeed");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers().get("x-request-id").unwrap(), "req-42");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["error"]["request_id"], "req-42");
    }

    #[tokio::test]
    async fn plain_get_on_room_path_is_not_an_upgrade() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/some-room")
                    .body(Body::empty())
                    .expect("room path request should build"),
            )
            .await
            .expect("room path request should return a response");

        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn panic_handler_returns_internal_server_error() {
        async fn panic_route() -> &'static str {
            panic!("test panic");
        }

        let app = apply_middleware(Router::new().route("/panic", get(panic_route)));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/panic")
                    .body(Body::empty())
                    .expect("panic request should build"),
            )
            .await
            .expect("panic request should return a response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn request_body_limit_is_enforced() {
        async fn echo(body: String) -> String {
            body
        }

        let oversized_body = "a".repeat(MAX_REST_BODY_BYTES + 1);
        let app = apply_middleware(Router::new().route("/echo", post(echo)));

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/echo")
                    .header("content-type", "text/plain")
                    .body(Body::from(oversized_body))
                    .expect("echo request should build"),
            )
            .await
            .expect("echo request should return a response");

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
