//! Router assembly: HTTP endpoints, WebSocket upgrade, static files, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;
pub mod ws;

/// Photos from phone cameras are large; allow up to this many bytes per upload.
pub const MAX_UPLOAD_BYTES: usize = 12 * 1024 * 1024;

/// Build the application router with:
/// - WebSocket at `/ws`
/// - HTTP API under `/api/v1/...`
/// - Static SPA from `./static` with index fallback
/// - CORS (allow any origin/method/headers)
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    let static_service = ServeDir::new("./static")
        .append_index_html_on_directories(true)
        .not_found_service(ServeFile::new("./static/index.html"));

    Router::new()
        .route("/ws", get(ws::ws_upgrade))
        .route("/api/v1/health", get(http::http_health))
        .route("/api/v1/session", get(http::http_get_session))
        .route("/api/v1/session/image", post(http::http_post_image))
        .route("/api/v1/session/answer", post(http::http_post_answer))
        .route("/api/v1/session/retry", post(http::http_post_retry))
        .route("/api/v1/session/replay", post(http::http_post_replay))
        .route("/api/v1/session/reset", post(http::http_post_reset))
        .route("/api/v1/memo", get(http::http_get_memo))
        .route("/api/v1/memo/clear", post(http::http_post_memo_clear))
        .route("/api/v1/memo/resize", post(http::http_post_memo_resize))
        .route("/api/v1/credential/select", post(http::http_post_select_credential))
        .with_state(state)
        .layer(axum::extract::DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .fallback_service(static_service)
}
