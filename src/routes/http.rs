//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and logs parameters and basic result info.

use std::sync::Arc;

use axum::{
  body::Bytes,
  extract::State,
  http::{header::CONTENT_TYPE, HeaderMap},
  response::IntoResponse,
  Json,
};
use tracing::{info, instrument};

use crate::generator::ImageUpload;
use crate::logic::*;
use crate::protocol::*;
use crate::state::AppState;
use crate::surface::MemoEraser;

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "debug", skip(state))]
pub async fn http_get_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(state.controller.view().await)
}

#[instrument(level = "info", skip(state, headers, body), fields(body_len = body.len()))]
pub async fn http_post_image(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  body: Bytes,
) -> impl IntoResponse {
  let mime = headers
    .get(CONTENT_TYPE)
    .and_then(|v| v.to_str().ok())
    .unwrap_or("application/octet-stream")
    .to_string();
  let out = do_submit_image(&state, ImageUpload::new(mime, body.to_vec())).await;
  info!(target: "session", accepted = out.accepted, status = ?out.state.status, "HTTP image processed");
  Json(out)
}

#[instrument(level = "info", skip(state, body), fields(choice = body.choice))]
pub async fn http_post_answer(
  State(state): State<Arc<AppState>>,
  Json(body): Json<AnswerIn>,
) -> impl IntoResponse {
  let out = do_answer(&state, body.choice).await;
  info!(target: "session", accepted = out.accepted, correct = ?out.state.is_correct, "HTTP answer submitted");
  Json(out)
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_retry(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(do_retry(&state).await)
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_replay(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(do_replay(&state).await)
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_reset(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(do_reset(&state).await)
}

#[instrument(level = "debug", skip(state))]
pub async fn http_get_memo(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(state.memo.snapshot())
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_memo_clear(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  state.memo.erase();
  Json(state.memo.snapshot())
}

#[instrument(level = "info", skip(state, body), fields(width = body.size.width, height = body.size.height))]
pub async fn http_post_memo_resize(
  State(state): State<Arc<AppState>>,
  Json(body): Json<MemoResizeIn>,
) -> impl IntoResponse {
  state.memo.fit_to(body.size, body.origin);
  Json(state.memo.snapshot())
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_select_credential(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(do_select_credential(&state).await)
}
