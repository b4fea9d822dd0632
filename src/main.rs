//! Quizpad · photo-to-quiz backend for arithmetic practice
//!
//! - Axum HTTP + WebSocket API around a single quiz session
//! - OpenAI vision call turns a photographed worksheet into 5 new problems
//! - Procedural feedback cues and a shared scratch-pad surface
//! - Static SPA fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT                : u16 (default 3000)
//!   OPENAI_API_KEY      : key used for problem generation
//!   OPENAI_BASE_URL     : default "https://api.openai.com/v1"
//!   OPENAI_VISION_MODEL : default "gpt-4o-mini"
//!   QUIZ_CONFIG_PATH    : path to TOML config (prompts, quiz, storage, audio, memo)
//!   SESSION_DIR         : where session snapshots are written
//!   LOG_LEVEL           : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT          : "pretty" (default) or "json"

mod audio_out;
mod config;
mod controller;
mod credentials;
mod domain;
mod generator;
mod logic;
mod openai;
mod payload;
mod protocol;
mod routes;
mod session;
mod state;
mod storage;
mod surface;
mod telemetry;
mod tones;
mod util;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;

use crate::config::{AppConfig, OpenAiSettings};
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let cfg = AppConfig::from_env();
  let state = Arc::new(AppState::new(cfg, OpenAiSettings::from_env())?);

  let app = build_router(state.clone());

  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "quizpad_backend", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  info!(target: "quizpad_backend", "Server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(target: "quizpad_backend", error = %e, "Failed to listen for shutdown signal");
  }
}
