//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! Each function runs one controller command and wraps the result in a
//! `CommandOut` (new view + optional notice).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{debug, instrument};

use crate::generator::ImageUpload;
use crate::protocol::CommandOut;
use crate::session::RetryOutcome;
use crate::state::AppState;

async fn out(state: &AppState, accepted: bool, notice: Option<String>) -> CommandOut {
  CommandOut { accepted, state: state.controller.view().await, notice }
}

#[instrument(level = "info", skip(state, image), fields(mime = %image.mime, image_len = image.bytes.len()))]
pub async fn do_submit_image(state: &AppState, image: ImageUpload) -> CommandOut {
  match state.controller.submit_image(image).await {
    Ok(count) => {
      debug!(target: "session", count, "Image accepted");
      out(state, true, None).await
    }
    Err(e) => out(state, false, Some(e.notice())).await,
  }
}

/// Decode the base64 payload a WebSocket client sends with `submit_image`.
pub fn decode_image(mime: &str, image_base64: &str) -> Result<ImageUpload, base64::DecodeError> {
  let data = image_base64
    .split_once(";base64,")
    .map(|(_, d)| d)
    .unwrap_or(image_base64);
  Ok(ImageUpload::new(mime, STANDARD.decode(data.trim())?))
}

pub async fn do_answer(state: &AppState, choice: usize) -> CommandOut {
  match state.controller.submit_answer(choice).await {
    Some(_) => out(state, true, None).await,
    None => out(state, false, Some("Answer ignored.".into())).await,
  }
}

pub async fn do_retry(state: &AppState) -> CommandOut {
  match state.controller.start_retry_round().await {
    Some(RetryOutcome::Started { .. }) => out(state, true, None).await,
    Some(RetryOutcome::Finished) => out(state, true, Some("All done!".into())).await,
    None => out(state, false, Some("There is no round to retry.".into())).await,
  }
}

pub async fn do_replay(state: &AppState) -> CommandOut {
  let accepted = state.controller.replay().await;
  let notice = (!accepted).then(|| "Finish the wrong answers first.".to_string());
  out(state, accepted, notice).await
}

pub async fn do_reset(state: &AppState) -> CommandOut {
  state.controller.reset().await;
  out(state, true, None).await
}

pub async fn do_select_credential(state: &AppState) -> CommandOut {
  let opened = state.controller.select_credential().await;
  let notice = (!opened).then(|| "Set OPENAI_API_KEY on the server to choose a key.".to_string());
  out(state, opened, notice).await
}
