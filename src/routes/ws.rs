//! WebSocket upgrade + message loop. Each client message is parsed as JSON and
//! forwarded to core logic; the direct reply (if any) goes back on the same socket.
//! Session broadcasts (state, notices, cues, memo clears) are forwarded to every socket.

use std::sync::Arc;

use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, instrument, warn};

use crate::logic::*;
use crate::protocol::{ClientWsMessage, CommandOut, ServerWsMessage};
use crate::state::AppState;
use crate::surface::MemoEraser;

#[instrument(level = "info", skip(state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "quizpad_backend", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn send(socket: &mut WebSocket, msg: &ServerWsMessage) -> Result<(), axum::Error> {
  let out = serde_json::to_string(msg).unwrap_or_else(|e| {
    serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
  });
  socket.send(Message::Text(out)).await
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "quizpad_backend", "WebSocket connected");
  let mut events = state.events.subscribe();

  let hello = ServerWsMessage::State { state: state.controller.view().await };
  if send(&mut socket, &hello).await.is_err() {
    return;
  }

  loop {
    tokio::select! {
      incoming = socket.recv() => {
        let Some(Ok(msg)) = incoming else { break };
        match msg {
          Message::Text(txt) => {
            let reply = match serde_json::from_str::<ClientWsMessage>(&txt) {
              Ok(m) => {
                debug!(target: "quizpad_backend", "WS received: {}", short_debug(&m));
                handle_client_ws(m, &state).await
              }
              Err(e) => Some(ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) }),
            };
            if let Some(reply) = reply {
              if let Err(e) = send(&mut socket, &reply).await {
                error!(target: "quizpad_backend", error = %e, "WS send error");
                break;
              }
            }
          }
          Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
          Message::Close(_) => break,
          _ => {}
        }
      }
      event = events.recv() => {
        match event {
          Ok(ev) => {
            if let Err(e) = send(&mut socket, &ev).await {
              error!(target: "quizpad_backend", error = %e, "WS broadcast send error");
              break;
            }
          }
          Err(RecvError::Lagged(n)) => warn!(target: "quizpad_backend", skipped = n, "WS client lagging; events dropped"),
          Err(RecvError::Closed) => break,
        }
      }
    }
  }
  info!(target: "quizpad_backend", "WebSocket disconnected");
}

/// Keeps base64 image payloads out of debug logs.
fn short_debug(m: &ClientWsMessage) -> String {
  match m {
    ClientWsMessage::SubmitImage { mime, image_base64 } => format!("SubmitImage {{ mime: {mime}, len: {} }}", image_base64.len()),
    other => format!("{other:?}"),
  }
}

/// Commands whose effect reaches the client through the state broadcast return None.
async fn handle_client_ws(msg: ClientWsMessage, state: &Arc<AppState>) -> Option<ServerWsMessage> {
  match msg {
    ClientWsMessage::Ping => Some(ServerWsMessage::Pong),
    ClientWsMessage::GetState => Some(ServerWsMessage::State { state: state.controller.view().await }),

    ClientWsMessage::SubmitImage { mime, image_base64 } => match decode_image(&mime, &image_base64) {
      Ok(image) => {
        // Generation runs off the socket loop so reset stays reachable while LOADING.
        let state = Arc::clone(state);
        tokio::spawn(async move {
          do_submit_image(&state, image).await;
        });
        None
      }
      Err(e) => Some(ServerWsMessage::Error { message: format!("Invalid image payload: {}", e) }),
    },
    ClientWsMessage::Answer { choice } => notice_of(do_answer(state, choice).await),
    ClientWsMessage::RetryWrong => notice_of(do_retry(state).await),
    ClientWsMessage::Replay => notice_of(do_replay(state).await),
    ClientWsMessage::Reset => notice_of(do_reset(state).await),
    ClientWsMessage::SelectCredential => notice_of(do_select_credential(state).await),

    ClientWsMessage::ClearMemo => {
      state.memo.erase();
      None
    }
    ClientWsMessage::MemoResize { width, height, origin } => {
      state.memo.fit_to(crate::surface::Size { width, height }, origin);
      Some(ServerWsMessage::Memo { memo: state.memo.snapshot() })
    }
    ClientWsMessage::Pointer { input } => state.memo.apply(input).map(|segment| ServerWsMessage::Segment { segment }),
    ClientWsMessage::GetMemo => Some(ServerWsMessage::Memo { memo: state.memo.snapshot() }),
  }
}

fn notice_of(out: CommandOut) -> Option<ServerWsMessage> {
  out.notice.map(|message| ServerWsMessage::Notice { message, credential_reselect: out.state.credential_reselect_required })
}
