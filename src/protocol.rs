//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::domain::{ProblemId, SessionState, Status};
use crate::surface::{MemoSnapshot, Point, PointerInput, Segment, Size};
use crate::tones::Cue;

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
  Ping,
  GetState,
  SubmitImage {
    mime: String,
    #[serde(rename = "imageBase64")]
    image_base64: String,
  },
  Answer {
    choice: usize,
  },
  RetryWrong,
  Replay,
  Reset,
  ClearMemo,
  SelectCredential,
  MemoResize {
    width: f32,
    height: f32,
    #[serde(default)]
    origin: Point,
  },
  Pointer {
    input: PointerInput,
  },
  GetMemo,
}

/// Messages the server sends (replies and broadcasts).
#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
  Pong,
  State {
    state: SessionView,
  },
  Notice {
    message: String,
    #[serde(rename = "credentialReselect")]
    credential_reselect: bool,
  },
  Cue {
    cue: Cue,
    #[serde(rename = "wavBase64")]
    wav_base64: String,
  },
  Segment {
    segment: Segment,
  },
  Memo {
    memo: MemoSnapshot,
  },
  MemoCleared,
  Error {
    message: String,
  },
}

/// Problem as shown to the child: no answer key.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ProblemOut {
  pub id: ProblemId,
  pub question: String,
  pub options: Vec<String>,
}

/// Client-facing projection of the session.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
  pub status: Status,
  pub current_index: usize,
  pub total: usize,
  pub current: Option<ProblemOut>,
  /// Only while FEEDBACK, so the UI can highlight the right option.
  pub revealed_answer: Option<usize>,
  pub is_correct: Option<bool>,
  pub wrong_problem_ids: Vec<ProblemId>,
  pub credential_reselect_required: bool,
}

impl SessionView {
  pub fn from_state(s: &SessionState, credential_reselect_required: bool) -> Self {
    let current = s.current_problem();
    Self {
      status: s.status,
      current_index: s.current_index,
      total: s.problems.len(),
      current: current.map(|p| ProblemOut { id: p.id.clone(), question: p.question.clone(), options: p.options.clone() }),
      revealed_answer: current.filter(|_| s.status == Status::Feedback).map(|p| p.answer_index),
      is_correct: s.is_correct,
      wrong_problem_ids: s.wrong_problem_ids.clone(),
      credential_reselect_required,
    }
  }
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Deserialize)]
pub struct AnswerIn {
  pub choice: usize,
}

#[derive(Debug, Deserialize)]
pub struct MemoResizeIn {
  #[serde(flatten)]
  pub size: Size,
  #[serde(default)]
  pub origin: Point,
}

/// Result of a command: the new view, plus a notice when something went wrong or was ignored.
#[derive(Debug, Serialize)]
pub struct CommandOut {
  pub accepted: bool,
  pub state: SessionView,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub notice: Option<String>,
}

#[derive(Serialize)]
pub struct HealthOut {
  pub ok: bool,
}
