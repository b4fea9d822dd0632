//! QuizController: owns one `QuizSession` and runs its side effects.
//!
//! - persists the full snapshot after every transition
//! - calls the problem generator and repairs its payload
//! - plays the judgment cue and schedules the delayed FEEDBACK advance
//! - erases the memo surface on problem transitions
//! - broadcasts state changes and notices to connected clients
//!
//! The pending advance timer is aborted by reset and by every new round; the
//! session's round epoch rejects it anyway if it fires late.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::credentials::Credentials;
use crate::domain::{Problem, SessionState};
use crate::generator::{GenerationError, ImageUpload, ProblemGenerator};
use crate::payload::build_problems;
use crate::protocol::{ServerWsMessage, SessionView};
use crate::session::{AdvanceOutcome, AdvanceTicket, LoadOutcome, LoadTicket, QuizSession, RetryOutcome};
use crate::storage::{restore_session, save_session, SnapshotStore};
use crate::surface::MemoEraser;
use crate::tones::ToneSynthesizer;
use crate::util::now_millis;

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum SubmitError {
  #[error("upload is not an image")]
  InvalidImage,
  #[error("no API key selected")]
  CredentialMissing,
  #[error("a photo can only be submitted from the start screen")]
  Busy,
  #[error(transparent)]
  Generation(#[from] GenerationError),
  #[error("the session was reset while problems were being generated")]
  Superseded,
}

impl SubmitError {
  pub fn notice(&self) -> String {
    match self {
      SubmitError::Generation(e) => e.notice().to_string(),
      SubmitError::CredentialMissing => "Please select an API key first.".into(),
      other => other.to_string(),
    }
  }
}

/// Collaborators handed to the controller at construction.
pub struct ControllerParts {
  pub store: Arc<dyn SnapshotStore>,
  pub session_key: String,
  pub generator: Arc<dyn ProblemGenerator>,
  pub credentials: Credentials,
  pub tones: ToneSynthesizer,
  pub memo: Arc<dyn MemoEraser>,
  pub events: broadcast::Sender<ServerWsMessage>,
  pub feedback_delay: Duration,
  pub max_problems: usize,
}

struct Inner {
  session: QuizSession,
  credential_reselect: bool,
  pending_advance: Option<JoinHandle<()>>,
}

impl Inner {
  fn cancel_pending(&mut self) {
    if let Some(handle) = self.pending_advance.take() {
      handle.abort();
    }
  }
}

pub struct QuizController {
  inner: Mutex<Inner>,
  store: Arc<dyn SnapshotStore>,
  session_key: String,
  generator: Arc<dyn ProblemGenerator>,
  credentials: Credentials,
  tones: ToneSynthesizer,
  memo: Arc<dyn MemoEraser>,
  events: broadcast::Sender<ServerWsMessage>,
  feedback_delay: Duration,
  max_problems: usize,
}

impl QuizController {
  /// Restores the stored snapshot (status forced to IDLE) or starts fresh.
  pub fn new(parts: ControllerParts) -> Arc<Self> {
    let initial = restore_session(parts.store.as_ref(), &parts.session_key);
    info!(target: "session", problems = initial.problems.len(), index = initial.current_index, "Session controller ready");
    Arc::new(Self {
      inner: Mutex::new(Inner { session: QuizSession::new(initial), credential_reselect: false, pending_advance: None }),
      store: parts.store,
      session_key: parts.session_key,
      generator: parts.generator,
      credentials: parts.credentials,
      tones: parts.tones,
      memo: parts.memo,
      events: parts.events,
      feedback_delay: parts.feedback_delay,
      max_problems: parts.max_problems,
    })
  }

  pub async fn view(&self) -> SessionView {
    let inner = self.inner.lock().await;
    SessionView::from_state(inner.session.state(), inner.credential_reselect)
  }

  #[cfg(test)]
  pub async fn snapshot(&self) -> SessionState {
    self.inner.lock().await.session.state().clone()
  }

  /// IDLE -> LOADING -> PLAYING | IDLE. Returns the number of problems in the new round.
  /// Every failure except `Superseded` is also broadcast as a notice.
  ///
  /// Generation runs in its own task: dropping the returned future does not
  /// leave the session in LOADING.
  #[instrument(level = "info", skip(self, image), fields(mime = %image.mime, image_len = image.bytes.len()))]
  pub async fn submit_image(self: &Arc<Self>, image: ImageUpload) -> Result<usize, SubmitError> {
    let ticket = match self.begin_generation(&image).await {
      Ok(ticket) => ticket,
      Err(e) => {
        self.report_failure(&e);
        return Err(e);
      }
    };

    let this = Arc::clone(self);
    let task = tokio::spawn(async move {
      let result = this
        .generator
        .generate(&image)
        .await
        .map(|raw| build_problems(raw, now_millis(), this.max_problems));
      let outcome = this.finish_generation(ticket, result).await;
      this.report_failure_of(&outcome);
      outcome
    });

    match task.await {
      Ok(outcome) => outcome,
      Err(join) => {
        warn!(target: "generation", error = %join, "Generation task died; abandoning the load");
        let failed = Err(GenerationError::Network("problem generation was interrupted".into()));
        let outcome = self.finish_generation(ticket, failed).await;
        self.report_failure_of(&outcome);
        outcome
      }
    }
  }

  async fn begin_generation(&self, image: &ImageUpload) -> Result<LoadTicket, SubmitError> {
    if !image.is_image() {
      return Err(SubmitError::InvalidImage);
    }
    let mut inner = self.inner.lock().await;
    if !self.credentials.has_credential() {
      inner.credential_reselect = true;
      self.credentials.request_selection();
      self.publish(&inner);
      return Err(SubmitError::CredentialMissing);
    }
    let ticket = inner.session.begin_loading().ok_or(SubmitError::Busy)?;
    inner.cancel_pending();
    self.commit(&inner);
    Ok(ticket)
  }

  async fn finish_generation(
    &self,
    ticket: LoadTicket,
    result: Result<Vec<Problem>, GenerationError>,
  ) -> Result<usize, SubmitError> {
    let mut inner = self.inner.lock().await;
    match inner.session.finish_loading(ticket, result) {
      LoadOutcome::Started { count } => {
        inner.credential_reselect = false;
        self.commit(&inner);
        drop(inner);
        self.memo.erase();
        info!(target: "session", count, "Round started");
        Ok(count)
      }
      LoadOutcome::Failed(e) => {
        let reselect = e.needs_credential_reselection();
        if reselect {
          inner.credential_reselect = true;
        }
        self.commit(&inner);
        warn!(target: "session", error = %e, reselect, "Generation failed; back to IDLE");
        Err(SubmitError::Generation(e))
      }
      LoadOutcome::Stale => Err(SubmitError::Superseded),
    }
  }

  fn report_failure_of(&self, outcome: &Result<usize, SubmitError>) {
    if let Err(e) = outcome {
      self.report_failure(e);
    }
  }

  fn report_failure(&self, e: &SubmitError) {
    if matches!(e, SubmitError::Superseded) {
      return;
    }
    let reselect = matches!(e, SubmitError::CredentialMissing)
      || matches!(e, SubmitError::Generation(g) if g.needs_credential_reselection());
    self.notify(e.notice(), reselect);
  }

  /// PLAYING -> FEEDBACK, cue, then the delayed advance. None when the answer was ignored.
  #[instrument(level = "info", skip(self))]
  pub async fn submit_answer(self: &Arc<Self>, choice: usize) -> Option<bool> {
    let judgment = {
      let mut inner = self.inner.lock().await;
      let judgment = inner.session.submit_answer(choice)?;
      self.commit(&inner);
      inner.cancel_pending();
      inner.pending_advance = Some(self.schedule_advance(judgment.ticket));
      judgment
    };
    info!(target: "session", correct = judgment.correct, "Answer judged");
    if judgment.correct {
      self.tones.play_success();
    } else {
      self.tones.play_failure();
    }
    Some(judgment.correct)
  }

  fn schedule_advance(self: &Arc<Self>, ticket: AdvanceTicket) -> JoinHandle<()> {
    let this = Arc::clone(self);
    let delay = self.feedback_delay;
    tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      this.advance(ticket).await;
    })
  }

  async fn advance(&self, ticket: AdvanceTicket) -> Option<AdvanceOutcome> {
    let outcome = {
      let mut inner = self.inner.lock().await;
      let outcome = inner.session.advance(ticket)?;
      inner.pending_advance = None;
      self.commit(&inner);
      outcome
    };
    self.memo.erase();
    info!(target: "session", ?outcome, "Feedback finished");
    Some(outcome)
  }

  /// RETRY_SUMMARY -> PLAYING (wrong problems only) | FINISHED.
  #[instrument(level = "info", skip(self))]
  pub async fn start_retry_round(&self) -> Option<RetryOutcome> {
    let outcome = {
      let mut inner = self.inner.lock().await;
      let outcome = inner.session.start_retry_round()?;
      inner.cancel_pending();
      self.commit(&inner);
      outcome
    };
    if let RetryOutcome::Started { .. } = outcome {
      self.memo.erase();
    }
    info!(target: "session", ?outcome, "Retry requested");
    Some(outcome)
  }

  /// RETRY_SUMMARY with a clean round -> IDLE.
  #[instrument(level = "info", skip(self))]
  pub async fn replay(&self) -> bool {
    let mut inner = self.inner.lock().await;
    if !inner.session.replay() {
      return false;
    }
    inner.cancel_pending();
    self.commit(&inner);
    true
  }

  /// Any status -> IDLE.
  #[instrument(level = "info", skip(self))]
  pub async fn reset(&self) {
    let mut inner = self.inner.lock().await;
    inner.cancel_pending();
    inner.session.reset();
    self.commit(&inner);
    info!(target: "session", "Session reset");
  }

  /// Open the host's credential selection. Clears the reselection flag when a host took it.
  #[instrument(level = "info", skip(self))]
  pub async fn select_credential(&self) -> bool {
    let opened = self.credentials.request_selection();
    if opened {
      let mut inner = self.inner.lock().await;
      inner.credential_reselect = false;
      self.publish(&inner);
    }
    opened
  }

  fn commit(&self, inner: &MutexGuard<'_, Inner>) {
    if let Err(e) = save_session(self.store.as_ref(), &self.session_key, inner.session.state()) {
      warn!(target: "storage", key = %self.session_key, error = %e, "Failed to persist session snapshot");
    }
    self.publish(inner);
  }

  fn publish(&self, inner: &MutexGuard<'_, Inner>) {
    let state = SessionView::from_state(inner.session.state(), inner.credential_reselect);
    let _ = self.events.send(ServerWsMessage::State { state });
  }

  fn notify(&self, message: String, credential_reselect: bool) {
    let _ = self.events.send(ServerWsMessage::Notice { message, credential_reselect });
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::domain::Status;
  use crate::payload::RawProblem;
  use crate::storage::MemorySnapshotStore;
  use crate::tones::{AudioError, AudioOutput, Cue, OutputState};
  use async_trait::async_trait;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex as StdMutex;
  use tokio::sync::Notify;

  pub(crate) const DELAY: Duration = Duration::from_millis(1200);

  pub(crate) struct ScriptedGenerator {
    pub result: Result<Vec<RawProblem>, GenerationError>,
    pub calls: AtomicUsize,
    pub gate: Option<Arc<Notify>>,
  }

  impl ScriptedGenerator {
    pub(crate) fn ok(raw: Vec<RawProblem>) -> Self { Self { result: Ok(raw), calls: AtomicUsize::new(0), gate: None } }
    pub(crate) fn err(e: GenerationError) -> Self { Self { result: Err(e), calls: AtomicUsize::new(0), gate: None } }
  }

  #[async_trait]
  impl ProblemGenerator for ScriptedGenerator {
    async fn generate(&self, _image: &ImageUpload) -> Result<Vec<RawProblem>, GenerationError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if let Some(gate) = &self.gate {
        gate.notified().await;
      }
      self.result.clone()
    }
  }

  #[derive(Default)]
  pub(crate) struct CountingEraser(pub AtomicUsize);

  impl MemoEraser for CountingEraser {
    fn erase(&self) { self.0.fetch_add(1, Ordering::SeqCst); }
  }

  #[derive(Default)]
  struct CueLog(StdMutex<Vec<Cue>>);

  impl AudioOutput for CueLog {
    fn sample_rate(&self) -> u32 { 1_000 }
    fn state(&self) -> OutputState { OutputState::Running }
    fn resume(&self) -> Result<(), AudioError> { Ok(()) }
    fn play(&self, cue: Cue, _samples: Vec<f32>) -> Result<(), AudioError> {
      self.0.lock().unwrap().push(cue);
      Ok(())
    }
  }

  struct Harness {
    controller: Arc<QuizController>,
    store: Arc<MemorySnapshotStore>,
    eraser: Arc<CountingEraser>,
    cues: Arc<CueLog>,
  }

  fn harness_with(generator: ScriptedGenerator, store: Arc<MemorySnapshotStore>, api_key: Option<&str>) -> (Harness, Arc<ScriptedGenerator>) {
    let generator = Arc::new(generator);
    let eraser = Arc::new(CountingEraser::default());
    let cues = Arc::new(CueLog::default());
    let (events, _) = broadcast::channel(64);
    let tones = {
      let cues = cues.clone();
      ToneSynthesizer::new(move || Some(cues.clone() as Arc<dyn AudioOutput>))
    };
    let controller = QuizController::new(ControllerParts {
      store: store.clone(),
      session_key: "quiz_session".into(),
      generator: generator.clone(),
      credentials: Credentials::new(None, api_key),
      tones,
      memo: eraser.clone(),
      events,
      feedback_delay: DELAY,
      max_problems: 5,
    });
    (Harness { controller, store, eraser, cues }, generator)
  }

  fn harness(generator: ScriptedGenerator) -> (Harness, Arc<ScriptedGenerator>) {
    harness_with(generator, Arc::new(MemorySnapshotStore::new()), Some("sk-test"))
  }

  fn photo() -> ImageUpload { ImageUpload::new("image/png", vec![0x89, 0x50]) }

  fn stored(h: &Harness) -> SessionState {
    let text = h.store.load("quiz_session").unwrap().unwrap();
    serde_json::from_str(&text).unwrap()
  }

  #[tokio::test(start_paused = true)]
  async fn correct_answer_reaches_summary_after_delay() {
    let (h, _) = harness(ScriptedGenerator::ok(vec![RawProblem::new("1+0?", &["0", "1", "2"], 1)]));
    assert_eq!(h.controller.submit_image(photo()).await, Ok(1));
    assert_eq!(h.controller.view().await.status, Status::Playing);

    assert_eq!(h.controller.submit_answer(1).await, Some(true));
    let s = h.controller.snapshot().await;
    assert_eq!(s.status, Status::Feedback);
    assert_eq!(s.is_correct, Some(true));
    assert!(s.wrong_problem_ids.is_empty());
    assert_eq!(stored(&h).status, Status::Feedback);

    tokio::time::sleep(DELAY + Duration::from_millis(10)).await;
    let s = h.controller.snapshot().await;
    assert_eq!(s.status, Status::RetrySummary);
    assert_eq!(s.current_index, 1);
    assert!(s.wrong_problem_ids.is_empty());
    assert_eq!(*h.cues.0.lock().unwrap(), vec![Cue::Success]);
    assert_eq!(h.eraser.0.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn wrong_answer_then_retry_round() {
    let (h, _) = harness(ScriptedGenerator::ok(vec![RawProblem::new("1+0?", &["0", "1", "2"], 1)]));
    h.controller.submit_image(photo()).await.unwrap();
    let id = h.controller.snapshot().await.problems[0].id.clone();

    assert_eq!(h.controller.submit_answer(0).await, Some(false));
    assert_eq!(h.controller.snapshot().await.wrong_problem_ids, vec![id.clone()]);
    tokio::time::sleep(DELAY + Duration::from_millis(10)).await;
    let s = h.controller.snapshot().await;
    assert_eq!(s.status, Status::RetrySummary);
    assert_eq!(s.wrong_problem_ids, vec![id.clone()]);
    assert!(!h.controller.replay().await);

    assert_eq!(h.controller.start_retry_round().await, Some(RetryOutcome::Started { count: 1 }));
    let s = h.controller.snapshot().await;
    assert_eq!(s.status, Status::Playing);
    assert_eq!(s.problems[0].id, id);
    assert_eq!(s.current_index, 0);
    assert!(s.wrong_problem_ids.is_empty());
    assert_eq!(*h.cues.0.lock().unwrap(), vec![Cue::Failure]);
    assert_eq!(h.eraser.0.load(Ordering::SeqCst), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn replay_from_clean_summary_resets() {
    let (h, _) = harness(ScriptedGenerator::ok(vec![RawProblem::new("2+2?", &["4", "5", "6"], 0)]));
    h.controller.submit_image(photo()).await.unwrap();
    h.controller.submit_answer(0).await;
    tokio::time::sleep(DELAY * 2).await;
    assert!(h.controller.replay().await);
    assert_eq!(h.controller.snapshot().await, SessionState::fresh());
    assert_eq!(stored(&h), SessionState::fresh());
  }

  #[tokio::test]
  async fn credential_failure_flags_reselection() {
    let (h, _) = harness(ScriptedGenerator::err(GenerationError::CredentialInvalid("Requested entity was not found.".into())));
    let err = h.controller.submit_image(photo()).await.unwrap_err();
    assert!(matches!(err, SubmitError::Generation(GenerationError::CredentialInvalid(_))));
    let v = h.controller.view().await;
    assert_eq!(v.status, Status::Idle);
    assert!(v.credential_reselect_required);
  }

  #[tokio::test]
  async fn generic_failure_returns_to_idle_without_reselection() {
    let (h, _) = harness(ScriptedGenerator::err(GenerationError::Network("connection reset".into())));
    assert!(h.controller.submit_image(photo()).await.is_err());
    let v = h.controller.view().await;
    assert_eq!(v.status, Status::Idle);
    assert!(!v.credential_reselect_required);
    assert_eq!(stored(&h).status, Status::Idle);
  }

  #[tokio::test]
  async fn malformed_items_are_repaired_and_the_round_starts() {
    let raw = vec![RawProblem::new("2+2?", &["3", "4"], 5)];
    let (h, _) = harness(ScriptedGenerator::ok(raw));
    h.controller.submit_image(photo()).await.unwrap();
    let s = h.controller.snapshot().await;
    assert_eq!(s.status, Status::Playing);
    assert_eq!(s.problems[0].options.len(), 3);
    assert_eq!(s.problems[0].answer_index, 0);
  }

  #[tokio::test]
  async fn missing_credential_rejects_before_any_state_change() {
    let store = Arc::new(MemorySnapshotStore::new());
    let (h, generator) = harness_with(ScriptedGenerator::ok(vec![]), store, None);
    assert_eq!(h.controller.submit_image(photo()).await, Err(SubmitError::CredentialMissing));
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.controller.snapshot().await, SessionState::fresh());
    assert!(h.controller.view().await.credential_reselect_required);
  }

  #[tokio::test]
  async fn non_image_upload_is_rejected() {
    let (h, generator) = harness(ScriptedGenerator::ok(vec![]));
    let err = h.controller.submit_image(ImageUpload::new("application/pdf", vec![1])).await;
    assert_eq!(err, Err(SubmitError::InvalidImage));
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn reset_cancels_the_pending_advance() {
    let raw = vec![RawProblem::new("a", &["0", "1", "2"], 0), RawProblem::new("b", &["0", "1", "2"], 0)];
    let (h, _) = harness(ScriptedGenerator::ok(raw));
    h.controller.submit_image(photo()).await.unwrap();
    h.controller.submit_answer(2).await;
    h.controller.reset().await;
    tokio::time::sleep(DELAY * 2).await;
    assert_eq!(h.controller.snapshot().await, SessionState::fresh());
    assert_eq!(stored(&h), SessionState::fresh());
  }

  #[tokio::test]
  async fn reset_during_loading_discards_the_late_result() {
    let gate = Arc::new(Notify::new());
    let mut generator = ScriptedGenerator::ok(vec![RawProblem::new("a", &["0", "1", "2"], 0)]);
    generator.gate = Some(gate.clone());
    let (h, generator) = harness(generator);

    let pending = {
      let c = h.controller.clone();
      tokio::spawn(async move { c.submit_image(photo()).await })
    };
    while generator.calls.load(Ordering::SeqCst) == 0 {
      tokio::task::yield_now().await;
    }
    assert_eq!(h.controller.view().await.status, Status::Loading);
    h.controller.reset().await;
    gate.notify_one();
    assert_eq!(pending.await.unwrap(), Err(SubmitError::Superseded));
    assert_eq!(h.controller.snapshot().await, SessionState::fresh());
  }

  #[tokio::test]
  async fn dropped_submit_still_finishes_the_load() {
    let gate = Arc::new(Notify::new());
    let mut generator = ScriptedGenerator::ok(vec![RawProblem::new("a", &["0", "1", "2"], 0)]);
    generator.gate = Some(gate.clone());
    let (h, generator) = harness(generator);

    let pending = {
      let c = h.controller.clone();
      tokio::spawn(async move { c.submit_image(photo()).await })
    };
    while generator.calls.load(Ordering::SeqCst) == 0 {
      tokio::task::yield_now().await;
    }
    pending.abort();
    assert!(pending.await.unwrap_err().is_cancelled());
    gate.notify_one();

    for _ in 0..100 {
      if h.controller.view().await.status != Status::Loading {
        break;
      }
      tokio::task::yield_now().await;
    }
    assert_eq!(h.controller.view().await.status, Status::Playing);
    assert_eq!(stored(&h).status, Status::Playing);
  }

  #[tokio::test]
  async fn dropped_submit_with_failing_generator_lands_in_idle() {
    let gate = Arc::new(Notify::new());
    let mut generator = ScriptedGenerator::err(GenerationError::Network("timeout".into()));
    generator.gate = Some(gate.clone());
    let (h, generator) = harness(generator);

    let pending = {
      let c = h.controller.clone();
      tokio::spawn(async move { c.submit_image(photo()).await })
    };
    while generator.calls.load(Ordering::SeqCst) == 0 {
      tokio::task::yield_now().await;
    }
    pending.abort();
    let _ = pending.await;
    gate.notify_one();

    for _ in 0..100 {
      if h.controller.view().await.status != Status::Loading {
        break;
      }
      tokio::task::yield_now().await;
    }
    assert_eq!(stored(&h).status, Status::Idle);
    gate.notify_one();
    assert!(matches!(h.controller.submit_image(photo()).await, Err(SubmitError::Generation(_))));
  }

  #[tokio::test]
  async fn restart_restores_progress_in_idle() {
    let store = Arc::new(MemorySnapshotStore::new());
    let raw = vec![RawProblem::new("a", &["0", "1", "2"], 0), RawProblem::new("b", &["0", "1", "2"], 0)];
    let (h, _) = harness_with(ScriptedGenerator::ok(raw), store.clone(), Some("sk-test"));
    h.controller.submit_image(photo()).await.unwrap();
    h.controller.submit_answer(1).await;
    let before = h.controller.snapshot().await;
    assert_eq!(before.status, Status::Feedback);

    let (after, _) = harness_with(ScriptedGenerator::ok(vec![]), store, Some("sk-test"));
    let s = after.controller.snapshot().await;
    assert_eq!(s.status, Status::Idle);
    assert_eq!(s.problems, before.problems);
    assert_eq!(s.current_index, before.current_index);
    assert_eq!(s.wrong_problem_ids, before.wrong_problem_ids);
  }

  #[tokio::test]
  async fn answers_while_idle_do_nothing() {
    let (h, _) = harness(ScriptedGenerator::ok(vec![]));
    assert_eq!(h.controller.submit_answer(0).await, None);
    assert!(h.cues.0.lock().unwrap().is_empty());
    assert!(h.store.load("quiz_session").unwrap().is_none());
  }
}
