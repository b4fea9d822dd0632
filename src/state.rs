//! Application state: the quiz controller, the memo surface and the event channel.
//!
//! Built once at startup from `AppConfig` and the OpenAI environment. There is a
//! single session per process; the controller is the only writer of its state.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, instrument};

use crate::audio_out::WavBroadcastOutput;
use crate::config::{AppConfig, OpenAiSettings};
use crate::controller::{ControllerParts, QuizController};
use crate::credentials::Credentials;
use crate::generator::ProblemGenerator;
use crate::openai::OpenAI;
use crate::protocol::ServerWsMessage;
use crate::storage::{FileSnapshotStore, SnapshotStore};
use crate::surface::{StrokeStyle, StrokeSurface, SurfaceHandle};
use crate::tones::{AudioOutput, ToneSynthesizer};

const EVENT_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct AppState {
  pub controller: Arc<QuizController>,
  pub memo: SurfaceHandle,
  pub events: broadcast::Sender<ServerWsMessage>,
}

impl AppState {
  /// Production wiring: OpenAI generator, file snapshots, WAV cue broadcast.
  #[instrument(level = "info", skip_all)]
  pub fn new(cfg: AppConfig, settings: OpenAiSettings) -> Result<Self, reqwest::Error> {
    let openai = OpenAI::new(&settings, cfg.prompts.clone(), cfg.quiz.max_problems)?;
    if settings.api_key.is_some() {
      info!(target: "quizpad_backend", base_url = %openai.base_url, vision_model = %openai.vision_model, "OpenAI enabled.");
    } else {
      info!(target: "quizpad_backend", "OPENAI_API_KEY not set; photo submission will ask for a key.");
    }
    let credentials = Credentials::new(None, settings.api_key.as_deref());
    let store = Arc::new(FileSnapshotStore::new(cfg.storage.dir.clone()));
    info!(target: "storage", dir = %cfg.storage.dir.display(), key = %cfg.quiz.session_key, "Session snapshots on disk");
    Ok(Self::assemble(&cfg, Arc::new(openai), credentials, store))
  }

  pub fn assemble(
    cfg: &AppConfig,
    generator: Arc<dyn ProblemGenerator>,
    credentials: Credentials,
    store: Arc<dyn SnapshotStore>,
  ) -> Self {
    let (events, _) = broadcast::channel(EVENT_CAPACITY);

    let memo = SurfaceHandle::new(
      StrokeSurface::new(StrokeStyle::round(cfg.memo.stroke_color.clone(), cfg.memo.stroke_width)),
      Some(events.clone()),
    );

    let tones = if cfg.audio.enabled {
      let events = events.clone();
      let sample_rate = cfg.audio.sample_rate;
      ToneSynthesizer::new(move || {
        info!(target: "audio", sample_rate, "Audio output opened");
        Some(Arc::new(WavBroadcastOutput::new(sample_rate, events.clone())) as Arc<dyn AudioOutput>)
      })
    } else {
      info!(target: "audio", "Audio cues disabled");
      ToneSynthesizer::silent()
    };

    let controller = QuizController::new(ControllerParts {
      store,
      session_key: cfg.quiz.session_key.clone(),
      generator,
      credentials,
      tones,
      memo: Arc::new(memo.clone()),
      events: events.clone(),
      feedback_delay: cfg.quiz.feedback_delay(),
      max_problems: cfg.quiz.max_problems,
    });

    Self { controller, memo, events }
  }
}
