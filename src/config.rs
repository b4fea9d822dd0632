//! Loading application configuration (prompts + quiz/storage/audio/memo knobs) from TOML.
//!
//! Every section is optional. Environment variables for the OpenAI endpoint are
//! read separately by `OpenAiSettings::from_env`.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub quiz: QuizConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub audio: AudioConfig,
  #[serde(default)]
  pub memo: MemoConfig,
}

/// Prompts used by the OpenAI client. `{max_problems}` is filled in at call time.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub problem_system: String,
  pub problem_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      problem_system: "You are a friendly math teacher for elementary school children. Respond ONLY with strict JSON.".into(),
      problem_user_template: "The photo shows a page of arithmetic practice problems. Read the problems, then write {max_problems} NEW problems of the same kind and difficulty. Return JSON {\"problems\": [{\"question\": string, \"options\": [string, string, string], \"answerIndex\": 0|1|2}]}. Exactly 3 options per problem, exactly one correct, and vary the position of the correct option.".into(),
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct QuizConfig {
  pub feedback_delay_ms: u64,
  pub max_problems: usize,
  pub session_key: String,
}

impl Default for QuizConfig {
  fn default() -> Self {
    Self { feedback_delay_ms: 1200, max_problems: 5, session_key: "quiz_session".into() }
  }
}

impl QuizConfig {
  pub fn feedback_delay(&self) -> Duration { Duration::from_millis(self.feedback_delay_ms) }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  pub dir: PathBuf,
}

impl Default for StorageConfig {
  fn default() -> Self { Self { dir: PathBuf::from("./data/sessions") } }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
  pub enabled: bool,
  pub sample_rate: u32,
}

impl Default for AudioConfig {
  fn default() -> Self { Self { enabled: true, sample_rate: 22_050 } }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MemoConfig {
  pub stroke_color: String,
  pub stroke_width: f32,
}

impl Default for MemoConfig {
  fn default() -> Self { Self { stroke_color: "#334155".into(), stroke_width: 4.0 } }
}

impl AppConfig {
  /// Load from QUIZ_CONFIG_PATH (if set), then apply SESSION_DIR. Errors fall back to defaults.
  pub fn from_env() -> Self {
    let mut cfg = load_config_from_env().unwrap_or_default();
    if let Ok(dir) = std::env::var("SESSION_DIR") {
      if !dir.trim().is_empty() {
        cfg.storage.dir = PathBuf::from(dir);
      }
    }
    cfg
  }
}

/// Attempt to load `AppConfig` from QUIZ_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_config_from_env() -> Option<AppConfig> {
  let path = std::env::var("QUIZ_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match parse_config(&s) {
      Ok(cfg) => {
        info!(target: "quizpad_backend", %path, "Loaded config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "quizpad_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "quizpad_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

pub fn parse_config(s: &str) -> Result<AppConfig, toml::de::Error> {
  toml::from_str::<AppConfig>(s)
}

/// Connection settings for the OpenAI-compatible vision endpoint.
#[derive(Clone, Debug)]
pub struct OpenAiSettings {
  pub api_key: Option<String>,
  pub base_url: String,
  pub vision_model: String,
}

impl OpenAiSettings {
  pub fn from_env() -> Self {
    Self {
      api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty()),
      base_url: std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into()),
      vision_model: std::env::var("OPENAI_VISION_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
    }
  }
}
