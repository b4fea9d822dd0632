//! Procedural feedback cues: a square-wave arpeggio for "correct" and a downward
//! thud for "wrong".
//!
//! Each play call renders a fresh buffer from a `CueShape` (the one-shot
//! oscillator + gain pair) and hands it to the shared `AudioOutput`. The output is
//! opened lazily on first use and resumed whenever it reports `Suspended`.
//! Any audio failure is swallowed.

use std::sync::{Arc, OnceLock};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cue {
  Success,
  Failure,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputState {
  Running,
  Suspended,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AudioError {
  #[error("audio output unavailable")]
  Unavailable,
  #[error("audio output is suspended")]
  Suspended,
  #[error("failed to encode cue: {0}")]
  Encode(String),
}

/// The process-wide audio sink.
pub trait AudioOutput: Send + Sync {
  fn sample_rate(&self) -> u32;
  fn state(&self) -> OutputState;
  fn resume(&self) -> Result<(), AudioError>;
  fn play(&self, cue: Cue, samples: Vec<f32>) -> Result<(), AudioError>;
}

/// Frequency program for one cue.
#[derive(Clone, Copy, Debug)]
pub enum Pitch {
  /// Hold each frequency for `hold` seconds; the last one holds to the end.
  Steps { freqs: &'static [f32], hold: f32 },
  /// Exponential ramp from `from` to `to` over the cue duration.
  Sweep { from: f32, to: f32 },
}

#[derive(Clone, Copy, Debug)]
pub enum Envelope {
  Exponential { from: f32, to: f32 },
  Linear { from: f32, to: f32 },
}

#[derive(Clone, Copy, Debug)]
pub struct CueShape {
  pub duration: f32,
  pub pitch: Pitch,
  pub envelope: Envelope,
}

/// C5, E5, G5, C6.
pub const SUCCESS_NOTES: [f32; 4] = [523.25, 659.25, 783.99, 1046.50];

pub const SUCCESS: CueShape = CueShape {
  duration: 0.5,
  pitch: Pitch::Steps { freqs: &SUCCESS_NOTES, hold: 0.1 },
  envelope: Envelope::Exponential { from: 0.1, to: 0.01 },
};

pub const FAILURE: CueShape = CueShape {
  duration: 0.3,
  pitch: Pitch::Sweep { from: 110.0, to: 55.0 },
  envelope: Envelope::Linear { from: 0.2, to: 0.0 },
};

impl CueShape {
  pub fn for_cue(cue: Cue) -> &'static CueShape {
    match cue {
      Cue::Success => &SUCCESS,
      Cue::Failure => &FAILURE,
    }
  }

  pub fn frequency_at(&self, t: f32) -> f32 {
    match self.pitch {
      Pitch::Steps { freqs, hold } => {
        let step = ((t / hold) as usize).min(freqs.len().saturating_sub(1));
        freqs.get(step).copied().unwrap_or_default()
      }
      Pitch::Sweep { from, to } => from * (to / from).powf((t / self.duration).clamp(0.0, 1.0)),
    }
  }

  pub fn gain_at(&self, t: f32) -> f32 {
    let x = (t / self.duration).clamp(0.0, 1.0);
    match self.envelope {
      Envelope::Exponential { from, to } => from * (to / from).powf(x),
      Envelope::Linear { from, to } => from + (to - from) * x,
    }
  }

  /// Render mono samples in [-1, 1] with a phase-accumulating square oscillator.
  pub fn render(&self, sample_rate: u32) -> Vec<f32> {
    let sr = sample_rate.max(1) as f32;
    let len = (self.duration * sr).round() as usize;
    let mut phase = 0.0f32;
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
      let t = i as f32 / sr;
      let square = if phase < 0.5 { 1.0 } else { -1.0 };
      out.push(square * self.gain_at(t));
      phase = (phase + self.frequency_at(t) / sr).fract();
    }
    out
  }
}

type OutputFactory = Box<dyn Fn() -> Option<Arc<dyn AudioOutput>> + Send + Sync>;

pub struct ToneSynthesizer {
  open: OutputFactory,
  output: OnceLock<Option<Arc<dyn AudioOutput>>>,
}

impl ToneSynthesizer {
  /// `open` runs at most once, on the first play call. Returning None disables audio.
  pub fn new(open: impl Fn() -> Option<Arc<dyn AudioOutput>> + Send + Sync + 'static) -> Self {
    Self { open: Box::new(open), output: OnceLock::new() }
  }

  pub fn silent() -> Self { Self::new(|| None) }

  pub fn play_success(&self) { self.play(Cue::Success) }

  pub fn play_failure(&self) { self.play(Cue::Failure) }

  #[instrument(level = "debug", skip(self))]
  pub fn play(&self, cue: Cue) {
    let Some(output) = self.ready_output() else { return };
    let samples = CueShape::for_cue(cue).render(output.sample_rate());
    if let Err(e) = output.play(cue, samples) {
      debug!(target: "audio", ?cue, error = %e, "Cue dropped");
    }
  }

  fn ready_output(&self) -> Option<Arc<dyn AudioOutput>> {
    let output = self.output.get_or_init(|| (self.open)()).clone()?;
    if output.state() == OutputState::Suspended {
      if let Err(e) = output.resume() {
        debug!(target: "audio", error = %e, "Audio output could not be resumed");
        return None;
      }
    }
    Some(output)
  }
}
