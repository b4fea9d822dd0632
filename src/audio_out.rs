//! `AudioOutput` that ships cues to connected clients as base64 WAV.
//!
//! The output counts as suspended while nobody is listening and stays suspended
//! until resumed again once a listener is back.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tokio::sync::broadcast;
use tracing::debug;

use crate::protocol::ServerWsMessage;
use crate::tones::{AudioError, AudioOutput, Cue, OutputState};

pub struct WavBroadcastOutput {
  sample_rate: u32,
  events: broadcast::Sender<ServerWsMessage>,
  suspended: AtomicBool,
}

impl WavBroadcastOutput {
  pub fn new(sample_rate: u32, events: broadcast::Sender<ServerWsMessage>) -> Self {
    Self { sample_rate, events, suspended: AtomicBool::new(true) }
  }
}

/// 16-bit mono PCM WAV.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
  let spec = hound::WavSpec {
    channels: 1,
    sample_rate,
    bits_per_sample: 16,
    sample_format: hound::SampleFormat::Int,
  };
  let mut buf = Vec::new();
  {
    let mut writer = hound::WavWriter::new(Cursor::new(&mut buf), spec)?;
    for s in samples {
      writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;
  }
  Ok(buf)
}

impl AudioOutput for WavBroadcastOutput {
  fn sample_rate(&self) -> u32 { self.sample_rate }

  fn state(&self) -> OutputState {
    if self.events.receiver_count() == 0 {
      self.suspended.store(true, Ordering::SeqCst);
    }
    if self.suspended.load(Ordering::SeqCst) { OutputState::Suspended } else { OutputState::Running }
  }

  fn resume(&self) -> Result<(), AudioError> {
    if self.events.receiver_count() == 0 {
      return Err(AudioError::Suspended);
    }
    self.suspended.store(false, Ordering::SeqCst);
    Ok(())
  }

  fn play(&self, cue: Cue, samples: Vec<f32>) -> Result<(), AudioError> {
    let wav = encode_wav(&samples, self.sample_rate).map_err(|e| AudioError::Encode(e.to_string()))?;
    let wav_base64 = STANDARD.encode(wav);
    self
      .events
      .send(ServerWsMessage::Cue { cue, wav_base64 })
      .map_err(|_| AudioError::Unavailable)?;
    debug!(target: "audio", ?cue, samples = samples.len(), "Cue sent");
    Ok(())
  }
}
