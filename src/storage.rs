//! Snapshot persistence: one named slot per session key, full overwrite on every save.
//!
//! `restore_session` is the only reader; anything unreadable, unparsable or
//! structurally inconsistent is treated as "no snapshot".

#[cfg(test)]
use std::collections::HashMap;
use std::path::PathBuf;
#[cfg(test)]
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::SessionState;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub trait SnapshotStore: Send + Sync {
  fn load(&self, key: &str) -> Result<Option<String>, StorageError>;
  fn save(&self, key: &str, snapshot: &str) -> Result<(), StorageError>;
}

/// One JSON file per key under `dir`.
pub struct FileSnapshotStore {
  dir: PathBuf,
}

impl FileSnapshotStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self { Self { dir: dir.into() } }

  fn path_for(&self, key: &str) -> PathBuf {
    let safe: String = key
      .chars()
      .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
      .collect();
    self.dir.join(format!("{safe}.json"))
  }
}

impl SnapshotStore for FileSnapshotStore {
  fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
    match std::fs::read_to_string(self.path_for(key)) {
      Ok(s) => Ok(Some(s)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.into()),
    }
  }

  fn save(&self, key: &str, snapshot: &str) -> Result<(), StorageError> {
    std::fs::create_dir_all(&self.dir)?;
    let path = self.path_for(key);
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, snapshot)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
  }
}

/// Volatile store for tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemorySnapshotStore {
  slots: Mutex<HashMap<String, String>>,
}

#[cfg(test)]
impl MemorySnapshotStore {
  pub fn new() -> Self { Self::default() }

  pub fn with_snapshot(key: &str, snapshot: &str) -> Self {
    let store = Self::default();
    store.put(key, snapshot);
    store
  }

  fn put(&self, key: &str, snapshot: &str) {
    if let Ok(mut slots) = self.slots.lock() {
      slots.insert(key.to_string(), snapshot.to_string());
    }
  }
}

#[cfg(test)]
impl SnapshotStore for MemorySnapshotStore {
  fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
    Ok(self.slots.lock().ok().and_then(|s| s.get(key).cloned()))
  }

  fn save(&self, key: &str, snapshot: &str) -> Result<(), StorageError> {
    self.put(key, snapshot);
    Ok(())
  }
}

pub fn save_session(store: &dyn SnapshotStore, key: &str, state: &SessionState) -> Result<(), StorageError> {
  let json = serde_json::to_string(state)?;
  store.save(key, &json)
}

/// Initial state at startup: the stored snapshot with status forced to IDLE, or a fresh state.
pub fn restore_session(store: &dyn SnapshotStore, key: &str) -> SessionState {
  let text = match store.load(key) {
    Ok(Some(t)) => t,
    Ok(None) => {
      debug!(target: "storage", %key, "No snapshot; starting fresh");
      return SessionState::fresh();
    }
    Err(e) => {
      warn!(target: "storage", %key, error = %e, "Snapshot unreadable; starting fresh");
      return SessionState::fresh();
    }
  };
  match serde_json::from_str::<SessionState>(&text) {
    Ok(state) if state.is_consistent() => {
      debug!(target: "storage", %key, problems = state.problems.len(), index = state.current_index, "Snapshot restored");
      state.into_restored()
    }
    Ok(_) => {
      warn!(target: "storage", %key, "Snapshot failed validation; starting fresh");
      SessionState::fresh()
    }
    Err(e) => {
      warn!(target: "storage", %key, error = %e, "Snapshot failed to parse; starting fresh");
      SessionState::fresh()
    }
  }
}
