//! Credential-selection boundary.
//!
//! A host may provide a capability that knows whether a key was selected and can
//! open its selection UI. Without one, presence is inferred from the configured API key.

use std::sync::Arc;

use tracing::info;

pub trait HostCredentials: Send + Sync {
  fn has_selected_key(&self) -> bool;
  /// Fire-and-forget.
  fn open_select_key(&self);
}

#[derive(Clone)]
pub struct Credentials {
  host: Option<Arc<dyn HostCredentials>>,
  api_key_present: bool,
}

impl Credentials {
  pub fn new(host: Option<Arc<dyn HostCredentials>>, api_key: Option<&str>) -> Self {
    let api_key_present = api_key.is_some_and(|k| !k.trim().is_empty());
    Self { host, api_key_present }
  }

  pub fn has_credential(&self) -> bool {
    match &self.host {
      Some(host) => host.has_selected_key(),
      None => self.api_key_present,
    }
  }

  /// Ask the host to show its selection UI. Returns false when there is no host to ask.
  pub fn request_selection(&self) -> bool {
    match &self.host {
      Some(host) => {
        host.open_select_key();
        true
      }
      None => {
        info!(target: "quizpad_backend", "No credential host; set OPENAI_API_KEY to configure a key");
        false
      }
    }
  }
}
