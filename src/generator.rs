//! Problem-generation collaborator boundary.
//!
//! The controller only sees `ProblemGenerator`; failures are classified into
//! `GenerationError` kinds by the implementation, never by inspecting messages.

use async_trait::async_trait;
use thiserror::Error;

use crate::payload::RawProblem;

/// One still image plus its MIME type.
#[derive(Clone, Debug)]
pub struct ImageUpload {
  pub mime: String,
  pub bytes: Vec<u8>,
}

impl ImageUpload {
  pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
    Self { mime: mime.into(), bytes }
  }

  pub fn is_image(&self) -> bool {
    self.mime.starts_with("image/") && !self.bytes.is_empty()
  }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GenerationError {
  #[error("credential rejected: {0}")]
  CredentialInvalid(String),
  #[error("network error: {0}")]
  Network(String),
  #[error("generation service returned HTTP {status}: {message}")]
  Service { status: u16, message: String },
  #[error("malformed generation response: {0}")]
  MalformedResponse(String),
  #[error("no problems found in the image")]
  NoProblems,
}

impl GenerationError {
  pub fn needs_credential_reselection(&self) -> bool {
    matches!(self, GenerationError::CredentialInvalid(_))
  }

  /// Short user-facing notice text.
  pub fn notice(&self) -> &'static str {
    match self {
      GenerationError::CredentialInvalid(_) => "The API key was rejected. Please select a key again.",
      GenerationError::NoProblems => "No problems were found in that photo. Try another one.",
      _ => "Could not create problems from that photo. Please try again.",
    }
  }
}

#[async_trait]
pub trait ProblemGenerator: Send + Sync {
  /// Returns up to the configured maximum of raw items (0..=5), unrepaired.
  async fn generate(&self, image: &ImageUpload) -> Result<Vec<RawProblem>, GenerationError>;
}
