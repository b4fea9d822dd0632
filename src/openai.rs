//! Minimal OpenAI client for problem generation.
//!
//! One call: chat.completions with the photo attached as a data URL and a strict
//! JSON-object response. Failures are classified into `GenerationError` kinds from
//! the HTTP status and the transport error, never from message text.
//!
//! NOTE: We never log the API key or image bytes; only sizes, model names and latency.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::config::{OpenAiSettings, Prompts};
use crate::generator::{GenerationError, ImageUpload, ProblemGenerator};
use crate::payload::{parse_payload, RawProblem};
use crate::util::{fill_template, trunc_for_log};

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub vision_model: String,
  pub prompts: Prompts,
  pub max_problems: usize,
}

impl OpenAI {
  /// Build the client. A missing key yields a client whose calls are rejected as
  /// `CredentialInvalid`; the controller checks credentials before calling anyway.
  pub fn new(settings: &OpenAiSettings, prompts: Prompts, max_problems: usize) -> Result<Self, reqwest::Error> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(60))
      .build()?;
    Ok(Self {
      client,
      api_key: settings.api_key.clone().unwrap_or_default(),
      base_url: settings.base_url.trim_end_matches('/').to_string(),
      vision_model: settings.vision_model.clone(),
      prompts,
      max_problems,
    })
  }

  fn build_request(&self, image: &ImageUpload) -> ChatCompletionRequest {
    let max = self.max_problems.to_string();
    let user_text = fill_template(&self.prompts.problem_user_template, &[("max_problems", &max)]);
    let data_url = format!("data:{};base64,{}", image.mime, STANDARD.encode(&image.bytes));
    ChatCompletionRequest {
      model: self.vision_model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: vec![ContentPart::Text { text: self.prompts.problem_system.clone() }] },
        ChatMessageReq {
          role: "user".into(),
          content: vec![
            ContentPart::Text { text: user_text },
            ContentPart::ImageUrl { image_url: ImageUrl { url: data_url } },
          ],
        },
      ],
      temperature: 0.7,
      response_format: Some(ResponseFormat { r#type: "json_object".into() }),
    }
  }

  #[instrument(level = "info", skip(self, image), fields(model = %self.vision_model, mime = %image.mime, image_len = image.bytes.len()))]
  async fn chat_vision_json(&self, image: &ImageUpload) -> Result<String, GenerationError> {
    if self.api_key.is_empty() {
      return Err(GenerationError::CredentialInvalid("no API key configured".into()));
    }
    let url = format!("{}/chat/completions", self.base_url);
    let req = self.build_request(image);

    let res = self.client.post(&url)
      .header(USER_AGENT, "quizpad-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await
      .map_err(|e| GenerationError::Network(e.to_string()))?;

    let status = res.status();
    if !status.is_success() {
      let body = res.text().await.unwrap_or_default();
      let message = extract_openai_error(&body).unwrap_or_else(|| trunc_for_log(&body, 200));
      return Err(classify_status(status, message));
    }

    let body: ChatCompletionResponse = res
      .json()
      .await
      .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    body
      .choices
      .into_iter()
      .next()
      .and_then(|c| c.message.content)
      .ok_or_else(|| GenerationError::MalformedResponse("response had no content".into()))
  }
}

/// 401/403 mean a bad key; 404 means the key (or the model it grants) was not found.
pub fn classify_status(status: StatusCode, message: String) -> GenerationError {
  match status {
    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => GenerationError::CredentialInvalid(message),
    _ => GenerationError::Service { status: status.as_u16(), message },
  }
}

#[async_trait]
impl ProblemGenerator for OpenAI {
  #[instrument(level = "info", skip(self, image), fields(image_len = image.bytes.len()))]
  async fn generate(&self, image: &ImageUpload) -> Result<Vec<RawProblem>, GenerationError> {
    let start = std::time::Instant::now();
    let text = match self.chat_vision_json(image).await {
      Ok(t) => t,
      Err(e) => {
        error!(target: "generation", elapsed = ?start.elapsed(), error = %e, "Model call failed during problem generation");
        return Err(e);
      }
    };
    let raw = parse_payload(&text).map_err(|e| {
      error!(target: "generation", error = %e, preview = %trunc_for_log(&text, 120), "Model output was not the expected JSON");
      GenerationError::MalformedResponse(e.to_string())
    })?;
    info!(target: "generation", elapsed = ?start.elapsed(), items = raw.len(), "Problems received");
    Ok(raw)
  }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: Vec<ContentPart> }
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
  Text { text: String },
  ImageUrl { image_url: ImageUrl },
}
#[derive(Serialize)]
struct ImageUrl { url: String }
#[derive(Serialize)]
struct ResponseFormat { #[serde(rename = "type")] r#type: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}
