//! External question generation.
//!
//! `QuestionGenerator` is the seam the engine calls through. The OpenAI-compatible
//! client requests a strict JSON object and treats non-2xx responses, unparsable
//! bodies and missing fields as errors. The offline generator fills templates so
//! the service stays usable without an API key.
//!
//! NOTE: we never log the API key or prompt contents; only model, latency, usage.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::config::Prompts;
use crate::domain::{Level, QuestionContent};
use crate::error::GenerationError;
use crate::seeds::OFFLINE_TEMPLATES;
use crate::util::{fill_template, trunc_for_log};

/// What to generate. `context` holds existing questions used as style and
/// difficulty exemplars.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
  pub subject: String,
  pub level: Level,
  pub count: usize,
  pub topics: Vec<String>,
  pub context: Vec<QuestionContent>,
}

#[async_trait]
pub trait QuestionGenerator: Send + Sync {
  async fn generate(&self, req: &GenerationRequest) -> Result<Vec<QuestionContent>, GenerationError>;

  fn name(&self) -> &str;
}

/// Call the generator with an upper bound on latency. A timeout is an error like any other.
pub async fn generate_bounded(
  generator: &dyn QuestionGenerator,
  req: &GenerationRequest,
  timeout: Duration,
) -> Result<Vec<QuestionContent>, GenerationError> {
  match tokio::time::timeout(timeout, generator.generate(req)).await {
    Ok(result) => result,
    Err(_) => Err(GenerationError::Timeout(timeout.as_secs())),
  }
}

/// Drop incomplete items, fill a blank topic from the request, cap at `count`.
pub fn sanitize(items: Vec<QuestionContent>, req: &GenerationRequest) -> Vec<QuestionContent> {
  let default_topic = req.topics.first().cloned().unwrap_or_default();
  let before = items.len();
  let mut out: Vec<QuestionContent> = items
    .into_iter()
    .filter(QuestionContent::is_complete)
    .map(|mut c| {
      if c.topic.trim().is_empty() {
        c.topic = default_topic.clone();
      }
      c
    })
    .collect();
  out.truncate(req.count);
  if out.len() < before {
    warn!(target: "generation", subject = %req.subject, level = %req.level, kept = out.len(), received = before, "Dropped incomplete or surplus generated items");
  }
  out
}

#[derive(Clone)]
pub struct OpenAiGenerator {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub model: String,
  pub prompts: Prompts,
}

#[derive(Deserialize)]
struct GenBatch {
  questions: Vec<QuestionContent>,
}

impl OpenAiGenerator {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env(prompts: Prompts, timeout: Duration) -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty())?;
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());

    let client = reqwest::Client::builder().timeout(timeout).build().ok()?;

    Some(Self { client, api_key, base_url, model, prompts })
  }

  fn build_user_prompt(&self, req: &GenerationRequest) -> String {
    let examples = if req.context.is_empty() {
      String::new()
    } else {
      let listed = req
        .context
        .iter()
        .map(|c| format!("- Q: {}\n  A: {}", c.question, c.answer))
        .collect::<Vec<_>>()
        .join("\n");
      fill_template(&self.prompts.examples_template, &[("examples", &listed)])
    };
    let topics = if req.topics.is_empty() { "any topic of the subject".to_string() } else { req.topics.join(", ") };
    fill_template(
      &self.prompts.generate_user_template,
      &[
        ("count", &req.count.to_string()),
        ("level", req.level.as_str()),
        ("subject", &req.subject),
        ("topics", &topics),
        ("examples", &examples),
      ],
    )
  }

  /// JSON-object chat completion. Generic over the target type T.
  #[instrument(level = "info", skip(self, system, user), fields(model = %self.model))]
  async fn chat_json<T: for<'a> Deserialize<'a>>(&self, system: &str, user: &str, temperature: f32) -> Result<T, GenerationError> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: self.model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      temperature,
      response_format: Some(ResponseFormat { r#type: "json_object".into() }),
    };

    let res = self.client.post(&url)
      .header(USER_AGENT, "qbank-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await.map_err(|e| GenerationError::Http(e.to_string()))?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_openai_error(&body).unwrap_or_else(|| trunc_for_log(&body, 200));
      return Err(GenerationError::Http(format!("HTTP {}: {}", status, msg)));
    }

    let body: ChatCompletionResponse = res.json().await.map_err(|e| GenerationError::Malformed(e.to_string()))?;
    if let Some(usage) = &body.usage {
      info!(target: "generation", prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let text = body.choices.first()
      .and_then(|c| c.message.content.clone())
      .unwrap_or_default();

    serde_json::from_str::<T>(&text).map_err(|e| GenerationError::Malformed(format!("JSON parse error: {}", e)))
  }
}

#[async_trait]
impl QuestionGenerator for OpenAiGenerator {
  #[instrument(level = "info", skip(self, req), fields(subject = %req.subject, level = %req.level, count = req.count, topics = req.topics.len(), context = req.context.len()))]
  async fn generate(&self, req: &GenerationRequest) -> Result<Vec<QuestionContent>, GenerationError> {
    if req.count == 0 {
      return Ok(Vec::new());
    }
    let system = fill_template(&self.prompts.generate_system, &[("subject", &req.subject), ("level", req.level.as_str())]);
    let user = self.build_user_prompt(req);
    let start = Instant::now();
    let result = self.chat_json::<GenBatch>(&system, &user, 0.9).await;
    let elapsed = start.elapsed();

    match result {
      Ok(batch) => {
        let items = sanitize(batch.questions, req);
        info!(target: "generation", ?elapsed, generated = items.len(), "Model response received successfully");
        Ok(items)
      }
      Err(e) => {
        error!(target: "generation", ?elapsed, error = %e, "Model call failed during question generation");
        Err(e)
      }
    }
  }

  fn name(&self) -> &str {
    "openai"
  }
}

/// Template-based generator for running without an external service.
pub struct OfflineGenerator;

#[async_trait]
impl QuestionGenerator for OfflineGenerator {
  async fn generate(&self, req: &GenerationRequest) -> Result<Vec<QuestionContent>, GenerationError> {
    let topics: Vec<String> = if req.topics.is_empty() { vec![req.subject.clone()] } else { req.topics.clone() };
    let stamp = uuid::Uuid::new_v4().simple().to_string();
    let items = (0..req.count)
      .map(|i| {
        let topic = &topics[i % topics.len()];
        let (q, a) = OFFLINE_TEMPLATES[(i / topics.len()) % OFFLINE_TEMPLATES.len()];
        let n = format!("{}-{}", &stamp[..8], i + 1);
        let pairs = [("subject", req.subject.as_str()), ("topic", topic.as_str()), ("n", n.as_str())];
        QuestionContent {
          question: fill_template(q, &pairs),
          answer: fill_template(a, &pairs),
          topic: topic.clone(),
        }
      })
      .collect();
    Ok(items)
  }

  fn name(&self) -> &str {
    "offline"
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
struct ChatMessageReq { role: String, content: String }
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
