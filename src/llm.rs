//! Chat-completion client abstraction.
//!
//! [`LlmClient`] is the seam between the study pipeline and whatever model
//! answers prompts. The shipped implementation talks to any
//! OpenAI-compatible `POST /chat/completions` endpoint, which covers both
//! the hosted OpenAI API and a local Ollama server (`/v1`).
//!
//! # Retry Strategy
//!
//! Same policy as the embedding client:
//!
//! - HTTP 429 and 5xx → retry with exponential backoff (1s, 2s, 4s, ...)
//! - other 4xx → fail immediately
//! - network errors (including timeouts) → retry

use async_trait::async_trait;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{Result, StudyError};
use crate::models::Turn;

/// One completion request: an optional system prompt plus ordered turns.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub system_prompt: Option<String>,
    pub turns: Vec<Turn>,
    pub temperature: Option<f32>,
}

impl ChatRequest {
    /// A single user prompt with no history.
    pub fn prompt(text: impl Into<String>) -> Self {
        Self {
            system_prompt: None,
            turns: vec![Turn::new(crate::models::Role::User, text)],
            temperature: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Model identifier, for logging.
    fn model(&self) -> &str;

    /// Returns the assistant's reply text.
    async fn complete(&self, request: &ChatRequest) -> Result<String>;
}

/// Client for OpenAI-compatible chat completion APIs.
pub struct OpenAiClient {
    model: String,
    api_base: String,
    api_key: Option<String>,
    max_tokens: u32,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiClient {
    /// Builds a client with an explicit API key (`None` for servers without auth).
    pub fn new(config: &LlmConfig, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StudyError::Llm(format!("cannot build http client: {}", e)))?;

        Ok(Self {
            model: config.model_name().to_string(),
            api_base: config.api_base().to_string(),
            api_key,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            max_retries: config.max_retries,
            client,
        })
    }

    fn build_messages(request: &ChatRequest) -> Vec<serde_json::Value> {
        let mut messages = Vec::with_capacity(request.turns.len() + 1);
        if let Some(system) = &request.system_prompt {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        for turn in &request.turns {
            messages.push(serde_json::json!({
                "role": turn.role.as_str(),
                "content": turn.content,
            }));
        }
        messages
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = serde_json::json!({
            "model": self.model,
            "messages": Self::build_messages(request),
            "max_tokens": self.max_tokens,
            "temperature": request.temperature.unwrap_or(self.temperature),
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut req = self.client.post(&url).json(&body);
            if let Some(key) = &self.api_key {
                req = req.header("Authorization", format!("Bearer {}", key));
            }

            match req.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| StudyError::Llm(format!("invalid response body: {}", e)))?;
                        return parse_completion(&json);
                    }

                    let text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(%status, attempt, model = %self.model, "chat completion failed, retrying");
                        last_err = Some(StudyError::Llm(format!("API error {}: {}", status, text)));
                        continue;
                    }
                    return Err(StudyError::Llm(format!("API error {}: {}", status, text)));
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "chat completion transport error");
                    last_err = Some(StudyError::Llm(e.to_string()));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| StudyError::Llm("completion failed after retries".into())))
    }
}

/// Extracts `choices[0].message.content`.
fn parse_completion(json: &serde_json::Value) -> Result<String> {
    json["choices"]
        .as_array()
        .and_then(|arr| arr.first())
        .and_then(|c| c["message"]["content"].as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| StudyError::Llm("response is missing choices[0].message.content".into()))
}

/// Stand-in used when `llm.provider = "disabled"`; every call fails.
pub struct DisabledClient;

#[async_trait]
impl LlmClient for DisabledClient {
    fn model(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _request: &ChatRequest) -> Result<String> {
        Err(StudyError::Llm(
            "no LLM provider configured (llm.provider = \"disabled\")".into(),
        ))
    }
}

/// Creates the configured client. The OpenAI provider requires `OPENAI_API_KEY`;
/// Ollama uses it only when set.
pub fn create_client(config: &LlmConfig) -> Result<Box<dyn LlmClient>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledClient)),
        "openai" => {
            let key = std::env::var("OPENAI_API_KEY").map_err(|_| {
                StudyError::Llm("OPENAI_API_KEY environment variable not set".into())
            })?;
            Ok(Box::new(OpenAiClient::new(config, Some(key))?))
        }
        "ollama" => Ok(Box::new(OpenAiClient::new(
            config,
            std::env::var("OPENAI_API_KEY").ok(),
        )?)),
        other => Err(StudyError::Llm(format!("unknown llm provider: {}", other))),
    }
}
