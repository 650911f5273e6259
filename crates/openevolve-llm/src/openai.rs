use crate::client::ChatClient;
use crate::error::LlmError;
use crate::types::{ChatMessage, GenerateOptions};
use async_trait::async_trait;
use openevolve_config::{LlmConfig, ModelConfig};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Value,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

/// Fully resolved settings for one ensemble member: per-model overrides
/// applied over the shared transport config.
#[derive(Clone, Debug)]
pub struct ModelSettings {
    pub name: String,
    pub weight: f64,
    pub api_base: String,
    pub api_key: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub retries: u32,
    pub retry_delay_secs: f64,
    pub seed: Option<u64>,
    pub reasoning_effort: Option<String>,
}

impl ModelSettings {
    pub fn resolve(model: &ModelConfig, shared: &LlmConfig) -> Self {
        Self {
            name: model.name.clone(),
            weight: model.weight,
            api_base: model.api_base.clone().unwrap_or_else(|| shared.api_base.clone()),
            api_key: model.api_key.clone().unwrap_or_else(|| shared.api_key.clone()),
            temperature: model.temperature.unwrap_or(shared.temperature),
            top_p: model.top_p.unwrap_or(shared.top_p),
            max_tokens: model.max_tokens.unwrap_or(shared.max_tokens),
            timeout_secs: model.timeout.unwrap_or(shared.timeout),
            retries: model.retries.unwrap_or(shared.retries),
            retry_delay_secs: model.retry_delay.unwrap_or(shared.retry_delay),
            seed: model.random_seed.or(shared.random_seed),
            reasoning_effort: model
                .reasoning_effort
                .clone()
                .or_else(|| shared.reasoning_effort.clone()),
        }
    }
}

/// Single-model chat-completion client for any OpenAI-compatible API.
pub struct OpenAiChatClient {
    settings: ModelSettings,
    http: Client,
}

impl OpenAiChatClient {
    pub fn new(settings: ModelSettings) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| LlmError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { settings, http })
    }

    fn endpoint(&self) -> String {
        let base = self.settings.api_base.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{}/chat/completions", base)
        }
    }

    fn build_payload(
        &self,
        system: &str,
        messages: &[ChatMessage],
        options: &GenerateOptions,
    ) -> Value {
        let mut wire_messages = Vec::with_capacity(messages.len() + 1);
        if !system.trim().is_empty() {
            wire_messages.push(json!({ "role": "system", "content": system }));
        }
        for m in messages {
            wire_messages.push(json!({ "role": m.role, "content": m.content }));
        }

        let mut payload = json!({
            "model": self.settings.name,
            "messages": wire_messages,
            "temperature": options.temperature.unwrap_or(self.settings.temperature),
            "top_p": options.top_p.unwrap_or(self.settings.top_p),
            "max_tokens": options.max_tokens.unwrap_or(self.settings.max_tokens),
        });
        if let Some(stop) = &options.stop {
            payload["stop"] = json!(stop);
        }
        if let Some(effort) = options
            .reasoning_effort
            .as_ref()
            .or(self.settings.reasoning_effort.as_ref())
        {
            payload["reasoning_effort"] = json!(effort);
        }
        if let Some(seed) = options.seed.or(self.settings.seed) {
            payload["seed"] = json!(seed);
        }
        payload
    }

    async fn request_once(
        &self,
        system: &str,
        messages: &[ChatMessage],
        options: &GenerateOptions,
    ) -> Result<String, LlmError> {
        let payload = self.build_payload(system, messages, options);
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.settings.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| LlmError::Transport(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!(
                "{} error {}: {}",
                self.settings.name,
                status,
                truncate(&body, 320)
            )));
        }

        let body: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Api(format!("invalid response: {}", e)))?;
        let choice = body
            .choices
            .first()
            .ok_or_else(|| LlmError::Api("response did not include choices".to_string()))?;
        let text = extract_text(&choice.message.content);
        if text.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(text)
    }
}

#[async_trait]
impl ChatClient for OpenAiChatClient {
    async fn generate(
        &self,
        system: &str,
        messages: &[ChatMessage],
        options: &GenerateOptions,
    ) -> Result<String, LlmError> {
        let attempts = self.settings.retries.max(1);
        let mut last_error = LlmError::EmptyResponse;
        for attempt in 1..=attempts {
            match self.request_once(system, messages, options).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    warn!(
                        model = %self.settings.name,
                        attempt,
                        error = %e,
                        "LLM attempt failed"
                    );
                    last_error = e;
                    if attempt < attempts {
                        tokio::time::sleep(Duration::from_secs_f64(
                            self.settings.retry_delay_secs,
                        ))
                        .await;
                    }
                }
            }
        }
        Err(LlmError::RetryExhausted {
            attempts,
            cause: Box::new(last_error),
        })
    }

    fn model_name(&self) -> &str {
        &self.settings.name
    }
}

fn extract_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    let mut chars = value.chars();
    let truncated: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}
