//! Chat-completion client.
//!
//! [`ChatModel`] is the seam to the language model. [`OpenAiChatClient`]
//! speaks the chat-completions protocol for two providers:
//!
//! | Provider | URL | Auth |
//! |----------|-----|------|
//! | `azure` | `{endpoint}/openai/deployments/{deployment}/chat/completions?api-version=…` | `api-key` header |
//! | `openai` | `{base_url}/chat/completions` | `Authorization: Bearer` |
//!
//! Azure settings fall back to `AZURE_OPENAI_KEY`, `AZURE_OPENAI_ENDPOINT`
//! and `AZURE_OPENAI_DEPLOYMENT`; OpenAI reads `OPENAI_API_KEY`. When the
//! credentials are absent, [`create_model`] returns an [`UnconfiguredModel`]
//! so that browsing still works and only questions fail.
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx → retry
//! - other 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, … (capped at 2^5)

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::DriveError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Identifier used in logs (model id or deployment name).
    fn model_name(&self) -> &str;

    /// Sends `messages` and returns the first choice's content.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, DriveError>;
}

/// Stand-in used when no model credentials are configured.
pub struct UnconfiguredModel {
    reason: String,
}

impl UnconfiguredModel {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ChatModel for UnconfiguredModel {
    fn model_name(&self) -> &str {
        "unconfigured"
    }

    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, DriveError> {
        Err(DriveError::Model(self.reason.clone()))
    }
}

enum Auth {
    ApiKey(String),
    Bearer(String),
}

pub struct OpenAiChatClient {
    http: reqwest::Client,
    url: String,
    auth: Auth,
    /// Sent in the body for `openai`; Azure addresses the model by URL.
    body_model: Option<String>,
    name: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
}

impl OpenAiChatClient {
    /// Client for an Azure OpenAI deployment.
    pub fn azure(
        config: &LlmConfig,
        endpoint: &str,
        deployment: &str,
        api_key: &str,
    ) -> anyhow::Result<Self> {
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            endpoint.trim_end_matches('/'),
            deployment,
            config.api_version
        );
        Self::build(
            config,
            url,
            Auth::ApiKey(api_key.to_string()),
            None,
            deployment,
        )
    }

    /// Client for the OpenAI API (or any compatible server at `base_url`).
    pub fn openai(config: &LlmConfig, model: &str, api_key: &str) -> anyhow::Result<Self> {
        let url = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
        Self::build(
            config,
            url,
            Auth::Bearer(api_key.to_string()),
            Some(model.to_string()),
            model,
        )
    }

    fn build(
        config: &LlmConfig,
        url: String,
        auth: Auth,
        body_model: Option<String>,
        name: &str,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            url,
            auth,
            body_model,
            name: name.to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
        })
    }

    fn request_body(&self, messages: &[ChatMessage]) -> serde_json::Value {
        let mut body = serde_json::json!({
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        if let Some(model) = &self.body_model {
            body["model"] = serde_json::Value::String(model.clone());
        }
        body
    }
}

#[async_trait]
impl ChatModel for OpenAiChatClient {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, DriveError> {
        let body = self.request_body(messages);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let request = self.http.post(&self.url).json(&body);
            let request = match &self.auth {
                Auth::ApiKey(key) => request.header("api-key", key),
                Auth::Bearer(key) => request.bearer_auth(key),
            };

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| DriveError::Model(format!("invalid response: {}", e)))?;
                        return parse_completion(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = DriveError::Model(format!("API error {}: {}", status, body_text));
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(attempt, status = status.as_u16(), "chat completion failed, retrying");
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "chat completion request failed");
                    last_err = Some(DriveError::Model(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| DriveError::Model("chat completion failed after retries".to_string())))
    }
}

/// Extracts `choices[0].message.content`.
fn parse_completion(json: &serde_json::Value) -> Result<String, DriveError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            DriveError::Model("invalid response: missing choices[0].message.content".to_string())
        })
}

fn env_or(value: &Option<String>, var: &str) -> Option<String> {
    value
        .clone()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
}

/// Builds the configured chat model.
///
/// Missing credentials are not an error here; the returned model fails each
/// call with a message naming what is missing.
pub fn create_model(config: &LlmConfig) -> anyhow::Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "azure" => {
            let key = std::env::var("AZURE_OPENAI_KEY").ok();
            let endpoint = env_or(&config.endpoint, "AZURE_OPENAI_ENDPOINT");
            let deployment = env_or(&config.model, "AZURE_OPENAI_DEPLOYMENT");
            match (key, endpoint, deployment) {
                (Some(key), Some(endpoint), Some(deployment)) => Ok(Arc::new(
                    OpenAiChatClient::azure(config, &endpoint, &deployment, &key)?,
                )),
                _ => Ok(Arc::new(UnconfiguredModel::new(
                    "Azure OpenAI is not configured: set AZURE_OPENAI_KEY, \
                     AZURE_OPENAI_ENDPOINT and AZURE_OPENAI_DEPLOYMENT",
                ))),
            }
        }
        "openai" => {
            let model = config
                .model
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("llm.model required for provider openai"))?;
            match std::env::var("OPENAI_API_KEY") {
                Ok(key) => Ok(Arc::new(OpenAiChatClient::openai(config, model, &key)?)),
                Err(_) => Ok(Arc::new(UnconfiguredModel::new("OPENAI_API_KEY not set"))),
            }
        }
        other => anyhow::bail!("Unknown llm provider: {}", other),
    }
}
