use async_trait::async_trait;

use crate::config::ModelConfig;
use crate::errors::{PilotError, PilotResult};
use crate::model::types::{ChatMessage, ModelResponse};

/// The model collaborator as the step loop sees it. Production uses
/// [`ModelClient`]; tests substitute scripted implementations.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn request(&self, messages: &[ChatMessage]) -> PilotResult<ModelResponse>;
}

pub struct ModelClient {
    config: ModelConfig,
    api_key: String,
    client: reqwest::Client,
}

impl ModelClient {
    pub fn new(config: ModelConfig) -> Self {
        let api_key = config.resolve_api_key();
        Self {
            config,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    async fn try_request(&self, messages: &[ChatMessage]) -> PilotResult<String> {
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "stream": false,
        });

        tracing::debug!(
            model = %self.config.model,
            messages = messages.len(),
            "sending model request"
        );

        let response = self
            .client
            .post(&self.config.base_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(PilotError::Model(format!("{status}: {err_body}")));
        }

        let value: serde_json::Value = response.json().await?;
        let content = value["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| PilotError::Model("response carried no message content".into()))?;
        Ok(content.to_string())
    }
}

#[async_trait]
impl ModelProvider for ModelClient {
    async fn request(&self, messages: &[ChatMessage]) -> PilotResult<ModelResponse> {
        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            match self.try_request(messages).await {
                Ok(content) => return Ok(split_response(&content)),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "model request failed");
                    last_error = Some(e);
                    if attempt < self.config.max_retries {
                        tokio::time::sleep(std::time::Duration::from_secs(
                            self.config.retry_delay_secs,
                        ))
                        .await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| PilotError::Model("model request failed".into())))
    }
}

/// Splits a completion into reasoning and directive. The directive is
/// everything from the last line that opens a `do(`/`finish(` call; with no
/// such line the whole completion is handed to the parser so a parse error
/// still carries the full raw text.
pub fn split_response(content: &str) -> ModelResponse {
    let mut directive_start = None;
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if trimmed.starts_with("do(") || trimmed.starts_with("finish(") {
            directive_start = Some(offset + (line.len() - trimmed.len()));
        }
        offset += line.len();
    }

    match directive_start {
        Some(start) => ModelResponse {
            thinking: content[..start].trim().to_string(),
            action_text: content[start..].trim().to_string(),
        },
        None => ModelResponse {
            thinking: String::new(),
            action_text: content.trim().to_string(),
        },
    }
}
