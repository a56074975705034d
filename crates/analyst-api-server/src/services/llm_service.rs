use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::LlmConfig;
use crate::models::chat::ChatMessage;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("failed to reach model provider: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("model provider returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("malformed model response: {0}")]
    Malformed(String),

    #[error("model provider circuit open, retry in {}s", .retry_in.as_secs().max(1))]
    CircuitOpen { retry_in: Duration },
}

impl LlmError {
    /// Client errors other than 408/429 will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Transport(_) | LlmError::Malformed(_) => true,
            LlmError::Status { status, .. } => {
                !status.is_client_error()
                    || *status == StatusCode::TOO_MANY_REQUESTS
                    || *status == StatusCode::REQUEST_TIMEOUT
            }
            LlmError::CircuitOpen { .. } => false,
        }
    }
}

/// Anything that turns a message list into generated text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

/// OpenAI-compatible `/v1/chat/completions` client.
#[derive(Clone)]
pub struct LlmService {
    client: Client,
    config: LlmConfig,
}

impl LlmService {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let mut builder = Client::builder();
        if config.timeout_seconds > 0 {
            builder = builder.timeout(Duration::from_secs(config.timeout_seconds));
        }

        Ok(Self {
            client: builder.build()?,
            config,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    /// Generate completion without streaming (wait for full response)
    pub async fn generate_chat(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages,
        };

        let total_chars: usize = messages.iter().map(|m| m.content.chars().count()).sum();
        debug!(
            "Calling {} with {} messages ({} chars)",
            self.config.model,
            messages.len(),
            total_chars
        );

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status, body });
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(format!("failed to parse response: {e}")))?;

        if let Some(usage) = &body.usage {
            info!(
                "Tokens: {} (prompt: {}, completion: {})",
                usage.total_tokens, usage.prompt_tokens, usage.completion_tokens
            );
        }

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::Malformed("no message content in choices".to_string()))
    }
}

#[async_trait]
impl LlmProvider for LlmService {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        self.generate_chat(messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let status = |code: u16| LlmError::Status {
            status: StatusCode::from_u16(code).unwrap(),
            body: String::new(),
        };

        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(status(408).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(!status(401).is_retryable());
        assert!(LlmError::Malformed("x".into()).is_retryable());
        assert!(!LlmError::CircuitOpen {
            retry_in: Duration::from_secs(1)
        }
        .is_retryable());
    }

    #[test]
    fn test_request_serializes_openai_shape() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hi")];
        let request = ChatCompletionRequest {
            model: "gpt-5-mini",
            messages: &messages,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "gpt-5-mini");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
    }

    #[test]
    fn test_completions_url_tolerates_trailing_slash() {
        let service = LlmService::new(LlmConfig {
            base_url: "http://localhost:9000/".to_string(),
            ..LlmConfig::default()
        })
        .unwrap();
        assert_eq!(service.completions_url(), "http://localhost:9000/v1/chat/completions");
    }
}
