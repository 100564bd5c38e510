//! Generative backend client and its failure taxonomy.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{ChatCompletionRequestMessage, CreateChatCompletionRequestArgs},
    Client,
};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("backend rate limit exceeded")]
    RateLimited,
    #[error("backend authentication failed")]
    Auth,
    #[error("backend connection failed: {0}")]
    Connectivity(String),
    #[error("backend request timed out")]
    Timeout,
    #[error("backend error: {0}")]
    Other(String),
}

/// Fixed user-facing message for each failure kind. The conversation always
/// gets an answer, even a degraded one.
pub fn degraded_reply(err: &BackendError) -> &'static str {
    match err {
        BackendError::RateLimited => {
            "I'm experiencing high demand right now. Please try again in a moment."
        }
        BackendError::Auth => "I'm having authentication issues. Please contact support.",
        BackendError::Connectivity(_) => {
            "I'm having network connectivity issues. Please try again in a moment."
        }
        BackendError::Timeout => "My response is taking too long to generate. Please try again.",
        BackendError::Other(_) => {
            "I'm having trouble connecting to my AI systems. Please try again shortly."
        }
    }
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
    ) -> Result<String, BackendError>;
    /// Lightweight connectivity probe for status reporting.
    async fn ping(&self) -> bool;
}

pub struct LlmClient {
    client: Client<OpenAIConfig>,
    model: String,
    max_tokens: u32,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new().with_api_key(&config.openai_api_key);
        Self {
            client: Client::with_config(openai_config),
            model: config.openai_model.clone(),
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.backend_timeout_secs),
        }
    }
}

#[async_trait]
impl ChatBackend for LlmClient {
    async fn complete(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
    ) -> Result<String, BackendError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .max_tokens(self.max_tokens)
            .temperature(0.7)
            .build()
            .map_err(|e| BackendError::Other(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| BackendError::Timeout)?
            .map_err(classify)?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| BackendError::Other("empty completion".to_string()))?;

        debug!(chars = content.len(), "backend completion received");
        Ok(content)
    }

    async fn ping(&self) -> bool {
        tokio::time::timeout(Duration::from_secs(10), self.client.models().list())
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false)
    }
}

fn classify(err: OpenAIError) -> BackendError {
    match err {
        OpenAIError::Reqwest(e) => {
            let detail = e.to_string();
            if detail.contains("timed out") {
                BackendError::Timeout
            } else {
                BackendError::Connectivity(detail)
            }
        }
        OpenAIError::ApiError(api) => {
            let kind = api.r#type.as_deref().unwrap_or("");
            let code = api.code.as_deref().unwrap_or("");
            if kind.contains("rate_limit") || code.contains("rate_limit") {
                BackendError::RateLimited
            } else if kind.contains("authentication") || code.contains("invalid_api_key") {
                BackendError::Auth
            } else {
                BackendError::Other(api.message)
            }
        }
        other => BackendError::Other(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_openai::error::ApiError;

    fn api_error(kind: Option<&str>, code: Option<&str>) -> OpenAIError {
        OpenAIError::ApiError(ApiError {
            message: "boom".to_string(),
            r#type: kind.map(String::from),
            param: None,
            code: code.map(String::from),
        })
    }

    #[test]
    fn test_classify_api_errors() {
        assert!(matches!(
            classify(api_error(Some("rate_limit_exceeded"), None)),
            BackendError::RateLimited
        ));
        assert!(matches!(
            classify(api_error(Some("authentication_error"), None)),
            BackendError::Auth
        ));
        assert!(matches!(
            classify(api_error(Some("invalid_request_error"), Some("invalid_api_key"))),
            BackendError::Auth
        ));
        assert!(matches!(
            classify(api_error(Some("server_error"), None)),
            BackendError::Other(_)
        ));
    }

    #[test]
    fn test_degraded_replies_are_distinct() {
        let kinds = [
            BackendError::RateLimited,
            BackendError::Auth,
            BackendError::Connectivity("x".into()),
            BackendError::Timeout,
            BackendError::Other("x".into()),
        ];
        let replies: Vec<&str> = kinds.iter().map(degraded_reply).collect();
        for reply in &replies {
            assert!(!reply.is_empty());
        }
        let mut unique = replies.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), replies.len());
    }
}
