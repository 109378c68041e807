// Description and embedding providers

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::ProviderConfig;

/// Failure of a provider call
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("bad request ({status}): {message}")]
    BadRequest { status: u16, message: String },

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Rate limits, server errors and transport failures may succeed later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_) | ProviderError::Server { .. } | ProviderError::Transport(_)
        )
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            429 => ProviderError::RateLimited(message),
            500..=599 => ProviderError::Server { status, message },
            400..=499 => ProviderError::BadRequest { status, message },
            _ => ProviderError::Other(format!("unexpected status {}: {}", status, message)),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ProviderError::Other(format!("invalid response body: {}", e))
        } else if let Some(status) = e.status() {
            ProviderError::from_status(status.as_u16(), e.to_string())
        } else {
            ProviderError::Transport(e.to_string())
        }
    }
}

#[async_trait]
pub trait DescriptionProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Natural-language description for a prompt; `None` when the provider
    /// answered without text
    async fn generate_description(&self, prompt: &str, max_tokens: u32) -> Result<Option<String>, ProviderError>;
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

const SYSTEM_PROMPT: &str = "You write one or two sentence summaries of source code for a code search index. \
Describe what the code does and its role. Do not repeat the code.";

/// Provider for any endpoint speaking the OpenAI chat and embeddings API
/// (OpenAI, LM Studio, Ollama, vLLM)
pub struct OpenAiCompatibleProvider {
    name: String,
    base_url: String,
    model: String,
    embedding_model: Option<String>,
    api_key: Option<String>,
    client: Client,
}

impl OpenAiCompatibleProvider {
    pub fn from_config(config: &ProviderConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty());

        Ok(Self {
            name: config.name.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone(),
            api_key,
            client,
        })
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(&self, endpoint: &str, body: &B) -> Result<R, ProviderError> {
        let mut request = self
            .client
            .post(format!("{}/{}", self.base_url, endpoint))
            .json(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::from_status(status.as_u16(), message));
        }

        Ok(response.json::<R>().await?)
    }
}

#[async_trait]
impl DescriptionProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate_description(&self, prompt: &str, max_tokens: u32) -> Result<Option<String>, ProviderError> {
        let request = ChatCompletionsRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            max_tokens,
            temperature: 0.2,
        };

        let response: ChatCompletionsResponse = self.post("chat/completions", &request).await?;
        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty());

        debug!("{}: description {}", self.name, if text.is_some() { "received" } else { "empty" });
        Ok(text)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiCompatibleProvider {
    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let request = EmbeddingsRequest {
            model: self.embedding_model.as_deref().unwrap_or(&self.model),
            input: text,
        };

        let response: EmbeddingsResponse = self.post("embeddings", &request).await?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ProviderError::Other("no embedding in response".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            ProviderError::from_status(429, String::new()),
            ProviderError::RateLimited(_)
        ));
        assert!(matches!(
            ProviderError::from_status(503, String::new()),
            ProviderError::Server { status: 503, .. }
        ));
        assert!(matches!(
            ProviderError::from_status(400, String::new()),
            ProviderError::BadRequest { status: 400, .. }
        ));
    }

    #[test]
    fn test_retryable() {
        assert!(ProviderError::RateLimited("slow down".into()).is_retryable());
        assert!(ProviderError::Transport("connection reset".into()).is_retryable());
        assert!(!ProviderError::BadRequest {
            status: 422,
            message: "bad".into()
        }
        .is_retryable());
        assert!(!ProviderError::Other("no choices".into()).is_retryable());
    }

    #[test]
    fn test_from_config() {
        let provider = OpenAiCompatibleProvider::from_config(&ProviderConfig {
            name: "local".to_string(),
            base_url: "http://localhost:1234/v1/".to_string(),
            model: "qwen".to_string(),
            embedding_model: None,
            api_key_env: Some("CODEGRAPH_TEST_KEY_THAT_IS_NOT_SET".to_string()),
            concurrency: 2,
            timeout_secs: 5,
        })
        .unwrap();

        assert_eq!(provider.name(), "local");
        assert_eq!(provider.base_url, "http://localhost:1234/v1");
        assert!(provider.api_key.is_none());
    }

    #[test]
    fn test_chat_response_shape() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"  Parses input.  "}}]}"#;
        let response: ChatCompletionsResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            response.choices[0].message.content.as_deref().map(str::trim),
            Some("Parses input.")
        );
    }
}
