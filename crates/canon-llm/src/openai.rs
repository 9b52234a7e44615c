//! OpenAI chat-completions client.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use canon_core::config::OracleConfig;
use canon_core::error::{CanonError, CanonResult};

use crate::chat::{ChatModel, ChatRequest, ChatResponse, TokenUsage};
use crate::http::{build_client, send_with_retry, RetryPolicy};

const OPENAI_API_URL: &str = "https://api.openai.com/v1";
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4.1-nano-2025-04-14";

/// OpenAI chat model.
pub struct OpenAIChat {
    client: Client,
    api_key: SecretString,
    model: String,
    base_url: String,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    error: OpenAIErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorDetail {
    message: String,
}

impl OpenAIChat {
    /// Create a new OpenAI chat model.
    pub fn new(config: &OracleConfig) -> CanonResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                CanonError::Configuration(
                    "OpenAI API key not found. Set OPENAI_API_KEY or oracle.api_key.".to_string(),
                )
            })?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| OPENAI_API_URL.to_string());
        url::Url::parse(&base_url)
            .map_err(|e| CanonError::Configuration(format!("Invalid OpenAI URL: {}", e)))?;

        let model = if config.model.is_empty() {
            OPENAI_DEFAULT_MODEL.to_string()
        } else {
            config.model.clone()
        };

        Ok(Self {
            client: build_client()?,
            api_key: SecretString::new(api_key),
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Reasoning models reject sampling parameters and `max_tokens`.
    fn is_reasoning_model(&self) -> bool {
        let model = self.model.to_lowercase();
        ["o1", "o3", "o4", "gpt-5"].iter().any(|m| model.starts_with(m))
    }

    fn request_body<'a>(&'a self, request: &'a ChatRequest) -> OpenAIRequest<'a> {
        let reasoning = self.is_reasoning_model();
        OpenAIRequest {
            model: &self.model,
            messages: vec![
                OpenAIMessage {
                    role: "system",
                    content: &request.system,
                },
                OpenAIMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: (!reasoning).then_some(request.temperature),
            max_tokens: (!reasoning).then_some(request.max_tokens),
            max_completion_tokens: reasoning.then_some(request.max_tokens),
            response_format: request
                .json
                .then(|| serde_json::json!({ "type": "json_object" })),
        }
    }
}

fn openai_error(body: &str) -> Option<String> {
    serde_json::from_str::<OpenAIError>(body)
        .ok()
        .map(|e| e.error.message)
}

#[async_trait]
impl ChatModel for OpenAIChat {
    async fn complete(&self, request: &ChatRequest) -> CanonResult<ChatResponse> {
        let body = serde_json::to_string(&self.request_body(request))?;
        let url = format!("{}/chat/completions", self.base_url);

        let raw = send_with_retry(
            "OpenAI",
            self.retry,
            || {
                self.client
                    .post(&url)
                    .bearer_auth(self.api_key.expose_secret())
                    .header("content-type", "application/json")
                    .body(body.clone())
            },
            openai_error,
        )
        .await?;

        let response: OpenAIResponse = serde_json::from_str(&raw)
            .map_err(|e| CanonError::oracle(format!("Failed to parse OpenAI response: {}", e)))?;
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CanonError::oracle("No response choices returned"))?;

        Ok(ChatResponse {
            content,
            usage: response.usage,
        })
    }

    fn provider(&self) -> &'static str {
        "openai"
    }
}
