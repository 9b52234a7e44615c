//! Anthropic messages-API client.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use canon_core::config::OracleConfig;
use canon_core::error::{CanonError, CanonResult};

use crate::chat::{ChatModel, ChatRequest, ChatResponse, TokenUsage};
use crate::http::{build_client, send_with_retry, RetryPolicy};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const ANTHROPIC_DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";

/// Anthropic chat model.
pub struct AnthropicChat {
    client: Client,
    api_key: SecretString,
    model: String,
    base_url: String,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    message: String,
}

impl AnthropicChat {
    /// Create a new Anthropic chat model.
    pub fn new(config: &OracleConfig) -> CanonResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .ok_or_else(|| {
                CanonError::Configuration(
                    "Anthropic API key not found. Set ANTHROPIC_API_KEY or oracle.api_key."
                        .to_string(),
                )
            })?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| ANTHROPIC_API_URL.to_string());
        url::Url::parse(&base_url)
            .map_err(|e| CanonError::Configuration(format!("Invalid Anthropic URL: {}", e)))?;

        // The shared default names an OpenAI model.
        let model = if config.model.is_empty() || config.model == OracleConfig::default().model {
            ANTHROPIC_DEFAULT_MODEL.to_string()
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

    fn request_body<'a>(&'a self, request: &'a ChatRequest) -> AnthropicRequest<'a> {
        AnthropicRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: &request.system,
            messages: vec![AnthropicMessage {
                role: "user",
                content: &request.prompt,
            }],
        }
    }
}

fn anthropic_error(body: &str) -> Option<String> {
    serde_json::from_str::<AnthropicError>(body)
        .ok()
        .map(|e| e.error.message)
}

#[async_trait]
impl ChatModel for AnthropicChat {
    async fn complete(&self, request: &ChatRequest) -> CanonResult<ChatResponse> {
        let body = serde_json::to_string(&self.request_body(request))?;
        let url = format!("{}/messages", self.base_url);

        let raw = send_with_retry(
            "Anthropic",
            self.retry,
            || {
                self.client
                    .post(&url)
                    .header("x-api-key", self.api_key.expose_secret())
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .header("content-type", "application/json")
                    .body(body.clone())
            },
            anthropic_error,
        )
        .await?;

        let response: AnthropicResponse = serde_json::from_str(&raw).map_err(|e| {
            CanonError::oracle(format!("Failed to parse Anthropic response: {}", e))
        })?;

        let content = response
            .content
            .into_iter()
            .find(|c| c.content_type == "text")
            .and_then(|c| c.text)
            .ok_or_else(|| CanonError::oracle("No text content returned"))?;

        let usage = response.usage.map(|u| TokenUsage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        });

        Ok(ChatResponse { content, usage })
    }

    fn provider(&self) -> &'static str {
        "anthropic"
    }
}
