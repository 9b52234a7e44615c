//! canon-llm - chat-model oracles for canon.
//!
//! Entity resolution asks a [`DisambiguationOracle`] whether a new mention
//! duplicates one of its nearest stored entities. This crate provides the
//! LLM-backed oracle and the provider clients it talks to.
//!
//! # Supported Providers
//!
//! - **OpenAI** (feature: `openai`) - chat completions API
//! - **Anthropic** (feature: `anthropic`) - messages API
//!
//! # Example
//!
//! ```ignore
//! use canon_llm::OracleFactory;
//!
//! let oracle = OracleFactory::create(&config.oracle)?;
//! ```

#[cfg(feature = "anthropic")]
mod anthropic;
mod chat;
mod factory;
mod http;
#[cfg(feature = "openai")]
mod openai;
mod oracle;

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicChat, ANTHROPIC_DEFAULT_MODEL};
pub use chat::{ChatModel, ChatRequest, ChatResponse, TokenUsage};
pub use factory::OracleFactory;
pub use http::RetryPolicy;
#[cfg(feature = "openai")]
pub use openai::{OpenAIChat, OPENAI_DEFAULT_MODEL};
pub use oracle::LlmOracle;

// Re-export core types for convenience
pub use canon_core::config::{OracleConfig, OracleProvider};
pub use canon_core::traits::{Disambiguation, DisambiguationOracle, OracleCandidate};
