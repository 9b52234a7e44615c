//! Factory for creating disambiguation oracles.

use std::sync::Arc;

use tracing::debug;

use canon_core::config::{OracleConfig, OracleProvider};
use canon_core::error::{CanonError, CanonResult};
use canon_core::traits::DisambiguationOracle;
use canon_core::HeuristicOracle;

#[cfg(feature = "anthropic")]
use crate::anthropic::AnthropicChat;
use crate::chat::ChatModel;
#[cfg(feature = "openai")]
use crate::openai::OpenAIChat;
use crate::oracle::LlmOracle;

/// Factory for creating disambiguation oracles.
pub struct OracleFactory;

impl OracleFactory {
    /// Create an oracle from the given configuration.
    pub fn create(config: &OracleConfig) -> CanonResult<Arc<dyn DisambiguationOracle>> {
        debug!(provider = ?config.provider, model = %config.model, "Creating oracle");
        match config.provider {
            OracleProvider::Heuristic => Ok(Arc::new(HeuristicOracle::default())),
            _ => {
                let model = Self::chat_model(config)?;
                Ok(Arc::new(LlmOracle::new(model, config)))
            }
        }
    }

    /// Create the chat model behind an LLM oracle.
    pub fn chat_model(config: &OracleConfig) -> CanonResult<Arc<dyn ChatModel>> {
        match config.provider {
            #[cfg(feature = "openai")]
            OracleProvider::OpenAI => Ok(Arc::new(OpenAIChat::new(config)?)),
            #[cfg(feature = "anthropic")]
            OracleProvider::Anthropic => Ok(Arc::new(AnthropicChat::new(config)?)),
            other => Err(CanonError::Configuration(format!(
                "oracle provider {:?} has no chat model in this build",
                other
            ))),
        }
    }

    /// Create the offline heuristic oracle.
    pub fn heuristic() -> Arc<dyn DisambiguationOracle> {
        Arc::new(HeuristicOracle::default())
    }
}
