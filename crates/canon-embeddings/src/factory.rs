//! Factory for creating embedding providers.

use std::sync::Arc;

use canon_core::error::CanonResult;
use canon_core::traits::{Embedder, EmbedderConfig, EmbedderProvider};

use crate::hashing::HashingEmbedder;
use crate::ollama::OllamaEmbedder;
use crate::openai::OpenAIEmbedder;

/// Factory for creating embedding providers.
pub struct EmbedderFactory;

impl EmbedderFactory {
    /// Create the embedder a configuration selects.
    pub fn create(config: &EmbedderConfig) -> CanonResult<Arc<dyn Embedder>> {
        let embedder: Arc<dyn Embedder> = match config.provider {
            EmbedderProvider::OpenAI => Arc::new(OpenAIEmbedder::new(config.clone())?),
            EmbedderProvider::Ollama => Arc::new(OllamaEmbedder::new(config.clone())?),
            EmbedderProvider::Hashing => Arc::new(HashingEmbedder::from_config(config)?),
        };
        tracing::debug!(
            provider = ?config.provider,
            model = embedder.model_name(),
            dims = embedder.dimension(),
            "Embedder ready"
        );
        Ok(embedder)
    }

    /// Create an OpenAI embedder with default configuration.
    pub fn openai() -> CanonResult<Arc<dyn Embedder>> {
        Self::create(&EmbedderConfig::default())
    }

    /// Create an OpenAI embedder with a specific model.
    pub fn openai_with_model(model: impl Into<String>, dims: usize) -> CanonResult<Arc<dyn Embedder>> {
        Self::create(&EmbedderConfig {
            model: model.into(),
            embedding_dims: dims,
            ..Default::default()
        })
    }

    /// Create an Ollama embedder with a specific model.
    pub fn ollama_with_model(model: impl Into<String>, dims: usize) -> CanonResult<Arc<dyn Embedder>> {
        Self::create(&EmbedderConfig {
            provider: EmbedderProvider::Ollama,
            model: model.into(),
            embedding_dims: dims,
            ..Default::default()
        })
    }

    /// Create a local hashing embedder.
    pub fn hashing(dims: usize) -> CanonResult<Arc<dyn Embedder>> {
        Ok(Arc::new(HashingEmbedder::new(dims)?))
    }
}
