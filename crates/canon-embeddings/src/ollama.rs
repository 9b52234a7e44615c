//! Ollama embedding provider implementation.

use async_trait::async_trait;

use canon_core::error::{CanonError, CanonResult};
use canon_core::traits::{Embedder, EmbedderConfig};

#[cfg(feature = "ollama")]
use ollama_rs::{
    generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest},
    Ollama,
};

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Ollama embedding provider.
pub struct OllamaEmbedder {
    #[cfg(feature = "ollama")]
    client: Ollama,
    host: String,
    port: u16,
    config: EmbedderConfig,
}

impl OllamaEmbedder {
    /// Create a new Ollama embedder.
    pub fn new(config: EmbedderConfig) -> CanonResult<Self> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());

        let url = url::Url::parse(&base_url)
            .map_err(|e| CanonError::Configuration(format!("Invalid Ollama URL: {}", e)))?;

        let host = format!(
            "{}://{}",
            url.scheme(),
            url.host_str().unwrap_or("localhost")
        );
        let port = url.port().unwrap_or(11434);

        Ok(Self {
            #[cfg(feature = "ollama")]
            client: Ollama::new(host.clone(), port),
            host,
            port,
            config,
        })
    }

    /// Server address in use.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    #[cfg(feature = "ollama")]
    async fn embed(&self, text: &str) -> CanonResult<Vec<f32>> {
        let request = GenerateEmbeddingsRequest::new(
            self.config.model.clone(),
            EmbeddingsInput::Single(text.to_string()),
        );

        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|e| CanonError::embedding(format!("Ollama embedding error: {}", e)))?;

        response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| CanonError::embedding("No embedding returned"))
    }

    #[cfg(not(feature = "ollama"))]
    async fn embed(&self, _text: &str) -> CanonResult<Vec<f32>> {
        Err(CanonError::Configuration(
            "Ollama feature not enabled. Enable the 'ollama' feature.".to_string(),
        ))
    }

    fn dimension(&self) -> usize {
        self.config.embedding_dims
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_parsing() {
        let embedder = OllamaEmbedder::new(EmbedderConfig {
            base_url: Some("http://gpu-box:8080".to_string()),
            model: "nomic-embed-text".to_string(),
            embedding_dims: 768,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(embedder.endpoint(), "http://gpu-box:8080");

        let local = OllamaEmbedder::new(EmbedderConfig::default()).unwrap();
        assert_eq!(local.endpoint(), "http://localhost:11434");
    }

    #[test]
    fn test_invalid_url_is_configuration_error() {
        let result = OllamaEmbedder::new(EmbedderConfig {
            base_url: Some("not a url".to_string()),
            ..Default::default()
        });
        assert!(matches!(result, Err(CanonError::Configuration(_))));
    }
}
