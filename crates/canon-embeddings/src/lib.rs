//! canon-embeddings - Embedding provider implementations for canon.
//!
//! # Supported Providers
//!
//! - **OpenAI** (feature: `openai`) - text-embedding-3-small, text-embedding-3-large, etc.
//! - **Ollama** (feature: `ollama`) - Local embedding models via Ollama
//! - **Hashing** - Offline feature-hashing embedder, always available
//!
//! # Example
//!
//! ```ignore
//! use canon_embeddings::EmbedderFactory;
//!
//! let embedder = EmbedderFactory::create(&config.embedder)?;
//!
//! // Or pick one directly
//! let embedder = EmbedderFactory::openai_with_model("text-embedding-3-large", 3072)?;
//! let embedder = EmbedderFactory::hashing(256)?;
//! ```

mod factory;
mod hashing;
mod ollama;
mod openai;

pub use factory::EmbedderFactory;
pub use hashing::HashingEmbedder;
pub use ollama::OllamaEmbedder;
pub use openai::OpenAIEmbedder;

// Re-export core types for convenience
pub use canon_core::traits::{Embedder, EmbedderConfig, EmbedderProvider};
