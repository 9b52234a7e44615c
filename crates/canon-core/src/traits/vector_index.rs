//! Vector index trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CanonResult;
use crate::types::EntityId;

/// A vector stored for an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEntry {
    pub vector_id: String,
    pub entity_id: EntityId,
    pub entity_type: String,
    pub vector: Vec<f32>,
}

/// A ranked search hit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub entity_id: EntityId,
    /// Cosine similarity in `[-1, 1]`, higher is closer.
    pub score: f32,
}

/// Similarity search over entity vectors, partitioned by entity type.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace a vector.
    async fn upsert(&self, entry: VectorEntry) -> CanonResult<()>;

    /// Return up to `top_k` entities of `entity_type`, best first.
    async fn search(
        &self,
        vector: &[f32],
        entity_type: &str,
        top_k: usize,
    ) -> CanonResult<Vec<VectorMatch>>;

    /// Remove a vector. Returns whether it existed.
    async fn remove(&self, vector_id: &str) -> CanonResult<bool>;

    /// Number of stored vectors.
    async fn count(&self) -> CanonResult<usize>;
}
