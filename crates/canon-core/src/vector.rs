//! Vector similarity helpers and an in-memory [`VectorIndex`].

use std::collections::HashMap;

use async_trait::async_trait;
use ordered_float::OrderedFloat;
use tokio::sync::RwLock;

use crate::error::{CanonError, CanonResult};
use crate::traits::{VectorEntry, VectorIndex, VectorMatch};
use crate::types::EntityId;

/// Cosine similarity. Mismatched lengths and zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Score `entries` against `query` and keep the best `top_k` entities.
///
/// An entity with several vectors is ranked by its best one. Ties break on
/// the lower entity id so results are stable.
pub fn rank_top_k<'a, I>(query: &[f32], entries: I, top_k: usize) -> Vec<VectorMatch>
where
    I: IntoIterator<Item = (EntityId, &'a [f32])>,
{
    let mut best: HashMap<EntityId, f32> = HashMap::new();
    for (entity_id, vector) in entries {
        let score = cosine_similarity(query, vector);
        best.entry(entity_id)
            .and_modify(|s| *s = s.max(score))
            .or_insert(score);
    }

    let mut ranked: Vec<VectorMatch> = best
        .into_iter()
        .map(|(entity_id, score)| VectorMatch { entity_id, score })
        .collect();
    ranked.sort_by_key(|m| (std::cmp::Reverse(OrderedFloat(m.score)), m.entity_id));
    ranked.truncate(top_k);
    ranked
}

/// Process-local vector index. Used by tests and the offline CLI mode.
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    entries: RwLock<HashMap<String, VectorEntry>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, entry: VectorEntry) -> CanonResult<()> {
        if entry.vector.is_empty() {
            return Err(CanonError::vector_index("refusing to store an empty vector"));
        }
        self.entries
            .write()
            .await
            .insert(entry.vector_id.clone(), entry);
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        entity_type: &str,
        top_k: usize,
    ) -> CanonResult<Vec<VectorMatch>> {
        let entries = self.entries.read().await;
        Ok(rank_top_k(
            vector,
            entries
                .values()
                .filter(|e| e.entity_type == entity_type)
                .map(|e| (e.entity_id, e.vector.as_slice())),
            top_k,
        ))
    }

    async fn remove(&self, vector_id: &str) -> CanonResult<bool> {
        Ok(self.entries.write().await.remove(vector_id).is_some())
    }

    async fn count(&self) -> CanonResult<usize> {
        Ok(self.entries.read().await.len())
    }
}
