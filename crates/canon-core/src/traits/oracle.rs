//! Disambiguation oracle trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CanonResult;
use crate::types::{Entity, EntityCandidate, EntityId};

/// An existing entity offered to the oracle as a possible duplicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleCandidate {
    pub entity_id: EntityId,
    pub name: String,
    pub entity_type: String,
    pub description: String,
    /// Vector similarity to the target.
    pub score: f32,
}

impl OracleCandidate {
    /// Build a candidate from a stored entity and its similarity score.
    pub fn from_entity(entity: &Entity, score: f32) -> Self {
        Self {
            entity_id: entity.id,
            name: entity.name.clone(),
            entity_type: entity.entity_type.clone(),
            description: entity.description.clone(),
            score,
        }
    }
}

/// The oracle's verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disambiguation {
    pub is_duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_match_id: Option<EntityId>,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl Disambiguation {
    /// A "not a duplicate" verdict.
    pub fn distinct(confidence: f32) -> Self {
        Self {
            is_duplicate: false,
            best_match_id: None,
            confidence,
            reasoning: None,
        }
    }

    /// A "duplicate of `id`" verdict.
    pub fn duplicate_of(id: EntityId, confidence: f32) -> Self {
        Self {
            is_duplicate: true,
            best_match_id: Some(id),
            confidence,
            reasoning: None,
        }
    }

    /// Attach the oracle's explanation.
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }
}

/// Decides whether a target mention duplicates one of the candidates.
#[async_trait]
pub trait DisambiguationOracle: Send + Sync {
    /// Judge `target` against `candidates` (never empty).
    async fn disambiguate(
        &self,
        target: &EntityCandidate,
        candidates: &[OracleCandidate],
    ) -> CanonResult<Disambiguation>;

    /// Name used in logs.
    fn name(&self) -> &str;
}
