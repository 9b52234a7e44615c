//! Extraction batches and their ingestion reports.

use serde::{Deserialize, Serialize};

use super::entity::{EntityCandidate, EntityId, ResolutionOutcome};
use super::relation::{RelationCandidate, RelationId};

/// One unit of extraction output handed to the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionBatch {
    /// Document the mentions came from; resolved entities are associated with it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default)]
    pub entities: Vec<EntityCandidate>,
    #[serde(default)]
    pub relations: Vec<RelationCandidate>,
}

impl ExtractionBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a batch from extractor output pairs.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (EntityCandidate, Option<RelationCandidate>)>,
    {
        let mut batch = Self::default();
        for (entity, relation) in pairs {
            batch.entities.push(entity);
            if let Some(relation) = relation {
                batch.relations.push(relation);
            }
        }
        batch
    }

    /// Attach the source document.
    pub fn with_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    /// Add an entity candidate.
    pub fn entity(mut self, candidate: EntityCandidate) -> Self {
        self.entities.push(candidate);
        self
    }

    /// Add a relation candidate.
    pub fn relation(mut self, candidate: RelationCandidate) -> Self {
        self.relations.push(candidate);
        self
    }

    /// Whether the batch carries nothing.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }
}

/// A mention name and the canonical entity it resolved to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedMention {
    /// Normalized mention name.
    pub name: String,
    pub entity_id: EntityId,
    pub outcome: ResolutionOutcome,
}

/// Why a relation candidate was not written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// An endpoint name was never resolved in this batch.
    UnresolvedEndpoint { name: String },
    /// The predicate was empty.
    EmptyPredicate,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnresolvedEndpoint { name } => write!(f, "unresolved endpoint '{}'", name),
            Self::EmptyPredicate => write!(f, "empty predicate"),
        }
    }
}

/// A relation candidate the pipeline skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRelation {
    pub candidate: RelationCandidate,
    pub reason: SkipReason,
}

/// Which batch item failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchItem {
    Entity { name: String },
    Relation { subject: String, predicate: String, object: String },
    Document { entity_id: EntityId, document_id: String },
}

/// A per-item failure that did not abort the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub item: BatchItem,
    /// Stable error code (see `ErrorCode::as_str`).
    pub code: String,
    pub message: String,
}

/// Outcome of ingesting one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// One entry per distinct normalized mention name.
    pub resolved: Vec<ResolvedMention>,
    pub relations_created: Vec<RelationId>,
    /// Relations whose triple already existed.
    pub relations_duplicate: usize,
    pub skipped: Vec<SkippedRelation>,
    pub failures: Vec<ItemFailure>,
    /// New entity ↔ document links written.
    pub documents_linked: usize,
}

impl BatchReport {
    /// Entities newly created by this batch.
    pub fn entities_created(&self) -> usize {
        self.resolved
            .iter()
            .filter(|m| matches!(m.outcome, ResolutionOutcome::Created { .. }))
            .count()
    }

    /// Whether every item succeeded.
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty() && self.failures.is_empty()
    }

    /// Whether some items succeeded and some were skipped or failed.
    pub fn is_partial(&self) -> bool {
        let any_success = !self.resolved.is_empty()
            || !self.relations_created.is_empty()
            || self.relations_duplicate > 0;
        any_success && !self.is_complete()
    }

    /// Look up the entity a mention resolved to.
    pub fn entity_for(&self, name: &str) -> Option<EntityId> {
        let key = super::normalize_name(name);
        self.resolved
            .iter()
            .find(|m| m.name == key)
            .map(|m| m.entity_id)
    }
}
