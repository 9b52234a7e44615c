//! Relation records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::{empty_object, EntityId};
use super::Record;

/// Store-assigned relation identifier.
pub type RelationId = i64;

/// A (subject, predicate, object) triple between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub id: RelationId,
    pub subject_id: EntityId,
    pub predicate: String,
    pub object_id: EntityId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_id: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Relation {
    /// Whether either endpoint is the given entity.
    pub fn touches(&self, entity_id: EntityId) -> bool {
        self.subject_id == entity_id || self.object_id == entity_id
    }

    /// The endpoint opposite `entity_id`, if the relation touches it.
    pub fn other_endpoint(&self, entity_id: EntityId) -> Option<EntityId> {
        if self.subject_id == entity_id {
            Some(self.object_id)
        } else if self.object_id == entity_id {
            Some(self.subject_id)
        } else {
            None
        }
    }

    /// The relation's triple after replacing `from` with `to` at either end.
    pub fn rewritten(&self, from: EntityId, to: EntityId) -> (EntityId, &str, EntityId) {
        let subject = if self.subject_id == from { to } else { self.subject_id };
        let object = if self.object_id == from { to } else { self.object_id };
        (subject, self.predicate.as_str(), object)
    }
}

impl Record for Relation {
    type Id = RelationId;
    type Draft = NewRelation;

    fn id(&self) -> RelationId {
        self.id
    }
}

/// Fields for creating a relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRelation {
    pub subject_id: EntityId,
    pub predicate: String,
    pub object_id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_id: Option<String>,
    #[serde(default = "empty_object")]
    pub metadata: serde_json::Value,
}

impl NewRelation {
    /// Create a new relation draft.
    pub fn new(subject_id: EntityId, predicate: impl Into<String>, object_id: EntityId) -> Self {
        Self {
            subject_id,
            predicate: predicate.into(),
            object_id,
            vector_id: None,
            metadata: empty_object(),
        }
    }

    /// Set metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Result of inserting a relation.
#[derive(Debug, Clone, PartialEq)]
pub enum RelationWrite {
    /// A new relation row was written.
    Created(Relation),
    /// The triple already existed; nothing was written.
    Duplicate {
        /// Id of the relation already holding the triple, when known.
        existing_id: Option<RelationId>,
    },
}

impl RelationWrite {
    /// Whether a row was written.
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// What `rewrite_references` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteReport {
    /// Relations whose endpoint was repointed.
    pub rewritten: usize,
    /// Relations dropped because the rewrite duplicated an existing triple.
    pub dropped_duplicates: usize,
}

impl RewriteReport {
    /// Whether anything changed.
    pub fn is_empty(&self) -> bool {
        self.rewritten == 0 && self.dropped_duplicates == 0
    }

    /// Sum two reports.
    pub fn combine(self, other: RewriteReport) -> RewriteReport {
        RewriteReport {
            rewritten: self.rewritten + other.rewritten,
            dropped_duplicates: self.dropped_duplicates + other.dropped_duplicates,
        }
    }
}

/// An extracted relation whose endpoints are still entity names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationCandidate {
    #[serde(alias = "source")]
    pub subject: String,
    #[serde(alias = "relationship_type", alias = "relation")]
    pub predicate: String,
    #[serde(alias = "target")]
    pub object: String,
    #[serde(default = "empty_object")]
    pub metadata: serde_json::Value,
}

impl RelationCandidate {
    /// Create a new relation candidate.
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            metadata: empty_object(),
        }
    }
}
