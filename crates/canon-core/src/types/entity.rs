//! Entity records and resolution inputs/outputs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Record;

/// Store-assigned entity identifier.
pub type EntityId = i64;

/// An entity in the canonical graph.
///
/// `canonical_id` is `None` for a canonical entity and points at the
/// canonical entity for an alias. Aliases never point at other aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Store-assigned id.
    pub id: EntityId,
    /// Display name as first extracted.
    pub name: String,
    /// Entity type/label (e.g. "person", "organization").
    pub entity_type: String,
    /// Free-text description used for embedding and disambiguation.
    pub description: String,
    /// Redirect to the canonical entity, if this entity is an alias.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_id: Option<EntityId>,
    /// Id of this entity's vector in the vector index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_id: Option<String>,
    /// Arbitrary metadata.
    pub metadata: serde_json::Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    /// Whether this entity is canonical (not redirected).
    pub fn is_canonical(&self) -> bool {
        self.canonical_id.is_none()
    }

    /// The id a reference to this entity should use: its canonical
    /// target for an alias, itself otherwise.
    pub fn canonical_target(&self) -> EntityId {
        self.canonical_id.unwrap_or(self.id)
    }
}

impl Record for Entity {
    type Id = EntityId;
    type Draft = NewEntity;

    fn id(&self) -> EntityId {
        self.id
    }
}

/// Fields for creating an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntity {
    pub name: String,
    pub entity_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_id: Option<String>,
    #[serde(default = "empty_object")]
    pub metadata: serde_json::Value,
}

impl NewEntity {
    /// Create a new entity draft.
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            description: String::new(),
            vector_id: None,
            metadata: empty_object(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the vector id.
    pub fn with_vector_id(mut self, vector_id: impl Into<String>) -> Self {
        self.vector_id = Some(vector_id.into());
        self
    }

    /// Set metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

impl From<&EntityCandidate> for NewEntity {
    fn from(candidate: &EntityCandidate) -> Self {
        let mut metadata = match &candidate.metadata {
            serde_json::Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        if let Some(source) = &candidate.source_text {
            metadata
                .entry("source_text")
                .or_insert_with(|| serde_json::Value::String(source.clone()));
        }
        Self {
            name: candidate.name.trim().to_string(),
            entity_type: candidate.entity_type.trim().to_string(),
            description: candidate.description.trim().to_string(),
            vector_id: None,
            metadata: serde_json::Value::Object(metadata),
        }
    }
}

/// An entity mention produced by extraction, before resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityCandidate {
    pub name: String,
    #[serde(alias = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub description: String,
    /// Text the mention was extracted from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_text: Option<String>,
    #[serde(default = "empty_object")]
    pub metadata: serde_json::Value,
}

impl EntityCandidate {
    /// Create a new candidate.
    pub fn new(
        name: impl Into<String>,
        entity_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            description: description.into(),
            source_text: None,
            metadata: empty_object(),
        }
    }

    /// Attach the source text.
    pub fn with_source_text(mut self, text: impl Into<String>) -> Self {
        self.source_text = Some(text.into());
        self
    }

    /// Text handed to the embedder: the description, or the name when the
    /// description is empty.
    pub fn embedding_text(&self) -> &str {
        let description = self.description.trim();
        if description.is_empty() {
            self.name.trim()
        } else {
            description
        }
    }
}

/// How a resolution call ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionOutcome {
    /// No sufficiently similar entity existed; a new one was created.
    Created {
        /// Why resolution skipped the similarity path, if it did.
        #[serde(skip_serializing_if = "Option::is_none")]
        degraded: Option<String>,
    },
    /// An existing canonical entity was reused.
    Matched {
        /// Oracle confidence for the match.
        confidence: f32,
        /// The oracle's best match when it was an alias of the returned entity.
        #[serde(skip_serializing_if = "Option::is_none")]
        via_alias: Option<EntityId>,
    },
}

/// Result of resolving one entity candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedEntity {
    /// The canonical entity the mention resolved to.
    pub entity: Entity,
    pub outcome: ResolutionOutcome,
}

impl ResolvedEntity {
    /// The canonical entity id.
    pub fn id(&self) -> EntityId {
        self.entity.id
    }

    /// Whether a new entity was created.
    pub fn was_created(&self) -> bool {
        matches!(self.outcome, ResolutionOutcome::Created { .. })
    }

    /// Whether resolution fell back to create-new because a collaborator failed.
    pub fn was_degraded(&self) -> bool {
        matches!(
            self.outcome,
            ResolutionOutcome::Created {
                degraded: Some(_)
            }
        )
    }
}

/// Listing filter for entities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityFilter {
    /// Only entities of this type.
    pub entity_type: Option<String>,
    /// Only canonical (`Some(true)`) or only alias (`Some(false)`) entities.
    pub canonical: Option<bool>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl EntityFilter {
    /// All canonical entities.
    pub fn canonical() -> Self {
        Self {
            canonical: Some(true),
            ..Default::default()
        }
    }

    /// All alias entities.
    pub fn aliases() -> Self {
        Self {
            canonical: Some(false),
            ..Default::default()
        }
    }

    /// Restrict to one entity type.
    pub fn of_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// Check whether an entity passes the filter (ignores paging).
    pub fn matches(&self, entity: &Entity) -> bool {
        let type_match = self
            .entity_type
            .as_deref()
            .map_or(true, |t| entity.entity_type == t);
        let canonical_match = self
            .canonical
            .map_or(true, |c| entity.is_canonical() == c);
        type_match && canonical_match
    }
}

pub(crate) fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}
