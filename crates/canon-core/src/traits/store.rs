//! Store traits for the canonical graph.
//!
//! [`Repository`] carries the CRUD primitives shared by every record kind;
//! [`EntityStore`], [`RelationStore`] and [`DocumentStore`] add the
//! operations canonical-graph maintenance needs. Implementations must run
//! each write in its own transaction and must enforce the uniqueness of
//! relation triples themselves.

use async_trait::async_trait;

use crate::error::CanonResult;
use crate::types::{
    DocumentAssociation, Entity, EntityFilter, EntityId, NewRelation, Record, Relation,
    RelationWrite, RewriteReport,
};

/// Typed CRUD over one record kind.
#[async_trait]
pub trait Repository<T: Record>: Send + Sync {
    /// Fetch one record.
    async fn get(&self, id: T::Id) -> CanonResult<Option<T>>;

    /// Fetch several records. Missing ids are skipped; order is unspecified.
    async fn get_many(&self, ids: &[T::Id]) -> CanonResult<Vec<T>>;

    /// Create one record.
    async fn create(&self, draft: T::Draft) -> CanonResult<T>;

    /// Create several records in one transaction.
    async fn bulk_create(&self, drafts: Vec<T::Draft>) -> CanonResult<Vec<T>>;

    /// Persist changes to an existing record.
    async fn update(&self, record: &T) -> CanonResult<T>;

    /// Delete a record. Returns whether it existed.
    async fn delete(&self, id: T::Id) -> CanonResult<bool>;

    /// Number of stored records.
    async fn count(&self) -> CanonResult<u64>;

    /// Whether a record exists.
    async fn exists(&self, id: T::Id) -> CanonResult<bool> {
        Ok(self.get(id).await?.is_some())
    }
}

/// Outcome of redirecting an entity to a canonical root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectOutcome {
    /// Whether the entity's own `canonical_id` changed.
    pub changed: bool,
    /// Former aliases of the redirected entity, now pointing at the root.
    pub repointed: Vec<EntityId>,
}

/// Entity storage.
#[async_trait]
pub trait EntityStore: Repository<Entity> {
    /// Entities with exactly this name and type.
    async fn find_by_name(&self, name: &str, entity_type: &str) -> CanonResult<Vec<Entity>>;

    /// List entities, ordered by id.
    async fn list(&self, filter: &EntityFilter) -> CanonResult<Vec<Entity>>;

    /// Entities whose `canonical_id` is `canonical_id`.
    async fn aliases_of(&self, canonical_id: EntityId) -> CanonResult<Vec<Entity>>;

    /// In one transaction, set `alias_id.canonical_id = root_id` and repoint
    /// every entity that pointed at `alias_id` to `root_id`.
    ///
    /// `root_id` must be canonical; callers resolve it first.
    async fn redirect(&self, alias_id: EntityId, root_id: EntityId)
        -> CanonResult<RedirectOutcome>;
}

/// Relation storage.
#[async_trait]
pub trait RelationStore: Repository<Relation> {
    /// Insert a relation, absorbing a duplicate triple as
    /// [`RelationWrite::Duplicate`].
    async fn insert(&self, draft: NewRelation) -> CanonResult<RelationWrite>;

    /// Repoint every relation referencing `from` to `to`, dropping relations
    /// whose rewritten triple already exists.
    async fn rewrite_references(&self, from: EntityId, to: EntityId)
        -> CanonResult<RewriteReport>;

    /// Relations with either endpoint in `entity_ids`, optionally restricted
    /// to the given predicates. Ordered by id.
    async fn relations_touching(
        &self,
        entity_ids: &[EntityId],
        predicates: Option<&[String]>,
    ) -> CanonResult<Vec<Relation>>;

    /// Number of relations with either endpoint equal to `entity_id`.
    async fn count_touching(&self, entity_id: EntityId) -> CanonResult<u64>;
}

/// Entity ↔ document association storage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Link an entity to a document. Returns false if the link existed.
    async fn associate(&self, entity_id: EntityId, document_id: &str) -> CanonResult<bool>;

    /// Distinct document ids linked to any of `entity_ids`, in one read.
    async fn documents_for(&self, entity_ids: &[EntityId]) -> CanonResult<Vec<String>>;

    /// All associations of one entity.
    async fn associations_of(&self, entity_id: EntityId)
        -> CanonResult<Vec<DocumentAssociation>>;
}
