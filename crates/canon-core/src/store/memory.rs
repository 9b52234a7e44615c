//! In-memory graph store.
//!
//! Holds entities, relations and document links behind one async lock, so
//! every write is atomic with respect to readers. It enforces the same
//! contract as the SQLite store: unique relation triples, unique
//! (entity, document) links and store-assigned ids.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{CanonError, CanonResult};
use crate::traits::{DocumentStore, EntityStore, RedirectOutcome, RelationStore, Repository};
use crate::types::{
    DocumentAssociation, Entity, EntityFilter, EntityId, NewEntity, NewRelation, Relation,
    RelationId, RelationWrite, RewriteReport,
};

type Triple = (EntityId, String, EntityId);

#[derive(Debug, Default)]
struct GraphState {
    entities: BTreeMap<EntityId, Entity>,
    relations: BTreeMap<RelationId, Relation>,
    triples: HashMap<Triple, RelationId>,
    documents: BTreeMap<(EntityId, String), DateTime<Utc>>,
    next_entity_id: EntityId,
    next_relation_id: RelationId,
}

impl GraphState {
    fn insert_entity(&mut self, draft: NewEntity) -> CanonResult<Entity> {
        validate_entity_fields(&draft.name, &draft.entity_type)?;
        self.next_entity_id += 1;
        let now = Utc::now();
        let entity = Entity {
            id: self.next_entity_id,
            name: draft.name,
            entity_type: draft.entity_type,
            description: draft.description,
            canonical_id: None,
            vector_id: draft.vector_id,
            metadata: draft.metadata,
            created_at: now,
            updated_at: now,
        };
        self.entities.insert(entity.id, entity.clone());
        Ok(entity)
    }

    fn insert_relation(&mut self, draft: NewRelation) -> CanonResult<Relation> {
        if draft.predicate.trim().is_empty() {
            return Err(CanonError::missing_field("predicate"));
        }
        for id in [draft.subject_id, draft.object_id] {
            if !self.entities.contains_key(&id) {
                return Err(CanonError::entity_not_found(id));
            }
        }
        let triple = (draft.subject_id, draft.predicate.clone(), draft.object_id);
        if self.triples.contains_key(&triple) {
            return Err(CanonError::duplicate_triple(
                draft.subject_id,
                &draft.predicate,
                draft.object_id,
            ));
        }

        self.next_relation_id += 1;
        let now = Utc::now();
        let relation = Relation {
            id: self.next_relation_id,
            subject_id: draft.subject_id,
            predicate: draft.predicate,
            object_id: draft.object_id,
            vector_id: draft.vector_id,
            metadata: draft.metadata,
            created_at: now,
            updated_at: now,
        };
        self.triples.insert(triple, relation.id);
        self.relations.insert(relation.id, relation.clone());
        Ok(relation)
    }
}

fn validate_entity_fields(name: &str, entity_type: &str) -> CanonResult<()> {
    if name.trim().is_empty() {
        return Err(CanonError::missing_field("name"));
    }
    if entity_type.trim().is_empty() {
        return Err(CanonError::missing_field("entity_type"));
    }
    Ok(())
}

/// Write counters, mostly useful to assert how many rows an operation made.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub entity_creates: u64,
    pub relation_inserts: u64,
}

/// In-memory implementation of every store trait.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    state: RwLock<GraphState>,
    entity_creates: AtomicU64,
    relation_inserts: AtomicU64,
    closed: AtomicBool,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            entity_creates: self.entity_creates.load(Ordering::Relaxed),
            relation_inserts: self.relation_inserts.load(Ordering::Relaxed),
        }
    }

    /// Make every later call fail with `StoreUnavailable`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn ensure_open(&self) -> CanonResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CanonError::store_unavailable("in-memory store is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl Repository<Entity> for InMemoryGraphStore {
    async fn get(&self, id: EntityId) -> CanonResult<Option<Entity>> {
        self.ensure_open()?;
        Ok(self.state.read().await.entities.get(&id).cloned())
    }

    async fn get_many(&self, ids: &[EntityId]) -> CanonResult<Vec<Entity>> {
        self.ensure_open()?;
        let state = self.state.read().await;
        let unique: BTreeSet<EntityId> = ids.iter().copied().collect();
        Ok(unique
            .into_iter()
            .filter_map(|id| state.entities.get(&id).cloned())
            .collect())
    }

    async fn create(&self, draft: NewEntity) -> CanonResult<Entity> {
        self.ensure_open()?;
        let entity = self.state.write().await.insert_entity(draft)?;
        self.entity_creates.fetch_add(1, Ordering::Relaxed);
        Ok(entity)
    }

    async fn bulk_create(&self, drafts: Vec<NewEntity>) -> CanonResult<Vec<Entity>> {
        self.ensure_open()?;
        for draft in &drafts {
            validate_entity_fields(&draft.name, &draft.entity_type)?;
        }
        let mut state = self.state.write().await;
        let mut created = Vec::with_capacity(drafts.len());
        for draft in drafts {
            created.push(state.insert_entity(draft)?);
        }
        self.entity_creates
            .fetch_add(created.len() as u64, Ordering::Relaxed);
        Ok(created)
    }

    async fn update(&self, entity: &Entity) -> CanonResult<Entity> {
        self.ensure_open()?;
        validate_entity_fields(&entity.name, &entity.entity_type)?;
        let mut state = self.state.write().await;
        if let Some(target) = entity.canonical_id {
            if target == entity.id || !state.entities.contains_key(&target) {
                return Err(CanonError::validation(format!(
                    "entity {} cannot point at {}",
                    entity.id, target
                )));
            }
        }
        let stored = state
            .entities
            .get_mut(&entity.id)
            .ok_or_else(|| CanonError::entity_not_found(entity.id))?;
        let mut updated = entity.clone();
        updated.created_at = stored.created_at;
        updated.updated_at = Utc::now();
        *stored = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, id: EntityId) -> CanonResult<bool> {
        self.ensure_open()?;
        let mut state = self.state.write().await;
        if !state.entities.contains_key(&id) {
            return Ok(false);
        }
        let referenced = state.relations.values().any(|r| r.touches(id))
            || state.entities.values().any(|e| e.canonical_id == Some(id));
        if referenced {
            return Err(CanonError::IntegrityConflict {
                message: format!("entity {} is still referenced", id),
                code: crate::error::ErrorCode::IntConstraint,
            });
        }
        state.documents.retain(|(entity_id, _), _| *entity_id != id);
        Ok(state.entities.remove(&id).is_some())
    }

    async fn count(&self) -> CanonResult<u64> {
        self.ensure_open()?;
        Ok(self.state.read().await.entities.len() as u64)
    }
}

#[async_trait]
impl EntityStore for InMemoryGraphStore {
    async fn find_by_name(&self, name: &str, entity_type: &str) -> CanonResult<Vec<Entity>> {
        self.ensure_open()?;
        Ok(self
            .state
            .read()
            .await
            .entities
            .values()
            .filter(|e| e.name == name && e.entity_type == entity_type)
            .cloned()
            .collect())
    }

    async fn list(&self, filter: &EntityFilter) -> CanonResult<Vec<Entity>> {
        self.ensure_open()?;
        let state = self.state.read().await;
        let matching = state
            .entities
            .values()
            .filter(|e| filter.matches(e))
            .skip(filter.offset)
            .cloned();
        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    async fn aliases_of(&self, canonical_id: EntityId) -> CanonResult<Vec<Entity>> {
        self.ensure_open()?;
        Ok(self
            .state
            .read()
            .await
            .entities
            .values()
            .filter(|e| e.canonical_id == Some(canonical_id))
            .cloned()
            .collect())
    }

    async fn redirect(
        &self,
        alias_id: EntityId,
        root_id: EntityId,
    ) -> CanonResult<RedirectOutcome> {
        self.ensure_open()?;
        if alias_id == root_id {
            return Err(CanonError::validation("an entity cannot redirect to itself"));
        }
        let mut state = self.state.write().await;
        match state.entities.get(&root_id) {
            None => return Err(CanonError::entity_not_found(root_id)),
            Some(root) if !root.is_canonical() => {
                return Err(CanonError::validation(format!(
                    "redirect target {} is itself an alias",
                    root_id
                )))
            }
            Some(_) => {}
        }
        if !state.entities.contains_key(&alias_id) {
            return Err(CanonError::entity_not_found(alias_id));
        }

        let now = Utc::now();
        let mut outcome = RedirectOutcome::default();
        for entity in state.entities.values_mut() {
            if entity.id == alias_id {
                if entity.canonical_id != Some(root_id) {
                    entity.canonical_id = Some(root_id);
                    entity.updated_at = now;
                    outcome.changed = true;
                }
            } else if entity.canonical_id == Some(alias_id) {
                entity.canonical_id = Some(root_id);
                entity.updated_at = now;
                outcome.repointed.push(entity.id);
            }
        }
        Ok(outcome)
    }
}

#[async_trait]
impl Repository<Relation> for InMemoryGraphStore {
    async fn get(&self, id: RelationId) -> CanonResult<Option<Relation>> {
        self.ensure_open()?;
        Ok(self.state.read().await.relations.get(&id).cloned())
    }

    async fn get_many(&self, ids: &[RelationId]) -> CanonResult<Vec<Relation>> {
        self.ensure_open()?;
        let state = self.state.read().await;
        let unique: BTreeSet<RelationId> = ids.iter().copied().collect();
        Ok(unique
            .into_iter()
            .filter_map(|id| state.relations.get(&id).cloned())
            .collect())
    }

    async fn create(&self, draft: NewRelation) -> CanonResult<Relation> {
        self.ensure_open()?;
        let relation = self.state.write().await.insert_relation(draft)?;
        self.relation_inserts.fetch_add(1, Ordering::Relaxed);
        Ok(relation)
    }

    async fn bulk_create(&self, drafts: Vec<NewRelation>) -> CanonResult<Vec<Relation>> {
        self.ensure_open()?;
        let mut state = self.state.write().await;

        // Validate the whole batch before writing any of it.
        let mut seen: HashSet<Triple> = HashSet::new();
        for draft in &drafts {
            let triple = (draft.subject_id, draft.predicate.clone(), draft.object_id);
            if state.triples.contains_key(&triple) || !seen.insert(triple) {
                return Err(CanonError::duplicate_triple(
                    draft.subject_id,
                    &draft.predicate,
                    draft.object_id,
                ));
            }
            for id in [draft.subject_id, draft.object_id] {
                if !state.entities.contains_key(&id) {
                    return Err(CanonError::entity_not_found(id));
                }
            }
        }

        let mut created = Vec::with_capacity(drafts.len());
        for draft in drafts {
            created.push(state.insert_relation(draft)?);
        }
        self.relation_inserts
            .fetch_add(created.len() as u64, Ordering::Relaxed);
        Ok(created)
    }

    async fn update(&self, relation: &Relation) -> CanonResult<Relation> {
        self.ensure_open()?;
        let mut state = self.state.write().await;
        let previous = state
            .relations
            .get(&relation.id)
            .cloned()
            .ok_or_else(|| CanonError::relation_not_found(relation.id))?;

        let old_triple = (previous.subject_id, previous.predicate.clone(), previous.object_id);
        let new_triple = (relation.subject_id, relation.predicate.clone(), relation.object_id);
        if old_triple != new_triple {
            if state.triples.contains_key(&new_triple) {
                return Err(CanonError::duplicate_triple(
                    relation.subject_id,
                    &relation.predicate,
                    relation.object_id,
                ));
            }
            state.triples.remove(&old_triple);
            state.triples.insert(new_triple, relation.id);
        }

        let mut updated = relation.clone();
        updated.created_at = previous.created_at;
        updated.updated_at = Utc::now();
        state.relations.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, id: RelationId) -> CanonResult<bool> {
        self.ensure_open()?;
        let mut state = self.state.write().await;
        match state.relations.remove(&id) {
            Some(relation) => {
                state
                    .triples
                    .remove(&(relation.subject_id, relation.predicate, relation.object_id));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count(&self) -> CanonResult<u64> {
        self.ensure_open()?;
        Ok(self.state.read().await.relations.len() as u64)
    }
}

#[async_trait]
impl RelationStore for InMemoryGraphStore {
    async fn insert(&self, draft: NewRelation) -> CanonResult<RelationWrite> {
        self.ensure_open()?;
        let mut state = self.state.write().await;
        let triple = (draft.subject_id, draft.predicate.clone(), draft.object_id);
        if let Some(existing) = state.triples.get(&triple) {
            return Ok(RelationWrite::Duplicate {
                existing_id: Some(*existing),
            });
        }
        let relation = state.insert_relation(draft)?;
        self.relation_inserts.fetch_add(1, Ordering::Relaxed);
        Ok(RelationWrite::Created(relation))
    }

    async fn rewrite_references(
        &self,
        from: EntityId,
        to: EntityId,
    ) -> CanonResult<RewriteReport> {
        self.ensure_open()?;
        let mut report = RewriteReport::default();
        if from == to {
            return Ok(report);
        }

        let mut state = self.state.write().await;
        let affected: Vec<Relation> = state
            .relations
            .values()
            .filter(|r| r.touches(from))
            .cloned()
            .collect();

        let now = Utc::now();
        for relation in affected {
            let old_triple = (
                relation.subject_id,
                relation.predicate.clone(),
                relation.object_id,
            );
            let (subject_id, predicate, object_id) = relation.rewritten(from, to);
            let new_triple = (subject_id, predicate.to_string(), object_id);

            state.triples.remove(&old_triple);
            if state.triples.contains_key(&new_triple) {
                state.relations.remove(&relation.id);
                report.dropped_duplicates += 1;
                continue;
            }
            state.triples.insert(new_triple, relation.id);
            if let Some(stored) = state.relations.get_mut(&relation.id) {
                stored.subject_id = subject_id;
                stored.object_id = object_id;
                stored.updated_at = now;
            }
            report.rewritten += 1;
        }
        Ok(report)
    }

    async fn relations_touching(
        &self,
        entity_ids: &[EntityId],
        predicates: Option<&[String]>,
    ) -> CanonResult<Vec<Relation>> {
        self.ensure_open()?;
        if entity_ids.is_empty() {
            return Ok(Vec::new());
        }
        let wanted: HashSet<EntityId> = entity_ids.iter().copied().collect();
        let state = self.state.read().await;
        Ok(state
            .relations
            .values()
            .filter(|r| wanted.contains(&r.subject_id) || wanted.contains(&r.object_id))
            .filter(|r| predicates.map_or(true, |p| p.iter().any(|x| x == &r.predicate)))
            .cloned()
            .collect())
    }

    async fn count_touching(&self, entity_id: EntityId) -> CanonResult<u64> {
        self.ensure_open()?;
        Ok(self
            .state
            .read()
            .await
            .relations
            .values()
            .filter(|r| r.touches(entity_id))
            .count() as u64)
    }
}

#[async_trait]
impl DocumentStore for InMemoryGraphStore {
    async fn associate(&self, entity_id: EntityId, document_id: &str) -> CanonResult<bool> {
        self.ensure_open()?;
        if document_id.trim().is_empty() {
            return Err(CanonError::missing_field("document_id"));
        }
        let mut state = self.state.write().await;
        if !state.entities.contains_key(&entity_id) {
            return Err(CanonError::entity_not_found(entity_id));
        }
        let key = (entity_id, document_id.to_string());
        if state.documents.contains_key(&key) {
            return Ok(false);
        }
        state.documents.insert(key, Utc::now());
        Ok(true)
    }

    async fn documents_for(&self, entity_ids: &[EntityId]) -> CanonResult<Vec<String>> {
        self.ensure_open()?;
        let wanted: HashSet<EntityId> = entity_ids.iter().copied().collect();
        let state = self.state.read().await;
        let documents: BTreeSet<String> = state
            .documents
            .keys()
            .filter(|(entity_id, _)| wanted.contains(entity_id))
            .map(|(_, document_id)| document_id.clone())
            .collect();
        Ok(documents.into_iter().collect())
    }

    async fn associations_of(&self, entity_id: EntityId) -> CanonResult<Vec<DocumentAssociation>> {
        self.ensure_open()?;
        Ok(self
            .state
            .read()
            .await
            .documents
            .range((entity_id, String::new())..)
            .take_while(|((id, _), _)| *id == entity_id)
            .map(|((id, document_id), created_at)| DocumentAssociation {
                entity_id: *id,
                document_id: document_id.clone(),
                created_at: *created_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn entity(store: &InMemoryGraphStore, name: &str) -> Entity {
        Repository::<Entity>::create(store, NewEntity::new(name, "person"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_insert_absorbs_duplicate_triple() {
        let store = InMemoryGraphStore::new();
        let a = entity(&store, "A").await;
        let b = entity(&store, "B").await;

        let first = store.insert(NewRelation::new(a.id, "knows", b.id)).await.unwrap();
        let second = store.insert(NewRelation::new(a.id, "knows", b.id)).await.unwrap();

        assert!(first.is_created());
        assert!(matches!(second, RelationWrite::Duplicate { existing_id: Some(_) }));
        assert_eq!(Repository::<Relation>::count(&store).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_triple() {
        let store = InMemoryGraphStore::new();
        let a = entity(&store, "A").await;
        let b = entity(&store, "B").await;
        Repository::<Relation>::create(&store, NewRelation::new(a.id, "knows", b.id))
            .await
            .unwrap();

        let err = Repository::<Relation>::create(&store, NewRelation::new(a.id, "knows", b.id))
            .await
            .unwrap_err();
        assert!(err.is_integrity_conflict());
    }

    #[tokio::test]
    async fn test_rewrite_drops_would_be_duplicates() {
        let store = InMemoryGraphStore::new();
        let a = entity(&store, "A").await;
        let a2 = entity(&store, "A2").await;
        let b = entity(&store, "B").await;
        store.insert(NewRelation::new(a.id, "knows", b.id)).await.unwrap();
        store.insert(NewRelation::new(a2.id, "knows", b.id)).await.unwrap();
        store.insert(NewRelation::new(a2.id, "likes", b.id)).await.unwrap();

        let report = store.rewrite_references(a2.id, a.id).await.unwrap();

        assert_eq!(report.rewritten, 1);
        assert_eq!(report.dropped_duplicates, 1);
        assert_eq!(store.count_touching(a2.id).await.unwrap(), 0);
        assert_eq!(store.count_touching(a.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_redirect_repoints_aliases() {
        let store = InMemoryGraphStore::new();
        let a = entity(&store, "A").await;
        let b = entity(&store, "B").await;
        let c = entity(&store, "C").await;
        store.redirect(a.id, b.id).await.unwrap();

        let outcome = store.redirect(b.id, c.id).await.unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.repointed, vec![a.id]);

        let a = Repository::<Entity>::get(&store, a.id).await.unwrap().unwrap();
        assert_eq!(a.canonical_id, Some(c.id));
    }

    #[tokio::test]
    async fn test_redirect_to_alias_rejected() {
        let store = InMemoryGraphStore::new();
        let a = entity(&store, "A").await;
        let b = entity(&store, "B").await;
        let c = entity(&store, "C").await;
        store.redirect(a.id, b.id).await.unwrap();

        let err = store.redirect(c.id, a.id).await.unwrap_err();
        assert!(matches!(err, CanonError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_documents_for_is_distinct_and_sorted() {
        let store = InMemoryGraphStore::new();
        let a = entity(&store, "A").await;
        let b = entity(&store, "B").await;
        assert!(store.associate(a.id, "d2").await.unwrap());
        assert!(!store.associate(a.id, "d2").await.unwrap());
        store.associate(b.id, "d2").await.unwrap();
        store.associate(b.id, "d1").await.unwrap();

        let docs = store.documents_for(&[a.id, b.id]).await.unwrap();
        assert_eq!(docs, vec!["d1".to_string(), "d2".to_string()]);
        assert_eq!(store.associations_of(b.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_closed_store_is_unavailable() {
        let store = InMemoryGraphStore::new();
        store.close();
        let err = Repository::<Entity>::count(&store).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
