//! Embedded graph store backed by SQLite.
//!
//! One connection behind a mutex serves every store trait. Each write runs
//! in its own transaction, so a merge's redirect either lands completely or
//! not at all. The relation triple is a `UNIQUE` constraint; the store maps
//! a violation to a duplicate instead of letting it escape as a database
//! error.

pub mod rows;
pub mod schema;
pub mod vector;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection};
use tracing::debug;

use canon_core::config::StoreConfig;
use canon_core::error::{CanonError, CanonResult};
use canon_core::traits::{DocumentStore, EntityStore, RedirectOutcome, RelationStore, Repository};
use canon_core::types::{
    DocumentAssociation, Entity, EntityFilter, EntityId, NewEntity, NewRelation, Relation,
    RelationId, RelationWrite, RewriteReport,
};

use rows::{
    find_triple, insert_entity, insert_relation, is_unique_violation, load_entities,
    load_relation, placeholders, query_entities, query_relations, require_entity, timestamp,
    validate_entity_fields, CHUNK_SIZE,
};

pub use vector::SqliteVectorIndex;

pub(crate) type SharedConnection = Arc<Mutex<Connection>>;

pub(crate) fn lock(conn: &SharedConnection) -> CanonResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|e| CanonError::internal(format!("sqlite connection poisoned: {}", e)))
}

/// SQLite implementation of the entity, relation and document stores.
pub struct SqliteGraphStore {
    conn: SharedConnection,
    path: Option<PathBuf>,
}

impl SqliteGraphStore {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> CanonResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| CanonError::store_unavailable(format!("{}: {}", path.display(), e)))?;
        schema::init_schema(&conn)?;
        debug!(path = %path.display(), "Opened graph store");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// A private in-memory database.
    pub fn in_memory() -> CanonResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Open the store a configuration points at. `:memory:` selects an
    /// in-memory database.
    pub fn from_config(config: &StoreConfig) -> CanonResult<Self> {
        if config.path.as_os_str() == ":memory:" {
            Self::in_memory()
        } else {
            Self::open(&config.path)
        }
    }

    /// Database file, if not in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// A vector index sharing this store's connection.
    pub fn vector_index(&self) -> SqliteVectorIndex {
        SqliteVectorIndex::with_connection(self.conn.clone())
    }

    fn conn(&self) -> CanonResult<MutexGuard<'_, Connection>> {
        lock(&self.conn)
    }
}

#[async_trait]
impl Repository<Entity> for SqliteGraphStore {
    async fn get(&self, id: EntityId) -> CanonResult<Option<Entity>> {
        let conn = self.conn()?;
        rows::load_entity(&conn, id)
    }

    async fn get_many(&self, ids: &[EntityId]) -> CanonResult<Vec<Entity>> {
        let unique: Vec<EntityId> = ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        let conn = self.conn()?;
        load_entities(&conn, &unique)
    }

    async fn create(&self, draft: NewEntity) -> CanonResult<Entity> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let entity = insert_entity(&tx, draft)?;
        tx.commit()?;
        Ok(entity)
    }

    async fn bulk_create(&self, drafts: Vec<NewEntity>) -> CanonResult<Vec<Entity>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut created = Vec::with_capacity(drafts.len());
        for draft in drafts {
            created.push(insert_entity(&tx, draft)?);
        }
        tx.commit()?;
        Ok(created)
    }

    async fn update(&self, entity: &Entity) -> CanonResult<Entity> {
        validate_entity_fields(&entity.name, &entity.entity_type)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        if let Some(target) = entity.canonical_id {
            if target == entity.id || rows::load_entity(&tx, target)?.is_none() {
                return Err(CanonError::validation(format!(
                    "entity {} cannot point at {}",
                    entity.id, target
                )));
            }
        }

        let updated = tx.execute(
            "UPDATE entities
             SET name = ?2, entity_type = ?3, description = ?4, canonical_id = ?5,
                 vector_id = ?6, metadata = ?7, updated_at = ?8
             WHERE id = ?1",
            params![
                entity.id,
                entity.name,
                entity.entity_type,
                entity.description,
                entity.canonical_id,
                entity.vector_id,
                serde_json::to_string(&entity.metadata)?,
                timestamp(Utc::now()),
            ],
        )?;
        if updated == 0 {
            return Err(CanonError::entity_not_found(entity.id));
        }

        let stored = require_entity(&tx, entity.id)?;
        tx.commit()?;
        Ok(stored)
    }

    /// Fails with an integrity conflict while relations or aliases still
    /// reference the entity. Document links go with it.
    async fn delete(&self, id: EntityId) -> CanonResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let deleted = tx.execute("DELETE FROM entities WHERE id = ?1", [id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    async fn count(&self) -> CanonResult<u64> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[async_trait]
impl EntityStore for SqliteGraphStore {
    async fn find_by_name(&self, name: &str, entity_type: &str) -> CanonResult<Vec<Entity>> {
        let conn = self.conn()?;
        query_entities(
            &conn,
            "WHERE name = ?1 AND entity_type = ?2 ORDER BY id",
            params![name, entity_type],
        )
    }

    async fn list(&self, filter: &EntityFilter) -> CanonResult<Vec<Entity>> {
        let mut conditions = Vec::new();
        let mut values: Vec<String> = Vec::new();
        if let Some(entity_type) = &filter.entity_type {
            values.push(entity_type.clone());
            conditions.push(format!("entity_type = ?{}", values.len()));
        }
        match filter.canonical {
            Some(true) => conditions.push("canonical_id IS NULL".to_string()),
            Some(false) => conditions.push("canonical_id IS NOT NULL".to_string()),
            None => {}
        }

        let mut clause = String::new();
        if !conditions.is_empty() {
            clause.push_str("WHERE ");
            clause.push_str(&conditions.join(" AND "));
        }
        let limit = filter.limit.map_or(-1, |l| l as i64);
        clause.push_str(&format!(" ORDER BY id LIMIT {} OFFSET {}", limit, filter.offset));

        let conn = self.conn()?;
        query_entities(&conn, &clause, params_from_iter(values.iter()))
    }

    async fn aliases_of(&self, canonical_id: EntityId) -> CanonResult<Vec<Entity>> {
        let conn = self.conn()?;
        query_entities(
            &conn,
            "WHERE canonical_id = ?1 ORDER BY id",
            [canonical_id],
        )
    }

    async fn redirect(
        &self,
        alias_id: EntityId,
        root_id: EntityId,
    ) -> CanonResult<RedirectOutcome> {
        if alias_id == root_id {
            return Err(CanonError::validation("an entity cannot redirect to itself"));
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let root = require_entity(&tx, root_id)?;
        if !root.is_canonical() {
            return Err(CanonError::validation(format!(
                "redirect target {} is itself an alias",
                root_id
            )));
        }
        require_entity(&tx, alias_id)?;

        let now = timestamp(Utc::now());
        let changed = tx.execute(
            "UPDATE entities SET canonical_id = ?2, updated_at = ?3
             WHERE id = ?1 AND (canonical_id IS NULL OR canonical_id != ?2)",
            params![alias_id, root_id, now],
        )? > 0;

        let repointed: Vec<EntityId> = {
            let mut stmt =
                tx.prepare("SELECT id FROM entities WHERE canonical_id = ?1 ORDER BY id")?;
            let ids = stmt
                .query_map([alias_id], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };
        if !repointed.is_empty() {
            tx.execute(
                "UPDATE entities SET canonical_id = ?2, updated_at = ?3 WHERE canonical_id = ?1",
                params![alias_id, root_id, now],
            )?;
        }

        tx.commit()?;
        Ok(RedirectOutcome { changed, repointed })
    }
}

#[async_trait]
impl Repository<Relation> for SqliteGraphStore {
    async fn get(&self, id: RelationId) -> CanonResult<Option<Relation>> {
        let conn = self.conn()?;
        load_relation(&conn, id)
    }

    async fn get_many(&self, ids: &[RelationId]) -> CanonResult<Vec<Relation>> {
        let unique: Vec<RelationId> = ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        let conn = self.conn()?;
        let mut found = Vec::with_capacity(unique.len());
        for chunk in unique.chunks(CHUNK_SIZE) {
            let clause = format!("WHERE id IN ({}) ORDER BY id", placeholders(chunk.len()));
            found.extend(query_relations(&conn, &clause, params_from_iter(chunk.iter()))?);
        }
        Ok(found)
    }

    async fn create(&self, draft: NewRelation) -> CanonResult<Relation> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let relation = insert_relation(&tx, draft)?;
        tx.commit()?;
        Ok(relation)
    }

    async fn bulk_create(&self, drafts: Vec<NewRelation>) -> CanonResult<Vec<Relation>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut created = Vec::with_capacity(drafts.len());
        for draft in drafts {
            created.push(insert_relation(&tx, draft)?);
        }
        tx.commit()?;
        Ok(created)
    }

    async fn update(&self, relation: &Relation) -> CanonResult<Relation> {
        if relation.predicate.trim().is_empty() {
            return Err(CanonError::missing_field("predicate"));
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let result = tx.execute(
            "UPDATE relations
             SET subject_id = ?2, predicate = ?3, object_id = ?4, vector_id = ?5,
                 metadata = ?6, updated_at = ?7
             WHERE id = ?1",
            params![
                relation.id,
                relation.subject_id,
                relation.predicate,
                relation.object_id,
                relation.vector_id,
                serde_json::to_string(&relation.metadata)?,
                timestamp(Utc::now()),
            ],
        );
        let updated = match result {
            Ok(n) => n,
            Err(err) if is_unique_violation(&err) => {
                return Err(CanonError::duplicate_triple(
                    relation.subject_id,
                    &relation.predicate,
                    relation.object_id,
                ))
            }
            Err(err) => return Err(err.into()),
        };
        if updated == 0 {
            return Err(CanonError::relation_not_found(relation.id));
        }

        let stored = load_relation(&tx, relation.id)?
            .ok_or_else(|| CanonError::relation_not_found(relation.id))?;
        tx.commit()?;
        Ok(stored)
    }

    async fn delete(&self, id: RelationId) -> CanonResult<bool> {
        let deleted = self
            .conn()?
            .execute("DELETE FROM relations WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }

    async fn count(&self) -> CanonResult<u64> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM relations", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[async_trait]
impl RelationStore for SqliteGraphStore {
    async fn insert(&self, draft: NewRelation) -> CanonResult<RelationWrite> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        if let Some(existing) =
            find_triple(&tx, draft.subject_id, &draft.predicate, draft.object_id, None)?
        {
            return Ok(RelationWrite::Duplicate {
                existing_id: Some(existing),
            });
        }
        let relation = insert_relation(&tx, draft)?;
        tx.commit()?;
        Ok(RelationWrite::Created(relation))
    }

    async fn rewrite_references(
        &self,
        from: EntityId,
        to: EntityId,
    ) -> CanonResult<RewriteReport> {
        let mut report = RewriteReport::default();
        if from == to {
            return Ok(report);
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let affected = query_relations(
            &tx,
            "WHERE subject_id = ?1 OR object_id = ?1 ORDER BY id",
            [from],
        )?;

        let now = timestamp(Utc::now());
        for relation in affected {
            let (subject_id, predicate, object_id) = relation.rewritten(from, to);
            if find_triple(&tx, subject_id, predicate, object_id, Some(relation.id))?.is_some() {
                tx.execute("DELETE FROM relations WHERE id = ?1", [relation.id])?;
                report.dropped_duplicates += 1;
                continue;
            }
            tx.execute(
                "UPDATE relations SET subject_id = ?2, object_id = ?3, updated_at = ?4
                 WHERE id = ?1",
                params![relation.id, subject_id, object_id, now],
            )?;
            report.rewritten += 1;
        }

        tx.commit()?;
        Ok(report)
    }

    async fn relations_touching(
        &self,
        entity_ids: &[EntityId],
        predicates: Option<&[String]>,
    ) -> CanonResult<Vec<Relation>> {
        if entity_ids.is_empty() {
            return Ok(Vec::new());
        }
        let unique: Vec<EntityId> = entity_ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        let predicates = predicates.unwrap_or_default();

        let conn = self.conn()?;
        let mut found: BTreeMap<RelationId, Relation> = BTreeMap::new();
        for chunk in unique.chunks(CHUNK_SIZE) {
            let ids = placeholders(chunk.len());
            let mut clause = format!("WHERE (subject_id IN ({ids}) OR object_id IN ({ids}))");
            if !predicates.is_empty() {
                clause.push_str(&format!(" AND predicate IN ({})", placeholders(predicates.len())));
            }
            clause.push_str(" ORDER BY id");

            let values: Vec<rusqlite::types::Value> = chunk
                .iter()
                .chain(chunk.iter())
                .map(|id| rusqlite::types::Value::Integer(*id))
                .chain(predicates.iter().map(|p| rusqlite::types::Value::Text(p.clone())))
                .collect();
            for relation in query_relations(&conn, &clause, params_from_iter(values))? {
                found.insert(relation.id, relation);
            }
        }
        Ok(found.into_values().collect())
    }

    async fn count_touching(&self, entity_id: EntityId) -> CanonResult<u64> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM relations WHERE subject_id = ?1 OR object_id = ?1",
            [entity_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

#[async_trait]
impl DocumentStore for SqliteGraphStore {
    async fn associate(&self, entity_id: EntityId, document_id: &str) -> CanonResult<bool> {
        if document_id.trim().is_empty() {
            return Err(CanonError::missing_field("document_id"));
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        require_entity(&tx, entity_id)?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO entity_documents (entity_id, document_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![entity_id, document_id, timestamp(Utc::now())],
        )?;
        tx.commit()?;
        Ok(inserted > 0)
    }

    async fn documents_for(&self, entity_ids: &[EntityId]) -> CanonResult<Vec<String>> {
        let conn = self.conn()?;
        let mut documents: BTreeSet<String> = BTreeSet::new();
        for chunk in entity_ids.chunks(CHUNK_SIZE) {
            let sql = format!(
                "SELECT DISTINCT document_id FROM entity_documents WHERE entity_id IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            for document in stmt.query_map(params_from_iter(chunk.iter()), |row| row.get(0))? {
                documents.insert(document?);
            }
        }
        Ok(documents.into_iter().collect())
    }

    async fn associations_of(&self, entity_id: EntityId) -> CanonResult<Vec<DocumentAssociation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT document_id, created_at FROM entity_documents
             WHERE entity_id = ?1 ORDER BY document_id",
        )?;
        let raw = stmt
            .query_map([entity_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(document_id, created_at)| {
                let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
                    .map_err(|e| CanonError::database(format!("bad timestamp: {}", e)))?
                    .with_timezone(&Utc);
                Ok(DocumentAssociation {
                    entity_id,
                    document_id,
                    created_at,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canon_core::error::ErrorCode;

    async fn entity(store: &SqliteGraphStore, name: &str) -> Entity {
        Repository::<Entity>::create(store, NewEntity::new(name, "person"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_entity() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let created = Repository::<Entity>::create(
            &store,
            NewEntity::new("Alice", "person")
                .with_description("engineer")
                .with_metadata(serde_json::json!({"team": "infra"})),
        )
        .await
        .unwrap();

        let fetched = Repository::<Entity>::get(&store, created.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched, created);
        assert!(fetched.is_canonical());
        assert_eq!(fetched.metadata["team"], "infra");
        assert_eq!(Repository::<Entity>::count(&store).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let err = Repository::<Entity>::create(&store, NewEntity::new("  ", "person"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValMissingField);
    }

    #[tokio::test]
    async fn test_insert_absorbs_duplicate_triple() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let a = entity(&store, "Alice").await;
        let b = entity(&store, "Bob").await;

        let first = store.insert(NewRelation::new(a.id, "knows", b.id)).await.unwrap();
        let second = store.insert(NewRelation::new(a.id, "knows", b.id)).await.unwrap();

        let RelationWrite::Created(relation) = first else {
            panic!("first insert should create");
        };
        assert_eq!(
            second,
            RelationWrite::Duplicate {
                existing_id: Some(relation.id)
            }
        );
        assert_eq!(Repository::<Relation>::count(&store).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_triple() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let a = entity(&store, "Alice").await;
        let b = entity(&store, "Bob").await;
        Repository::<Relation>::create(&store, NewRelation::new(a.id, "knows", b.id))
            .await
            .unwrap();

        let err = Repository::<Relation>::create(&store, NewRelation::new(a.id, "knows", b.id))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::IntDuplicateTriple);
    }

    #[tokio::test]
    async fn test_bulk_create_is_all_or_nothing() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let a = entity(&store, "Alice").await;
        let b = entity(&store, "Bob").await;

        let result = Repository::<Relation>::bulk_create(
            &store,
            vec![
                NewRelation::new(a.id, "knows", b.id),
                NewRelation::new(a.id, "knows", b.id),
            ],
        )
        .await;

        assert!(result.is_err());
        assert_eq!(Repository::<Relation>::count(&store).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_relation_to_missing_entity() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let a = entity(&store, "Alice").await;

        let err = store
            .insert(NewRelation::new(a.id, "knows", 404))
            .await
            .unwrap_err();
        assert!(matches!(err, CanonError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_rewrite_drops_would_be_duplicates() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let alias = entity(&store, "A. Smith").await;
        let root = entity(&store, "Alice").await;
        let acme = entity(&store, "Acme").await;
        let bob = entity(&store, "Bob").await;
        store.insert(NewRelation::new(root.id, "works_at", acme.id)).await.unwrap();
        store.insert(NewRelation::new(alias.id, "works_at", acme.id)).await.unwrap();
        store.insert(NewRelation::new(bob.id, "knows", alias.id)).await.unwrap();

        let report = store.rewrite_references(alias.id, root.id).await.unwrap();

        assert_eq!(report.rewritten, 1);
        assert_eq!(report.dropped_duplicates, 1);
        assert_eq!(store.count_touching(alias.id).await.unwrap(), 0);
        let touching = store.relations_touching(&[root.id], None).await.unwrap();
        assert_eq!(touching.len(), 2);
    }

    #[tokio::test]
    async fn test_redirect_repoints_aliases() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let a = entity(&store, "a").await;
        let b = entity(&store, "b").await;
        let c = entity(&store, "c").await;

        assert!(store.redirect(a.id, b.id).await.unwrap().changed);
        let outcome = store.redirect(b.id, c.id).await.unwrap();

        assert!(outcome.changed);
        assert_eq!(outcome.repointed, vec![a.id]);
        let aliases: Vec<EntityId> = store
            .aliases_of(c.id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(aliases, vec![a.id, b.id]);

        let again = store.redirect(b.id, c.id).await.unwrap();
        assert!(!again.changed);
        assert!(again.repointed.is_empty());
    }

    #[tokio::test]
    async fn test_redirect_to_alias_rejected() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let a = entity(&store, "a").await;
        let b = entity(&store, "b").await;
        let c = entity(&store, "c").await;
        store.redirect(a.id, b.id).await.unwrap();

        assert!(matches!(
            store.redirect(c.id, a.id).await,
            Err(CanonError::Validation { .. })
        ));
        assert!(matches!(
            store.redirect(c.id, c.id).await,
            Err(CanonError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_referenced_entity_conflicts() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let a = entity(&store, "Alice").await;
        let b = entity(&store, "Bob").await;
        let c = entity(&store, "Carol").await;
        store.insert(NewRelation::new(a.id, "knows", b.id)).await.unwrap();

        let err = Repository::<Entity>::delete(&store, a.id).await.unwrap_err();
        assert!(err.is_integrity_conflict());
        assert!(Repository::<Entity>::delete(&store, c.id).await.unwrap());
        assert!(!Repository::<Entity>::delete(&store, c.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_filters_and_pages() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let a = entity(&store, "a").await;
        let b = entity(&store, "b").await;
        let c = entity(&store, "c").await;
        Repository::<Entity>::create(&store, NewEntity::new("Acme", "organization"))
            .await
            .unwrap();
        store.redirect(b.id, a.id).await.unwrap();

        let people = store
            .list(&EntityFilter::canonical().of_type("person"))
            .await
            .unwrap();
        assert_eq!(people.iter().map(|e| e.id).collect::<Vec<_>>(), vec![a.id, c.id]);

        let page = store
            .list(&EntityFilter {
                limit: Some(1),
                offset: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.iter().map(|e| e.id).collect::<Vec<_>>(), vec![b.id]);

        let aliases = store.list(&EntityFilter::aliases()).await.unwrap();
        assert_eq!(aliases.len(), 1);
    }

    #[tokio::test]
    async fn test_relations_touching_filters_predicates() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let a = entity(&store, "a").await;
        let b = entity(&store, "b").await;
        let c = entity(&store, "c").await;
        store.insert(NewRelation::new(a.id, "knows", b.id)).await.unwrap();
        store.insert(NewRelation::new(c.id, "owns", a.id)).await.unwrap();
        store.insert(NewRelation::new(b.id, "owns", c.id)).await.unwrap();

        let all = store.relations_touching(&[a.id], None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.windows(2).all(|w| w[0].id < w[1].id));

        let owns = store
            .relations_touching(&[a.id, b.id], Some(&["owns".to_string()]))
            .await
            .unwrap();
        assert_eq!(owns.len(), 2);
        assert!(owns.iter().all(|r| r.predicate == "owns"));
    }

    #[tokio::test]
    async fn test_documents_are_distinct_and_sorted() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let a = entity(&store, "a").await;
        let b = entity(&store, "b").await;

        assert!(store.associate(a.id, "d2").await.unwrap());
        assert!(!store.associate(a.id, "d2").await.unwrap());
        store.associate(a.id, "d1").await.unwrap();
        store.associate(b.id, "d2").await.unwrap();

        assert_eq!(
            store.documents_for(&[a.id, b.id]).await.unwrap(),
            vec!["d1".to_string(), "d2".to_string()]
        );
        let links = store.associations_of(a.id).await.unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].document_id, "d1");
        assert!(store.associate(404, "d1").await.is_err());
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("graph.db");

        let (a, b) = {
            let store = SqliteGraphStore::open(&path).unwrap();
            let a = entity(&store, "Alice").await;
            let b = entity(&store, "Bob").await;
            store.insert(NewRelation::new(a.id, "knows", b.id)).await.unwrap();
            store.redirect(b.id, a.id).await.unwrap();
            store.associate(a.id, "doc-1").await.unwrap();
            (a, b)
        };

        let store = SqliteGraphStore::open(&path).unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
        let reloaded = Repository::<Entity>::get(&store, b.id).await.unwrap().unwrap();
        assert_eq!(reloaded.canonical_id, Some(a.id));
        assert_eq!(store.count_touching(a.id).await.unwrap(), 1);
        assert_eq!(store.documents_for(&[a.id]).await.unwrap(), vec!["doc-1".to_string()]);
    }
}
