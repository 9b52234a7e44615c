//! Row mapping and statement helpers shared by the store implementations.
//!
//! Every helper takes a plain `&Connection` so it can run inside a
//! transaction (`Transaction` derefs to `Connection`).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use canon_core::error::{CanonError, CanonResult};
use canon_core::types::{Entity, EntityId, NewEntity, NewRelation, Relation, RelationId};

/// Ids bound per `IN (...)` list.
pub const CHUNK_SIZE: usize = 500;

pub const ENTITY_COLUMNS: &str = "id, name, entity_type, description, canonical_id, vector_id, \
                                  metadata, created_at, updated_at";

pub const RELATION_COLUMNS: &str =
    "id, subject_id, predicate, object_id, vector_id, metadata, created_at, updated_at";

pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_metadata(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({}))
}

pub fn entity_from_row(row: &Row<'_>) -> rusqlite::Result<Entity> {
    let metadata: String = row.get(6)?;
    Ok(Entity {
        id: row.get(0)?,
        name: row.get(1)?,
        entity_type: row.get(2)?,
        description: row.get(3)?,
        canonical_id: row.get(4)?,
        vector_id: row.get(5)?,
        metadata: parse_metadata(&metadata),
        created_at: parse_timestamp(row, 7)?,
        updated_at: parse_timestamp(row, 8)?,
    })
}

pub fn relation_from_row(row: &Row<'_>) -> rusqlite::Result<Relation> {
    let metadata: String = row.get(5)?;
    Ok(Relation {
        id: row.get(0)?,
        subject_id: row.get(1)?,
        predicate: row.get(2)?,
        object_id: row.get(3)?,
        vector_id: row.get(4)?,
        metadata: parse_metadata(&metadata),
        created_at: parse_timestamp(row, 6)?,
        updated_at: parse_timestamp(row, 7)?,
    })
}

/// `?, ?, ?` with `n` placeholders.
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

pub fn validate_entity_fields(name: &str, entity_type: &str) -> CanonResult<()> {
    if name.trim().is_empty() {
        return Err(CanonError::missing_field("name"));
    }
    if entity_type.trim().is_empty() {
        return Err(CanonError::missing_field("entity_type"));
    }
    Ok(())
}

pub fn load_entity(conn: &Connection, id: EntityId) -> CanonResult<Option<Entity>> {
    let sql = format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], entity_from_row).optional()?)
}

pub fn require_entity(conn: &Connection, id: EntityId) -> CanonResult<Entity> {
    load_entity(conn, id)?.ok_or_else(|| CanonError::entity_not_found(id))
}

/// Entities matching a `WHERE` clause, in id order.
pub fn query_entities<P: rusqlite::Params>(
    conn: &Connection,
    clause: &str,
    params: P,
) -> CanonResult<Vec<Entity>> {
    let sql = format!("SELECT {ENTITY_COLUMNS} FROM entities {clause}");
    let mut stmt = conn.prepare(&sql)?;
    let entities = stmt
        .query_map(params, entity_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entities)
}

pub fn load_entities(conn: &Connection, ids: &[EntityId]) -> CanonResult<Vec<Entity>> {
    let mut found = BTreeMap::new();
    for chunk in ids.chunks(CHUNK_SIZE) {
        let clause = format!("WHERE id IN ({})", placeholders(chunk.len()));
        for entity in query_entities(conn, &clause, params_from_iter(chunk.iter()))? {
            found.insert(entity.id, entity);
        }
    }
    Ok(found.into_values().collect())
}

pub fn insert_entity(conn: &Connection, draft: NewEntity) -> CanonResult<Entity> {
    validate_entity_fields(&draft.name, &draft.entity_type)?;
    let now = timestamp(Utc::now());
    conn.execute(
        "INSERT INTO entities (name, entity_type, description, canonical_id, vector_id, metadata,
                               created_at, updated_at)
         VALUES (?1, ?2, ?3, NULL, ?4, ?5, ?6, ?6)",
        params![
            draft.name,
            draft.entity_type,
            draft.description,
            draft.vector_id,
            serde_json::to_string(&draft.metadata)?,
            now,
        ],
    )?;
    require_entity(conn, conn.last_insert_rowid())
}

pub fn load_relation(conn: &Connection, id: RelationId) -> CanonResult<Option<Relation>> {
    let sql = format!("SELECT {RELATION_COLUMNS} FROM relations WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], relation_from_row).optional()?)
}

pub fn query_relations<P: rusqlite::Params>(
    conn: &Connection,
    clause: &str,
    params: P,
) -> CanonResult<Vec<Relation>> {
    let sql = format!("SELECT {RELATION_COLUMNS} FROM relations {clause}");
    let mut stmt = conn.prepare(&sql)?;
    let relations = stmt
        .query_map(params, relation_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(relations)
}

/// Id of the relation holding a triple, ignoring `except`.
pub fn find_triple(
    conn: &Connection,
    subject_id: EntityId,
    predicate: &str,
    object_id: EntityId,
    except: Option<RelationId>,
) -> CanonResult<Option<RelationId>> {
    Ok(conn
        .query_row(
            "SELECT id FROM relations
             WHERE subject_id = ?1 AND predicate = ?2 AND object_id = ?3
               AND (?4 IS NULL OR id != ?4)",
            params![subject_id, predicate, object_id, except],
            |row| row.get(0),
        )
        .optional()?)
}

/// Insert one relation. A taken triple is reported as a duplicate-triple
/// conflict; a missing endpoint as not found.
pub fn insert_relation(conn: &Connection, draft: NewRelation) -> CanonResult<Relation> {
    if draft.predicate.trim().is_empty() {
        return Err(CanonError::missing_field("predicate"));
    }
    for id in [draft.subject_id, draft.object_id] {
        require_entity(conn, id)?;
    }

    let now = timestamp(Utc::now());
    let inserted = conn.execute(
        "INSERT INTO relations (subject_id, predicate, object_id, vector_id, metadata,
                                created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            draft.subject_id,
            draft.predicate,
            draft.object_id,
            draft.vector_id,
            serde_json::to_string(&draft.metadata)?,
            now,
        ],
    );
    match inserted {
        Ok(_) => {}
        Err(err) if is_unique_violation(&err) => {
            return Err(CanonError::duplicate_triple(
                draft.subject_id,
                &draft.predicate,
                draft.object_id,
            ))
        }
        Err(err) => return Err(err.into()),
    }

    load_relation(conn, conn.last_insert_rowid())?
        .ok_or_else(|| CanonError::internal("inserted relation vanished"))
}
