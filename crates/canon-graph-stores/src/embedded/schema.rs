//! SQLite schema for the canonical graph.
//!
//! Four tables:
//! - `entities`: nodes, with an optional `canonical_id` pointing at the root
//!   an alias was merged into
//! - `relations`: directed edges, unique per (subject, predicate, object)
//! - `entity_documents`: which documents mention which entity
//! - `entity_vectors`: embedding vectors for similarity search

use rusqlite::Connection;

use canon_core::error::CanonResult;

pub const CREATE_ENTITIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS entities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL CHECK (length(trim(name)) > 0),
    entity_type TEXT NOT NULL CHECK (length(trim(entity_type)) > 0),
    description TEXT NOT NULL DEFAULT '',
    canonical_id INTEGER NULL REFERENCES entities(id),
    vector_id TEXT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (canonical_id IS NULL OR canonical_id != id)
)
"#;

pub const CREATE_ENTITIES_NAME_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(name, entity_type)
"#;

pub const CREATE_ENTITIES_TYPE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(entity_type)
"#;

/// Alias lookups walk this index.
pub const CREATE_ENTITIES_CANONICAL_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_entities_canonical ON entities(canonical_id)
"#;

pub const CREATE_RELATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS relations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    subject_id INTEGER NOT NULL REFERENCES entities(id),
    predicate TEXT NOT NULL CHECK (length(trim(predicate)) > 0),
    object_id INTEGER NOT NULL REFERENCES entities(id),
    vector_id TEXT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(subject_id, predicate, object_id)
)
"#;

pub const CREATE_RELATIONS_SUBJECT_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_relations_subject ON relations(subject_id)
"#;

pub const CREATE_RELATIONS_OBJECT_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_relations_object ON relations(object_id)
"#;

pub const CREATE_RELATIONS_PREDICATE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_relations_predicate ON relations(predicate)
"#;

pub const CREATE_ENTITY_DOCUMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS entity_documents (
    entity_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    document_id TEXT NOT NULL CHECK (length(trim(document_id)) > 0),
    created_at TEXT NOT NULL,
    PRIMARY KEY (entity_id, document_id)
)
"#;

pub const CREATE_ENTITY_DOCUMENTS_DOCUMENT_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_entity_documents_document ON entity_documents(document_id)
"#;

/// Vectors are stored as JSON arrays; the index scans a type partition.
pub const CREATE_ENTITY_VECTORS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS entity_vectors (
    vector_id TEXT PRIMARY KEY,
    entity_id INTEGER NOT NULL,
    entity_type TEXT NOT NULL,
    vector TEXT NOT NULL,
    dims INTEGER NOT NULL
)
"#;

pub const CREATE_ENTITY_VECTORS_TYPE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_entity_vectors_type ON entity_vectors(entity_type)
"#;

/// Initialize the graph schema in the given database connection.
///
/// Safe to call multiple times.
pub fn init_schema(conn: &Connection) -> CanonResult<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    for statement in [
        CREATE_ENTITIES_TABLE,
        CREATE_RELATIONS_TABLE,
        CREATE_ENTITY_DOCUMENTS_TABLE,
        CREATE_ENTITY_VECTORS_TABLE,
        CREATE_ENTITIES_NAME_INDEX,
        CREATE_ENTITIES_TYPE_INDEX,
        CREATE_ENTITIES_CANONICAL_INDEX,
        CREATE_RELATIONS_SUBJECT_INDEX,
        CREATE_RELATIONS_OBJECT_INDEX,
        CREATE_RELATIONS_PREDICATE_INDEX,
        CREATE_ENTITY_DOCUMENTS_DOCUMENT_INDEX,
        CREATE_ENTITY_VECTORS_TYPE_INDEX,
    ] {
        conn.execute(statement, [])?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn insert_entity(conn: &Connection, name: &str) -> i64 {
        conn.execute(
            "INSERT INTO entities (name, entity_type, created_at, updated_at)
             VALUES (?1, 'person', 'now', 'now')",
            [name],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    #[test]
    fn test_init_schema_creates_tables() {
        let conn = schema();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        for table in ["entities", "relations", "entity_documents", "entity_vectors"] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn test_init_schema_idempotent() {
        let conn = schema();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='entities'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_relation_triple_is_unique() {
        let conn = schema();
        let a = insert_entity(&conn, "Alice");
        let b = insert_entity(&conn, "Bob");
        let insert = "INSERT INTO relations (subject_id, predicate, object_id, created_at, updated_at)
                      VALUES (?1, ?2, ?3, 'now', 'now')";

        conn.execute(insert, rusqlite::params![a, "knows", b]).unwrap();
        assert!(conn.execute(insert, rusqlite::params![a, "knows", b]).is_err());
        conn.execute(insert, rusqlite::params![b, "knows", a]).unwrap();
    }

    #[test]
    fn test_self_redirect_and_dangling_target_rejected() {
        let conn = schema();
        let a = insert_entity(&conn, "Alice");

        assert!(conn
            .execute("UPDATE entities SET canonical_id = id WHERE id = ?1", [a])
            .is_err());
        assert!(conn
            .execute("UPDATE entities SET canonical_id = 999 WHERE id = ?1", [a])
            .is_err());
    }
}
