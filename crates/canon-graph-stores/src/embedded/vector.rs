//! Vector index persisted in SQLite.
//!
//! Vectors are JSON arrays in `entity_vectors`. Search loads one entity-type
//! partition and ranks it with brute-force cosine similarity.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection};

use canon_core::error::{CanonError, CanonResult};
use canon_core::traits::{VectorEntry, VectorIndex, VectorMatch};
use canon_core::types::EntityId;
use canon_core::vector::rank_top_k;

use super::{lock, schema, SharedConnection};

/// SQLite-backed [`VectorIndex`].
pub struct SqliteVectorIndex {
    conn: SharedConnection,
}

impl SqliteVectorIndex {
    pub(crate) fn with_connection(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// A standalone in-memory index.
    pub fn in_memory() -> CanonResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::init_schema(&conn)?;
        Ok(Self::with_connection(Arc::new(Mutex::new(conn))))
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, entry: VectorEntry) -> CanonResult<()> {
        if entry.vector.is_empty() {
            return Err(CanonError::vector_index("cannot index an empty vector"));
        }
        let vector = serde_json::to_string(&entry.vector)?;

        lock(&self.conn)?
            .execute(
                "INSERT INTO entity_vectors (vector_id, entity_id, entity_type, vector, dims)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(vector_id) DO UPDATE SET
                     entity_id = excluded.entity_id,
                     entity_type = excluded.entity_type,
                     vector = excluded.vector,
                     dims = excluded.dims",
                params![
                    entry.vector_id,
                    entry.entity_id,
                    entry.entity_type,
                    vector,
                    entry.vector.len() as i64,
                ],
            )
            .map_err(|e| CanonError::vector_index(format!("Failed to upsert vector: {}", e)))?;
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        entity_type: &str,
        top_k: usize,
    ) -> CanonResult<Vec<VectorMatch>> {
        if top_k == 0 || vector.is_empty() {
            return Ok(Vec::new());
        }

        let stored: Vec<(EntityId, Vec<f32>)> = {
            let conn = lock(&self.conn)?;
            let mut stmt = conn.prepare(
                "SELECT entity_id, vector FROM entity_vectors
                 WHERE entity_type = ?1 AND dims = ?2",
            )?;
            let rows = stmt
                .query_map(params![entity_type, vector.len() as i64], |row| {
                    Ok((row.get::<_, EntityId>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .filter_map(|(entity_id, raw)| {
                    serde_json::from_str::<Vec<f32>>(&raw)
                        .ok()
                        .map(|v| (entity_id, v))
                })
                .collect()
        };

        Ok(rank_top_k(
            vector,
            stored.iter().map(|(id, v)| (*id, v.as_slice())),
            top_k,
        ))
    }

    async fn remove(&self, vector_id: &str) -> CanonResult<bool> {
        let removed = lock(&self.conn)?
            .execute("DELETE FROM entity_vectors WHERE vector_id = ?1", [vector_id])
            .map_err(|e| CanonError::vector_index(format!("Failed to remove vector: {}", e)))?;
        Ok(removed > 0)
    }

    async fn count(&self) -> CanonResult<usize> {
        let count: i64 =
            lock(&self.conn)?.query_row("SELECT COUNT(*) FROM entity_vectors", [], |row| {
                row.get(0)
            })?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqliteGraphStore;

    fn entry(vector_id: &str, entity_id: EntityId, entity_type: &str, v: &[f32]) -> VectorEntry {
        VectorEntry {
            vector_id: vector_id.to_string(),
            entity_id,
            entity_type: entity_type.to_string(),
            vector: v.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_search_ranks_within_type() {
        let index = SqliteVectorIndex::in_memory().unwrap();
        index.upsert(entry("v1", 1, "person", &[1.0, 0.0])).await.unwrap();
        index.upsert(entry("v2", 2, "person", &[0.7, 0.7])).await.unwrap();
        index.upsert(entry("v3", 3, "organization", &[1.0, 0.0])).await.unwrap();

        let hits = index.search(&[1.0, 0.0], "person", 5).await.unwrap();

        assert_eq!(hits.iter().map(|h| h.entity_id).collect::<Vec<_>>(), vec![1, 2]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(index.search(&[1.0, 0.0], "person", 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_remove() {
        let index = SqliteVectorIndex::in_memory().unwrap();
        index.upsert(entry("v1", 1, "person", &[1.0, 0.0])).await.unwrap();
        index.upsert(entry("v1", 1, "person", &[0.0, 1.0])).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 1);

        let hits = index.search(&[0.0, 1.0], "person", 1).await.unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-6);

        assert!(index.remove("v1").await.unwrap());
        assert!(!index.remove("v1").await.unwrap());
        assert_eq!(index.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_vector_rejected_and_mismatched_dims_skipped() {
        let index = SqliteVectorIndex::in_memory().unwrap();
        assert!(index.upsert(entry("v0", 1, "person", &[])).await.is_err());

        index.upsert(entry("v1", 1, "person", &[1.0, 0.0, 0.0])).await.unwrap();
        assert!(index.search(&[1.0, 0.0], "person", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shares_store_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.db");
        {
            let store = SqliteGraphStore::open(&path).unwrap();
            store
                .vector_index()
                .upsert(entry("v1", 7, "person", &[0.5, 0.5]))
                .await
                .unwrap();
        }

        let index = SqliteGraphStore::open(&path).unwrap().vector_index();
        let hits = index.search(&[0.5, 0.5], "person", 3).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity_id, 7);
    }
}
