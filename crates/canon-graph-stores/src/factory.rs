//! Factory for opening the persistent stores.

use std::sync::Arc;

use canon_core::config::StoreConfig;
use canon_core::error::CanonResult;
use canon_core::traits::VectorIndex;

use crate::embedded::SqliteGraphStore;

/// The graph store and the vector index living in the same database.
pub struct StoreHandles {
    pub graph: Arc<SqliteGraphStore>,
    pub vectors: Arc<dyn VectorIndex>,
}

/// Factory for creating graph stores.
pub struct GraphStoreFactory;

impl GraphStoreFactory {
    /// Open the database a configuration points at.
    pub fn open(config: &StoreConfig) -> CanonResult<StoreHandles> {
        let graph = SqliteGraphStore::from_config(config)?;
        let vectors: Arc<dyn VectorIndex> = Arc::new(graph.vector_index());
        tracing::info!(path = %config.path.display(), "Graph store ready");

        Ok(StoreHandles {
            graph: Arc::new(graph),
            vectors,
        })
    }

    /// Fresh in-memory stores.
    pub fn in_memory() -> CanonResult<StoreHandles> {
        Self::open(&StoreConfig {
            path: ":memory:".into(),
        })
    }
}
