//! canon-graph-stores - Persistent stores for canon.
//!
//! This crate provides the SQLite implementation of canon-core's entity,
//! relation and document stores, plus a vector index persisted in the same
//! database.
//!
//! # Example
//!
//! ```ignore
//! use canon_graph_stores::GraphStoreFactory;
//!
//! let handles = GraphStoreFactory::open(&config.store)?;
//! let engine = CanonEngine::builder(config)
//!     .stores(handles.graph)
//!     .vector_index(handles.vectors)
//!     .embedder(embedder)
//!     .oracle(oracle)
//!     .build()?;
//! ```

pub mod embedded;
mod factory;

pub use embedded::{SqliteGraphStore, SqliteVectorIndex};
pub use factory::{GraphStoreFactory, StoreHandles};

// Re-export core traits
pub use canon_core::traits::{DocumentStore, EntityStore, RelationStore, Repository, VectorIndex};
