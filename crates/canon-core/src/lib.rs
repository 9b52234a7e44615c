//! canon-core - Core library for canon.
//!
//! This crate provides the types, traits and algorithms that keep a
//! deduplicated canonical entity graph consistent while it is fed freshly
//! extracted entities and relations, and that answer bounded queries over
//! that graph.
//!
//! # Example
//!
//! ```ignore
//! use canon_core::{CanonConfig, CanonEngine, EntityCandidate};
//!
//! let engine = CanonEngine::builder(CanonConfig::default())
//!     .stores(store)
//!     .embedder(embedder)
//!     .vector_index(index)
//!     .oracle(oracle)
//!     .build()?;
//!
//! // Resolve a mention to a canonical entity
//! let resolved = engine
//!     .resolve_entity(&EntityCandidate::new("Acme", "organization", "Anvil maker"))
//!     .await?;
//!
//! // Expand its neighborhood
//! let graph = engine.get_neighbors(resolved.id(), Some(2), None, None).await?;
//! ```

pub mod canonical;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod oracle;
pub mod pipeline;
pub mod query;
pub mod resolver;
pub mod store;
pub mod traits;
pub mod types;
pub mod vector;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use canonical::{CanonicalGraphMaintainer, HealReport, MergeOutcome, RepairReport};
pub use config::{CanonConfig, OracleConfig, OracleProvider, SharedConfig};
pub use context::OperationContext;
pub use engine::{CanonEngine, CanonEngineBuilder};
pub use error::{CanonError, CanonResult, ErrorCode};
pub use oracle::HeuristicOracle;
pub use pipeline::PipelineCoordinator;
pub use query::{GraphTraversal, IntersectionQuery};
pub use resolver::EntityResolver;
pub use store::InMemoryGraphStore;
pub use traits::{
    Disambiguation, DisambiguationOracle, DocumentStore, Embedder, EmbedderConfig,
    EmbedderProvider, EntityStore, OracleCandidate, RelationStore, Repository, VectorEntry,
    VectorIndex, VectorMatch,
};
pub use types::{
    BatchReport, DocumentPage, Entity, EntityCandidate, EntityId, ExtractionBatch, NeighborQuery,
    NewEntity, NewRelation, Relation, RelationCandidate, RelationId, ResolvedEntity, Subgraph,
};
pub use vector::InMemoryVectorIndex;
