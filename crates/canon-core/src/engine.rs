//! The `CanonEngine` facade.

use std::sync::Arc;

use crate::canonical::{CanonicalGraphMaintainer, HealReport, MergeOutcome, RepairReport};
use crate::config::{CanonConfig, SharedConfig};
use crate::context::OperationContext;
use crate::error::{CanonError, CanonResult};
use crate::pipeline::PipelineCoordinator;
use crate::query::{GraphTraversal, IntersectionQuery};
use crate::resolver::EntityResolver;
use crate::traits::{
    DisambiguationOracle, DocumentStore, Embedder, EntityStore, RelationStore, VectorIndex,
};
use crate::types::{
    BatchReport, DocumentPage, Entity, EntityCandidate, EntityId, ExtractionBatch,
    NeighborQuery, ResolvedEntity, Subgraph,
};

/// Entry point for resolution, maintenance and queries over one canonical
/// graph.
///
/// Operations read the configuration snapshot current when they start;
/// [`CanonEngine::reconfigure`] affects later operations only.
pub struct CanonEngine {
    config: SharedConfig,
    entities: Arc<dyn EntityStore>,
    maintainer: CanonicalGraphMaintainer,
    resolver: EntityResolver,
    traversal: GraphTraversal,
    intersection: IntersectionQuery,
    pipeline: PipelineCoordinator,
}

impl CanonEngine {
    /// Create a new engine with the given configuration and collaborators.
    ///
    /// Provider implementations live in canon-graph-stores, canon-embeddings
    /// and canon-llm.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CanonConfig,
        entities: Arc<dyn EntityStore>,
        relations: Arc<dyn RelationStore>,
        documents: Arc<dyn DocumentStore>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        oracle: Arc<dyn DisambiguationOracle>,
    ) -> CanonResult<Self> {
        config.validate()?;

        let maintainer = CanonicalGraphMaintainer::new(entities.clone(), relations.clone());
        let resolver = EntityResolver::new(
            entities.clone(),
            embedder,
            index,
            oracle,
            maintainer.clone(),
        );
        let traversal =
            GraphTraversal::new(entities.clone(), relations.clone(), maintainer.clone());
        let intersection = IntersectionQuery::new(documents.clone(), maintainer.clone());
        let pipeline = PipelineCoordinator::new(resolver.clone(), relations, documents);

        Ok(Self {
            config: SharedConfig::new(config),
            entities,
            maintainer,
            resolver,
            traversal,
            intersection,
            pipeline,
        })
    }

    pub fn builder(config: CanonConfig) -> CanonEngineBuilder {
        CanonEngineBuilder::new(config)
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<CanonConfig> {
        self.config.snapshot()
    }

    /// Validate and install a new configuration. The previous one stays in
    /// place when validation fails.
    pub fn reconfigure(&self, config: CanonConfig) -> CanonResult<()> {
        self.config.replace(config)?;
        tracing::info!("Configuration reloaded");
        Ok(())
    }

    /// Resolve one mention to a canonical entity.
    pub async fn resolve_entity(&self, candidate: &EntityCandidate) -> CanonResult<ResolvedEntity> {
        self.resolve_entity_with(&OperationContext::new(), candidate)
            .await
    }

    pub async fn resolve_entity_with(
        &self,
        ctx: &OperationContext,
        candidate: &EntityCandidate,
    ) -> CanonResult<ResolvedEntity> {
        let config = self.config.snapshot();
        self.resolver
            .resolve(ctx, &config.resolution, candidate)
            .await
    }

    /// Merge `alias_id` into `canonical_id`. Returns whether anything changed.
    pub async fn merge_entities(
        &self,
        alias_id: EntityId,
        canonical_id: EntityId,
    ) -> CanonResult<bool> {
        Ok(self.merge(alias_id, canonical_id).await?.changed)
    }

    /// Merge and report what moved.
    pub async fn merge(
        &self,
        alias_id: EntityId,
        canonical_id: EntityId,
    ) -> CanonResult<MergeOutcome> {
        self.maintainer.merge(alias_id, canonical_id).await
    }

    /// Neighbors of `root_id`. Unset bounds fall back to the configured
    /// traversal defaults.
    pub async fn get_neighbors(
        &self,
        root_id: EntityId,
        depth: Option<u8>,
        predicates: Option<Vec<String>>,
        max_entities: Option<usize>,
    ) -> CanonResult<Subgraph> {
        let query = self.neighbor_query(root_id, depth, predicates, max_entities);
        self.get_neighbors_with(&OperationContext::new(), &query)
            .await
    }

    /// A [`NeighborQuery`] with unset bounds taken from the current
    /// traversal defaults.
    pub fn neighbor_query(
        &self,
        root_id: EntityId,
        depth: Option<u8>,
        predicates: Option<Vec<String>>,
        max_entities: Option<usize>,
    ) -> NeighborQuery {
        let config = self.config.snapshot();
        NeighborQuery {
            root_id,
            depth: depth.unwrap_or(config.traversal.default_depth),
            predicates,
            max_entities: max_entities.unwrap_or(config.traversal.default_max_entities),
        }
    }

    pub async fn get_neighbors_with(
        &self,
        ctx: &OperationContext,
        query: &NeighborQuery,
    ) -> CanonResult<Subgraph> {
        self.traversal.get_neighbors(ctx, query).await
    }

    /// Documents every entity in `entity_ids` appears in, one page at a time.
    pub async fn get_common_documents(
        &self,
        entity_ids: &[EntityId],
        page: usize,
        page_size: Option<usize>,
    ) -> CanonResult<DocumentPage> {
        self.get_common_documents_with(&OperationContext::new(), entity_ids, page, page_size)
            .await
    }

    pub async fn get_common_documents_with(
        &self,
        ctx: &OperationContext,
        entity_ids: &[EntityId],
        page: usize,
        page_size: Option<usize>,
    ) -> CanonResult<DocumentPage> {
        let config = self.config.snapshot();
        let page_size = page_size.unwrap_or(config.intersection.default_page_size);
        self.intersection
            .get_common_documents(ctx, &config.intersection, entity_ids, page, page_size)
            .await
    }

    pub async fn ingest(&self, batch: ExtractionBatch) -> CanonResult<BatchReport> {
        self.ingest_with(&OperationContext::new(), batch).await
    }

    pub async fn ingest_with(
        &self,
        ctx: &OperationContext,
        batch: ExtractionBatch,
    ) -> CanonResult<BatchReport> {
        let config = self.config.snapshot();
        self.pipeline.ingest(ctx, &config, batch).await
    }

    pub async fn repair(&self) -> CanonResult<RepairReport> {
        self.repair_with(&OperationContext::new()).await
    }

    pub async fn repair_with(&self, ctx: &OperationContext) -> CanonResult<RepairReport> {
        self.maintainer.repair(ctx).await
    }

    pub async fn heal_duplicates(&self, entity_type: Option<&str>) -> CanonResult<HealReport> {
        self.heal_duplicates_with(&OperationContext::new(), entity_type)
            .await
    }

    pub async fn heal_duplicates_with(
        &self,
        ctx: &OperationContext,
        entity_type: Option<&str>,
    ) -> CanonResult<HealReport> {
        self.maintainer.heal_duplicates(ctx, entity_type).await
    }

    pub async fn entity(&self, id: EntityId) -> CanonResult<Option<Entity>> {
        self.entities.get(id).await
    }

    /// The canonical entity `id` resolves to.
    pub async fn canonical_entity(&self, id: EntityId) -> CanonResult<Entity> {
        self.maintainer.resolve_root(id).await
    }
}

/// Assembles a [`CanonEngine`] from its collaborators.
pub struct CanonEngineBuilder {
    config: CanonConfig,
    entities: Option<Arc<dyn EntityStore>>,
    relations: Option<Arc<dyn RelationStore>>,
    documents: Option<Arc<dyn DocumentStore>>,
    embedder: Option<Arc<dyn Embedder>>,
    index: Option<Arc<dyn VectorIndex>>,
    oracle: Option<Arc<dyn DisambiguationOracle>>,
}

impl CanonEngineBuilder {
    pub fn new(config: CanonConfig) -> Self {
        Self {
            config,
            entities: None,
            relations: None,
            documents: None,
            embedder: None,
            index: None,
            oracle: None,
        }
    }

    /// Use one store for entities, relations and documents.
    pub fn stores<S>(mut self, store: Arc<S>) -> Self
    where
        S: EntityStore + RelationStore + DocumentStore + 'static,
    {
        self.entities = Some(store.clone());
        self.relations = Some(store.clone());
        self.documents = Some(store);
        self
    }

    pub fn entity_store(mut self, store: Arc<dyn EntityStore>) -> Self {
        self.entities = Some(store);
        self
    }

    pub fn relation_store(mut self, store: Arc<dyn RelationStore>) -> Self {
        self.relations = Some(store);
        self
    }

    pub fn document_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.documents = Some(store);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn vector_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn oracle(mut self, oracle: Arc<dyn DisambiguationOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn build(self) -> CanonResult<CanonEngine> {
        fn required<T>(value: Option<T>, name: &str) -> CanonResult<T> {
            value.ok_or_else(|| CanonError::Configuration(format!("{} is not configured", name)))
        }

        CanonEngine::new(
            self.config,
            required(self.entities, "entity store")?,
            required(self.relations, "relation store")?,
            required(self.documents, "document store")?,
            required(self.embedder, "embedder")?,
            required(self.index, "vector index")?,
            required(self.oracle, "oracle")?,
        )
    }
}
