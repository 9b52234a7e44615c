//! Entity resolution: reuse an existing canonical entity or create a new one.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::canonical::CanonicalGraphMaintainer;
use crate::config::ResolutionConfig;
use crate::context::OperationContext;
use crate::error::{CanonError, CanonResult};
use crate::traits::{
    DisambiguationOracle, Embedder, EntityStore, OracleCandidate, VectorEntry, VectorIndex,
    VectorMatch,
};
use crate::types::{
    Entity, EntityCandidate, EntityId, NewEntity, ResolutionOutcome, ResolvedEntity,
};

/// A canonical entity offered to the oracle, with the vector hit that led
/// to it.
#[derive(Debug, Clone)]
struct RankedRoot {
    root: Entity,
    hit: EntityId,
    score: f32,
}

/// Decides whether a mention is new or a duplicate of a canonical entity.
#[derive(Clone)]
pub struct EntityResolver {
    entities: Arc<dyn EntityStore>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    oracle: Arc<dyn DisambiguationOracle>,
    maintainer: CanonicalGraphMaintainer,
}

impl EntityResolver {
    pub fn new(
        entities: Arc<dyn EntityStore>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        oracle: Arc<dyn DisambiguationOracle>,
        maintainer: CanonicalGraphMaintainer,
    ) -> Self {
        Self {
            entities,
            embedder,
            index,
            oracle,
            maintainer,
        }
    }

    /// Resolve one candidate.
    ///
    /// Makes at most one entity create and always returns a canonical entity.
    /// Embedder, vector index and oracle failures degrade to creating a new
    /// entity; store failures, cancellation and an expired deadline are
    /// returned as errors.
    pub async fn resolve(
        &self,
        ctx: &OperationContext,
        config: &ResolutionConfig,
        candidate: &EntityCandidate,
    ) -> CanonResult<ResolvedEntity> {
        if candidate.name.trim().is_empty() {
            return Err(CanonError::missing_field("name"));
        }
        if candidate.entity_type.trim().is_empty() {
            return Err(CanonError::missing_field("entity_type"));
        }
        ctx.check()?;

        let timeout = config.collaborator_timeout();

        let vector = match ctx
            .call("embedder", timeout, self.embedder.embed(candidate.embedding_text()))
            .await
        {
            Ok(vector) => vector,
            Err(err) => {
                let reason = degrade_reason(ctx, "embedding", err)?;
                return self.create(ctx, config, candidate, None, Some(reason)).await;
            }
        };

        let matches = match ctx
            .call(
                "vector index",
                timeout,
                self.index
                    .search(&vector, candidate.entity_type.trim(), config.top_k),
            )
            .await
        {
            Ok(matches) => matches,
            Err(err) => {
                let reason = degrade_reason(ctx, "vector search", err)?;
                return self
                    .create(ctx, config, candidate, Some(vector), Some(reason))
                    .await;
            }
        };

        let ranked = self.rank_roots(&matches, config.min_similarity).await?;
        if ranked.is_empty() {
            debug!(name = %candidate.name, "No similar entities, creating");
            return self.create(ctx, config, candidate, Some(vector), None).await;
        }

        let offered: Vec<OracleCandidate> = ranked
            .iter()
            .map(|r| OracleCandidate::from_entity(&r.root, r.score))
            .collect();

        let verdict = match ctx
            .call(
                "oracle",
                timeout,
                self.oracle.disambiguate(candidate, &offered),
            )
            .await
        {
            Ok(verdict) => verdict,
            Err(err) => {
                let reason = degrade_reason(ctx, "disambiguation", err)?;
                return self
                    .create(ctx, config, candidate, Some(vector), Some(reason))
                    .await;
            }
        };

        debug!(
            name = %candidate.name,
            oracle = self.oracle.name(),
            is_duplicate = verdict.is_duplicate,
            best_match_id = ?verdict.best_match_id,
            confidence = verdict.confidence,
            candidates = offered.len(),
            "Oracle verdict"
        );

        if verdict.is_duplicate && verdict.confidence >= config.merge_threshold {
            match verdict
                .best_match_id
                .and_then(|id| ranked.iter().find(|r| r.root.id == id || r.hit == id))
            {
                Some(chosen) => {
                    let root = self.maintainer.resolve_root(chosen.root.id).await?;
                    let via_alias = (chosen.hit != root.id).then_some(chosen.hit);
                    return Ok(ResolvedEntity {
                        entity: root,
                        outcome: ResolutionOutcome::Matched {
                            confidence: verdict.confidence,
                            via_alias,
                        },
                    });
                }
                None => warn!(
                    name = %candidate.name,
                    best_match_id = ?verdict.best_match_id,
                    "Oracle chose an entity outside the candidate list, creating"
                ),
            }
        }

        self.create(ctx, config, candidate, Some(vector), None).await
    }

    /// Map vector hits above `min_similarity` to their canonical roots,
    /// keeping the best score per root, best first.
    async fn rank_roots(
        &self,
        matches: &[VectorMatch],
        min_similarity: f32,
    ) -> CanonResult<Vec<RankedRoot>> {
        let hits: Vec<&VectorMatch> = matches
            .iter()
            .filter(|m| m.score >= min_similarity)
            .collect();
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<EntityId> = hits.iter().map(|m| m.entity_id).collect();
        let mut known: HashMap<EntityId, Entity> = self
            .entities
            .get_many(&ids)
            .await?
            .into_iter()
            .map(|e| (e.id, e))
            .collect();

        let missing_targets: Vec<EntityId> = known
            .values()
            .filter_map(|e| e.canonical_id)
            .filter(|id| !known.contains_key(id))
            .collect();
        if !missing_targets.is_empty() {
            for entity in self.entities.get_many(&missing_targets).await? {
                known.insert(entity.id, entity);
            }
        }

        let mut best: HashMap<EntityId, RankedRoot> = HashMap::new();
        for hit in hits {
            let Some(entity) = known.get(&hit.entity_id) else {
                debug!(entity_id = hit.entity_id, "Vector hit has no entity, skipping");
                continue;
            };
            let root = match entity.canonical_id.and_then(|t| known.get(&t)) {
                None if entity.is_canonical() => entity.clone(),
                Some(target) if target.is_canonical() => target.clone(),
                _ => self.maintainer.resolve_root(entity.id).await?,
            };

            let better = best.get(&root.id).map_or(true, |r| hit.score > r.score);
            if better {
                best.insert(
                    root.id,
                    RankedRoot {
                        root,
                        hit: hit.entity_id,
                        score: hit.score,
                    },
                );
            }
        }

        let mut ranked: Vec<RankedRoot> = best.into_values().collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.root.id.cmp(&b.root.id)));
        Ok(ranked)
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        config: &ResolutionConfig,
        candidate: &EntityCandidate,
        vector: Option<Vec<f32>>,
        degraded: Option<String>,
    ) -> CanonResult<ResolvedEntity> {
        let mut draft = NewEntity::from(candidate);
        if vector.is_some() {
            draft.vector_id = Some(Uuid::new_v4().to_string());
        }
        let mut entity = self.entities.create(draft).await?;

        if let (Some(vector_id), Some(vector)) = (entity.vector_id.clone(), vector) {
            let entry = VectorEntry {
                vector_id,
                entity_id: entity.id,
                entity_type: entity.entity_type.clone(),
                vector,
            };
            let upsert = ctx
                .call(
                    "vector index",
                    config.collaborator_timeout(),
                    self.index.upsert(entry),
                )
                .await;
            if let Err(err) = upsert {
                warn!(entity_id = entity.id, error = %err, "Failed to index new entity");
                entity.vector_id = None;
                entity = self.entities.update(&entity).await?;
            }
        }

        match &degraded {
            Some(reason) => warn!(
                entity_id = entity.id,
                name = %entity.name,
                reason = %reason,
                "Resolution degraded, created new entity"
            ),
            None => debug!(entity_id = entity.id, name = %entity.name, "Created entity"),
        }

        Ok(ResolvedEntity {
            entity,
            outcome: ResolutionOutcome::Created { degraded },
        })
    }
}

/// Turn a collaborator failure into a degradation reason, or propagate it
/// when the caller is gone or the failure is fatal.
fn degrade_reason(ctx: &OperationContext, stage: &str, err: CanonError) -> CanonResult<String> {
    ctx.check()?;
    if err.is_fatal() {
        return Err(err);
    }
    Ok(format!("{} failed: {}", stage, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryGraphStore;
    use crate::test_support::{OracleMode, StubEmbedder, StubOracle};
    use crate::traits::{Disambiguation, MockVectorIndex, Repository};
    use crate::vector::InMemoryVectorIndex;
    use std::time::Duration;

    struct Fixture {
        store: Arc<InMemoryGraphStore>,
        index: Arc<InMemoryVectorIndex>,
        oracle: Arc<StubOracle>,
        resolver: EntityResolver,
    }

    fn fixture(embedder: StubEmbedder, oracle: StubOracle) -> Fixture {
        let store = Arc::new(InMemoryGraphStore::new());
        let index = Arc::new(InMemoryVectorIndex::new());
        let oracle = Arc::new(oracle);
        let maintainer = CanonicalGraphMaintainer::new(store.clone(), store.clone());
        let resolver = EntityResolver::new(
            store.clone(),
            Arc::new(embedder),
            index.clone(),
            oracle.clone(),
            maintainer,
        );
        Fixture {
            store,
            index,
            oracle,
            resolver,
        }
    }

    fn config() -> ResolutionConfig {
        ResolutionConfig {
            collaborator_timeout_ms: 200,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_first_mention_creates_and_indexes() {
        let f = fixture(StubEmbedder::new(), StubOracle::new(OracleMode::AcceptBest(0.99)));
        let ctx = OperationContext::new();
        let alice = EntityCandidate::new("Alice", "person", "engineer at Acme");

        let resolved = f.resolver.resolve(&ctx, &config(), &alice).await.unwrap();

        assert!(resolved.was_created());
        assert!(!resolved.was_degraded());
        assert!(resolved.entity.vector_id.is_some());
        assert_eq!(f.index.count().await.unwrap(), 1);
        assert_eq!(f.oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_confident_duplicate_returns_original() {
        let f = fixture(StubEmbedder::new(), StubOracle::new(OracleMode::AcceptBest(0.93)));
        let ctx = OperationContext::new();
        let first = f
            .resolver
            .resolve(&ctx, &config(), &EntityCandidate::new("Alice", "person", "engineer at Acme"))
            .await
            .unwrap();

        let again = f
            .resolver
            .resolve(&ctx, &config(), &EntityCandidate::new("Alice S.", "person", "engineer at Acme"))
            .await
            .unwrap();

        assert_eq!(again.id(), first.id());
        assert!(matches!(again.outcome, ResolutionOutcome::Matched { via_alias: None, .. }));
        assert_eq!(f.store.stats().entity_creates, 1);
    }

    #[tokio::test]
    async fn test_low_confidence_creates() {
        let f = fixture(StubEmbedder::new(), StubOracle::new(OracleMode::AcceptBest(0.5)));
        let ctx = OperationContext::new();
        let text = EntityCandidate::new("Alice", "person", "engineer at Acme");

        let first = f.resolver.resolve(&ctx, &config(), &text).await.unwrap();
        let second = f.resolver.resolve(&ctx, &config(), &text).await.unwrap();

        assert_ne!(first.id(), second.id());
        assert_eq!(f.oracle.calls(), 1);
    }

    #[tokio::test]
    async fn test_match_through_alias_returns_root() {
        let f = fixture(StubEmbedder::new(), StubOracle::new(OracleMode::AcceptBest(0.99)));
        let ctx = OperationContext::new();
        let alias = f
            .resolver
            .resolve(&ctx, &config(), &EntityCandidate::new("ACME", "organization", "maker of anvils"))
            .await
            .unwrap();
        let root = Repository::<Entity>::create(
            f.store.as_ref(),
            NewEntity::new("Acme Corporation", "organization"),
        )
        .await
        .unwrap();
        f.store.redirect(alias.id(), root.id).await.unwrap();

        let resolved = f
            .resolver
            .resolve(&ctx, &config(), &EntityCandidate::new("Acme", "organization", "maker of anvils"))
            .await
            .unwrap();

        assert_eq!(resolved.id(), root.id);
        assert!(resolved.entity.is_canonical());
        assert_eq!(
            resolved.outcome,
            ResolutionOutcome::Matched {
                confidence: 0.99,
                via_alias: Some(alias.id())
            }
        );
    }

    #[tokio::test]
    async fn test_oracle_pick_outside_candidates_creates() {
        let f = fixture(
            StubEmbedder::new(),
            StubOracle::new(OracleMode::Fixed(Disambiguation::duplicate_of(4242, 0.99))),
        );
        let ctx = OperationContext::new();
        let text = EntityCandidate::new("Alice", "person", "engineer at Acme");

        let first = f.resolver.resolve(&ctx, &config(), &text).await.unwrap();
        let second = f.resolver.resolve(&ctx, &config(), &text).await.unwrap();

        assert_ne!(first.id(), second.id());
        assert!(!second.was_degraded());
    }

    #[tokio::test]
    async fn test_embedder_failure_degrades() {
        let f = fixture(StubEmbedder::failing(), StubOracle::new(OracleMode::AcceptBest(0.99)));
        let ctx = OperationContext::new();

        let resolved = f
            .resolver
            .resolve(&ctx, &config(), &EntityCandidate::new("Alice", "person", ""))
            .await
            .unwrap();

        assert!(resolved.was_degraded());
        assert!(resolved.entity.vector_id.is_none());
        assert_eq!(f.store.stats().entity_creates, 1);
    }

    #[tokio::test]
    async fn test_oracle_timeout_degrades() {
        let f = fixture(StubEmbedder::new(), StubOracle::new(OracleMode::Hang));
        let ctx = OperationContext::new();
        let text = EntityCandidate::new("Alice", "person", "engineer at Acme");
        f.resolver.resolve(&ctx, &config(), &text).await.unwrap();

        let resolved = f.resolver.resolve(&ctx, &config(), &text).await.unwrap();

        match resolved.outcome {
            ResolutionOutcome::Created { degraded: Some(reason) } => {
                assert!(reason.contains("oracle"), "{reason}")
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancellation_is_not_degraded() {
        let f = fixture(StubEmbedder::new(), StubOracle::new(OracleMode::Hang));
        let ctx = OperationContext::new();
        let text = EntityCandidate::new("Alice", "person", "engineer at Acme");
        f.resolver.resolve(&ctx, &config(), &text).await.unwrap();

        let cancel = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });
        let result = f.resolver.resolve(&ctx, &config(), &text).await;

        assert!(matches!(result, Err(CanonError::Cancelled)));
        assert_eq!(f.store.stats().entity_creates, 1);
    }

    #[tokio::test]
    async fn test_vector_search_failure_degrades() {
        let store = Arc::new(InMemoryGraphStore::new());
        let mut index = MockVectorIndex::new();
        index
            .expect_search()
            .returning(|_, _, _| Err(CanonError::vector_index("index offline")));
        index.expect_upsert().times(1).returning(|_| Ok(()));

        let maintainer = CanonicalGraphMaintainer::new(store.clone(), store.clone());
        let resolver = EntityResolver::new(
            store.clone(),
            Arc::new(StubEmbedder::new()),
            Arc::new(index),
            Arc::new(StubOracle::new(OracleMode::AcceptBest(0.99))),
            maintainer,
        );

        let resolved = resolver
            .resolve(
                &OperationContext::new(),
                &config(),
                &EntityCandidate::new("Alice", "person", ""),
            )
            .await
            .unwrap();

        assert!(resolved.was_degraded());
        assert!(resolved.entity.vector_id.is_some());
    }

    #[tokio::test]
    async fn test_store_unavailable_is_fatal() {
        let f = fixture(StubEmbedder::new(), StubOracle::new(OracleMode::AcceptBest(0.99)));
        f.store.close();

        let err = f
            .resolver
            .resolve(
                &OperationContext::new(),
                &config(),
                &EntityCandidate::new("Alice", "person", ""),
            )
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let f = fixture(StubEmbedder::new(), StubOracle::new(OracleMode::AcceptBest(0.99)));
        let err = f
            .resolver
            .resolve(
                &OperationContext::new(),
                &config(),
                &EntityCandidate::new("  ", "person", ""),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CanonError::Validation { .. }));
    }
}
