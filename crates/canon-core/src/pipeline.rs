//! Batch ingestion of extraction output.
//!
//! A batch is resolved in three steps: every distinct normalized mention is
//! resolved once, the resolved entities are linked to the batch's document,
//! and relation endpoints are mapped through the batch's mention table
//! before the relations are written. Resolutions and relation writes run
//! concurrently under a per-batch semaphore. Items already committed stay
//! committed when a later item fails.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::CanonConfig;
use crate::context::OperationContext;
use crate::error::{CanonError, CanonResult};
use crate::resolver::EntityResolver;
use crate::traits::{DocumentStore, RelationStore};
use crate::types::{
    normalize_name, BatchItem, BatchReport, EntityCandidate, EntityId, ExtractionBatch,
    ItemFailure, NewRelation, RelationWrite, ResolvedEntity, ResolvedMention, SkipReason,
    SkippedRelation,
};

/// Drives an [`ExtractionBatch`] through resolution and relation writes.
#[derive(Clone)]
pub struct PipelineCoordinator {
    resolver: EntityResolver,
    relations: Arc<dyn RelationStore>,
    documents: Arc<dyn DocumentStore>,
}

impl PipelineCoordinator {
    pub fn new(
        resolver: EntityResolver,
        relations: Arc<dyn RelationStore>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            resolver,
            relations,
            documents,
        }
    }

    /// Ingest one batch.
    ///
    /// Returns `Err` only when the whole batch must stop: the store is
    /// unavailable, the caller cancelled, or the batch deadline passed.
    /// Every other problem is reported per item in the [`BatchReport`].
    pub async fn ingest(
        &self,
        ctx: &OperationContext,
        config: &CanonConfig,
        batch: ExtractionBatch,
    ) -> CanonResult<BatchReport> {
        let mut batch_ctx = ctx.child();
        if let Some(timeout) = config.pipeline.batch_timeout() {
            batch_ctx = batch_ctx.with_timeout(timeout);
        }
        batch_ctx.check()?;

        let semaphore = Arc::new(Semaphore::new(config.pipeline.max_concurrency.max(1)));
        let mut report = BatchReport::default();

        let mentions = self
            .resolve_mentions(&batch_ctx, config, &semaphore, &batch.entities, &mut report)
            .await?;

        if let Some(document_id) = batch.document_id.as_deref() {
            self.link_document(&batch_ctx, &mentions, document_id, &mut report)
                .await?;
        }

        self.write_relations(&batch_ctx, &semaphore, &batch, &mentions, &mut report)
            .await?;

        info!(
            document_id = ?batch.document_id,
            mentions = report.resolved.len(),
            created = report.entities_created(),
            relations = report.relations_created.len(),
            duplicates = report.relations_duplicate,
            skipped = report.skipped.len(),
            failures = report.failures.len(),
            "Ingested batch"
        );
        Ok(report)
    }

    async fn resolve_mentions(
        &self,
        ctx: &OperationContext,
        config: &CanonConfig,
        semaphore: &Arc<Semaphore>,
        candidates: &[EntityCandidate],
        report: &mut BatchReport,
    ) -> CanonResult<HashMap<String, EntityId>> {
        let mut unique: Vec<(String, &EntityCandidate)> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for candidate in candidates {
            let key = normalize_name(&candidate.name);
            if !seen.insert(key.clone()) {
                debug!(name = %candidate.name, "Reusing earlier mention in batch");
                continue;
            }
            unique.push((key, candidate));
        }

        let resolutions = unique.iter().map(|(_, candidate)| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| CanonError::internal("batch semaphore closed"))?;
                let result = self
                    .resolver
                    .resolve(ctx, &config.resolution, candidate)
                    .await;
                if matches!(&result, Err(err) if err.is_fatal()) {
                    ctx.cancel();
                }
                result
            }
        });
        let results: Vec<CanonResult<ResolvedEntity>> = join_all(resolutions).await;

        abort_on_fatal(ctx, results.iter().filter_map(|r| r.as_ref().err()))?;

        let mut mentions = HashMap::new();
        for ((key, candidate), result) in unique.into_iter().zip(results) {
            match result {
                Ok(resolved) => {
                    mentions.insert(key.clone(), resolved.id());
                    report.resolved.push(ResolvedMention {
                        name: key,
                        entity_id: resolved.id(),
                        outcome: resolved.outcome,
                    });
                }
                Err(err) => {
                    warn!(name = %candidate.name, error = %err, "Failed to resolve mention");
                    report.failures.push(failure(
                        BatchItem::Entity {
                            name: candidate.name.clone(),
                        },
                        &err,
                    ));
                }
            }
        }
        Ok(mentions)
    }

    async fn link_document(
        &self,
        ctx: &OperationContext,
        mentions: &HashMap<String, EntityId>,
        document_id: &str,
        report: &mut BatchReport,
    ) -> CanonResult<()> {
        let mut ids: Vec<EntityId> = mentions.values().copied().collect();
        ids.sort_unstable();
        ids.dedup();

        for entity_id in ids {
            ctx.check()?;
            match self.documents.associate(entity_id, document_id).await {
                Ok(true) => report.documents_linked += 1,
                Ok(false) => {}
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(entity_id, document_id, error = %err, "Failed to link document");
                    report.failures.push(failure(
                        BatchItem::Document {
                            entity_id,
                            document_id: document_id.to_string(),
                        },
                        &err,
                    ));
                }
            }
        }
        Ok(())
    }

    async fn write_relations(
        &self,
        ctx: &OperationContext,
        semaphore: &Arc<Semaphore>,
        batch: &ExtractionBatch,
        mentions: &HashMap<String, EntityId>,
        report: &mut BatchReport,
    ) -> CanonResult<()> {
        let mut pending = Vec::new();
        for candidate in &batch.relations {
            let predicate = candidate.predicate.trim();
            if predicate.is_empty() {
                warn!(
                    subject = %candidate.subject,
                    object = %candidate.object,
                    "Skipping relation with empty predicate"
                );
                report.skipped.push(SkippedRelation {
                    candidate: candidate.clone(),
                    reason: SkipReason::EmptyPredicate,
                });
                continue;
            }

            let subject = mentions.get(&normalize_name(&candidate.subject));
            let object = mentions.get(&normalize_name(&candidate.object));
            match (subject, object) {
                (Some(&subject_id), Some(&object_id)) => {
                    let draft = NewRelation::new(subject_id, predicate, object_id)
                        .with_metadata(candidate.metadata.clone());
                    pending.push((candidate, draft));
                }
                _ => {
                    let name = if subject.is_none() {
                        &candidate.subject
                    } else {
                        &candidate.object
                    };
                    warn!(
                        subject = %candidate.subject,
                        predicate,
                        object = %candidate.object,
                        unresolved = %name,
                        "Skipping relation with unresolved endpoint"
                    );
                    report.skipped.push(SkippedRelation {
                        candidate: candidate.clone(),
                        reason: SkipReason::UnresolvedEndpoint { name: name.clone() },
                    });
                }
            }
        }

        let writes = pending.iter().map(|(_, draft)| {
            let semaphore = semaphore.clone();
            let draft = draft.clone();
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| CanonError::internal("batch semaphore closed"))?;
                let result = ctx.run(self.relations.insert(draft)).await;
                if matches!(&result, Err(err) if err.is_fatal()) {
                    ctx.cancel();
                }
                result
            }
        });
        let results: Vec<CanonResult<RelationWrite>> = join_all(writes).await;

        abort_on_fatal(ctx, results.iter().filter_map(|r| r.as_ref().err()))?;

        for ((candidate, _), result) in pending.into_iter().zip(results) {
            match result {
                Ok(RelationWrite::Created(relation)) => {
                    report.relations_created.push(relation.id)
                }
                Ok(RelationWrite::Duplicate { .. }) => report.relations_duplicate += 1,
                Err(err) if err.is_integrity_conflict() => report.relations_duplicate += 1,
                Err(err) => {
                    warn!(
                        subject = %candidate.subject,
                        predicate = %candidate.predicate,
                        object = %candidate.object,
                        error = %err,
                        "Failed to write relation"
                    );
                    report.failures.push(failure(
                        BatchItem::Relation {
                            subject: candidate.subject.clone(),
                            predicate: candidate.predicate.clone(),
                            object: candidate.object.clone(),
                        },
                        &err,
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Stop the batch when any error is fatal or the batch context ended.
///
/// A store outage is reported in preference to the cancellations it caused
/// in sibling tasks.
fn abort_on_fatal<'a>(
    ctx: &OperationContext,
    errors: impl Iterator<Item = &'a CanonError>,
) -> CanonResult<()> {
    let mut cancelled = false;
    for err in errors {
        match err {
            CanonError::StoreUnavailable { message, .. } => {
                return Err(CanonError::store_unavailable(message.clone()))
            }
            CanonError::Cancelled => cancelled = true,
            _ => {}
        }
    }
    if cancelled {
        return Err(CanonError::Cancelled);
    }
    ctx.check()
}

fn failure(item: BatchItem, err: &CanonError) -> ItemFailure {
    ItemFailure {
        item,
        code: err.code().as_str().to_string(),
        message: err.to_string(),
    }
}
