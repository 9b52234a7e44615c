//! Canonical graph maintenance.
//!
//! Every entity is either canonical (`canonical_id` is null) or an alias
//! pointing directly at a canonical entity. Merges always redirect root to
//! root and re-point the old root's aliases in the same store transaction,
//! so chains never grow past one hop and no cycle can form.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::context::OperationContext;
use crate::error::{CanonError, CanonResult};
use crate::traits::{EntityStore, RelationStore};
use crate::types::{normalize_name, Entity, EntityFilter, EntityId, RewriteReport};

/// Longest redirect chain `resolve_root` will follow before declaring a cycle.
pub const MAX_REDIRECT_HOPS: usize = 32;

/// What a merge did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    /// Root of the group that was folded in.
    pub alias_root: EntityId,
    /// Root that survives.
    pub root: EntityId,
    /// False when both sides already shared a root.
    pub changed: bool,
    /// Aliases of `alias_root` re-pointed at `root`.
    pub repointed: Vec<EntityId>,
    pub relations: RewriteReport,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairReport {
    pub aliases_checked: usize,
    pub chains_flattened: usize,
    /// Aliases whose target no longer exists, turned back into roots.
    pub dangling_cleared: usize,
    pub relations: RewriteReport,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealReport {
    pub groups: usize,
    pub merged: Vec<MergeOutcome>,
}

impl HealReport {
    pub fn entities_merged(&self) -> usize {
        self.merged.iter().filter(|m| m.changed).count()
    }
}

/// Performs merges and keeps redirect chains flat.
#[derive(Clone)]
pub struct CanonicalGraphMaintainer {
    entities: Arc<dyn EntityStore>,
    relations: Arc<dyn RelationStore>,
}

impl CanonicalGraphMaintainer {
    pub fn new(entities: Arc<dyn EntityStore>, relations: Arc<dyn RelationStore>) -> Self {
        Self {
            entities,
            relations,
        }
    }

    async fn fetch(&self, id: EntityId) -> CanonResult<Entity> {
        self.entities
            .get(id)
            .await?
            .ok_or_else(|| CanonError::entity_not_found(id))
    }

    /// The canonical entity for `id`.
    ///
    /// Follows `canonical_id` and flattens any chain longer than one hop it
    /// walks through. A cycle or a chain past [`MAX_REDIRECT_HOPS`] is an
    /// internal error.
    pub async fn resolve_root(&self, id: EntityId) -> CanonResult<Entity> {
        let mut current = self.fetch(id).await?;
        let mut path = vec![current.id];

        while let Some(next) = current.canonical_id {
            if path.contains(&next) || path.len() > MAX_REDIRECT_HOPS {
                return Err(CanonError::internal(format!(
                    "redirect cycle through entities {:?}",
                    path
                )));
            }
            let from = current.id;
            current = self.entities.get(next).await?.ok_or_else(|| {
                CanonError::internal(format!("entity {} redirects to missing {}", from, next))
            })?;
            path.push(current.id);
        }

        if path.len() > 2 {
            debug!(root = current.id, chain = ?path, "Flattening redirect chain");
            for &hop in &path[..path.len() - 2] {
                self.entities.redirect(hop, current.id).await?;
            }
        }
        Ok(current)
    }

    /// Merge `alias_id`'s group into `canonical_id`'s group.
    pub async fn merge(
        &self,
        alias_id: EntityId,
        canonical_id: EntityId,
    ) -> CanonResult<MergeOutcome> {
        if alias_id == canonical_id {
            return Err(CanonError::validation(format!(
                "cannot merge entity {} into itself",
                alias_id
            )));
        }
        let alias = self.fetch(alias_id).await?;
        let canonical = self.fetch(canonical_id).await?;

        let alias_root = self.resolve_root(alias.id).await?;
        let root = self.resolve_root(canonical.id).await?;

        if alias_root.id == root.id {
            // Already merged. Re-run the rewrite in case an earlier merge
            // stopped between redirect and rewrite.
            let mut relations = RewriteReport::default();
            for id in [alias.id, canonical.id] {
                if id != root.id {
                    let rewrite = self.relations.rewrite_references(id, root.id).await?;
                    relations = relations.combine(rewrite);
                }
            }
            debug!(alias_id, canonical_id, root = root.id, "Merge is a no-op, same root");
            return Ok(MergeOutcome {
                alias_root: alias_root.id,
                root: root.id,
                changed: false,
                repointed: Vec::new(),
                relations,
            });
        }

        let redirect = self.entities.redirect(alias_root.id, root.id).await?;

        let mut relations = self
            .relations
            .rewrite_references(alias_root.id, root.id)
            .await?;
        for &id in &redirect.repointed {
            let rewrite = self.relations.rewrite_references(id, root.id).await?;
            relations = relations.combine(rewrite);
        }

        info!(
            alias_id,
            canonical_id,
            alias_root = alias_root.id,
            root = root.id,
            repointed = redirect.repointed.len(),
            rewritten = relations.rewritten,
            dropped = relations.dropped_duplicates,
            "Merged entities"
        );

        Ok(MergeOutcome {
            alias_root: alias_root.id,
            root: root.id,
            changed: true,
            repointed: redirect.repointed,
            relations,
        })
    }

    /// The root of `id` followed by every alias of that root.
    pub async fn canonical_group(&self, id: EntityId) -> CanonResult<Vec<EntityId>> {
        let root = self.resolve_root(id).await?;
        let mut group = vec![root.id];
        let aliases = self.entities.aliases_of(root.id).await?;
        group.extend(aliases.into_iter().map(|e| e.id));
        Ok(group)
    }

    /// Restore the canonical invariants after an interrupted merge.
    pub async fn repair(&self, ctx: &OperationContext) -> CanonResult<RepairReport> {
        ctx.check()?;
        let mut report = RepairReport::default();

        for alias in self.entities.list(&EntityFilter::aliases()).await? {
            ctx.check()?;
            report.aliases_checked += 1;

            let Some(target_id) = alias.canonical_id else {
                continue;
            };
            let root_id = match self.entities.get(target_id).await? {
                None => {
                    warn!(
                        alias = alias.id,
                        target = target_id,
                        "Alias points at a missing entity, clearing"
                    );
                    let mut cleared = alias.clone();
                    cleared.canonical_id = None;
                    self.entities.update(&cleared).await?;
                    report.dangling_cleared += 1;
                    continue;
                }
                Some(target) if target.is_canonical() => target.id,
                Some(_) => {
                    report.chains_flattened += 1;
                    self.resolve_root(alias.id).await?.id
                }
            };

            if self.relations.count_touching(alias.id).await? > 0 {
                let rewrite = self.relations.rewrite_references(alias.id, root_id).await?;
                report.relations = report.relations.combine(rewrite);
            }
        }

        info!(
            aliases = report.aliases_checked,
            flattened = report.chains_flattened,
            dangling = report.dangling_cleared,
            rewritten = report.relations.rewritten,
            "Repair finished"
        );
        Ok(report)
    }

    /// Merge canonical entities sharing a normalized name and type into the
    /// oldest member of each group.
    pub async fn heal_duplicates(
        &self,
        ctx: &OperationContext,
        entity_type: Option<&str>,
    ) -> CanonResult<HealReport> {
        ctx.check()?;
        let mut filter = EntityFilter::canonical();
        if let Some(entity_type) = entity_type {
            filter = filter.of_type(entity_type);
        }

        let mut groups: BTreeMap<(String, String), Vec<Entity>> = BTreeMap::new();
        for entity in self.entities.list(&filter).await? {
            groups
                .entry((normalize_name(&entity.name), entity.entity_type.clone()))
                .or_default()
                .push(entity);
        }

        let mut report = HealReport::default();
        for ((name, entity_type), mut members) in groups {
            if members.len() < 2 {
                continue;
            }
            report.groups += 1;
            members.sort_by_key(|e| (e.created_at, e.id));
            let keeper = members[0].id;
            debug!(%name, %entity_type, keeper, size = members.len(), "Healing duplicate group");

            for duplicate in &members[1..] {
                ctx.check()?;
                report.merged.push(self.merge(duplicate.id, keeper).await?);
            }
        }

        info!(groups = report.groups, merged = report.entities_merged(), "Heal finished");
        Ok(report)
    }
}
