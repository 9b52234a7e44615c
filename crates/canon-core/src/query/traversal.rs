//! Bounded breadth-first neighbor expansion.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::canonical::CanonicalGraphMaintainer;
use crate::config::{MAX_TRAVERSAL_DEPTH, MAX_TRAVERSAL_ENTITIES};
use crate::context::OperationContext;
use crate::error::{CanonError, CanonResult};
use crate::traits::{EntityStore, RelationStore};
use crate::types::{
    EntityId, GraphEdge, GraphNode, NeighborQuery, RelationId, Subgraph, TraversalMetadata,
};

/// Expands the neighborhood of a canonical entity level by level, with one
/// relation fetch per level and a hard cap on admitted nodes.
#[derive(Clone)]
pub struct GraphTraversal {
    entities: Arc<dyn EntityStore>,
    relations: Arc<dyn RelationStore>,
    maintainer: CanonicalGraphMaintainer,
}

impl GraphTraversal {
    pub fn new(
        entities: Arc<dyn EntityStore>,
        relations: Arc<dyn RelationStore>,
        maintainer: CanonicalGraphMaintainer,
    ) -> Self {
        Self {
            entities,
            relations,
            maintainer,
        }
    }

    pub async fn get_neighbors(
        &self,
        ctx: &OperationContext,
        query: &NeighborQuery,
    ) -> CanonResult<Subgraph> {
        if query.depth > MAX_TRAVERSAL_DEPTH {
            return Err(CanonError::out_of_range("depth", query.depth, "0..=5"));
        }
        if query.max_entities == 0 || query.max_entities > MAX_TRAVERSAL_ENTITIES {
            return Err(CanonError::out_of_range(
                "max_entities",
                query.max_entities,
                "1..=500",
            ));
        }
        ctx.check()?;

        let root = self.maintainer.resolve_root(query.root_id).await?;
        let predicates = query.predicates.as_deref().filter(|p| !p.is_empty());

        let mut depth_of: HashMap<EntityId, u8> = HashMap::from([(root.id, 0)]);
        let mut admitted = vec![root.id];
        let mut edges: BTreeMap<RelationId, GraphEdge> = BTreeMap::new();
        let mut truncated = false;
        let mut frontier = vec![root.id];

        if query.depth > 0 {
            for level in 0..=query.depth {
                if frontier.is_empty() {
                    break;
                }
                ctx.check()?;

                let relations = self
                    .relations
                    .relations_touching(&frontier, predicates)
                    .await?;
                let mut next = Vec::new();

                for relation in &relations {
                    let subject_seen = depth_of.contains_key(&relation.subject_id);
                    let object_seen = depth_of.contains_key(&relation.object_id);
                    if subject_seen && object_seen {
                        edges
                            .entry(relation.id)
                            .or_insert_with(|| GraphEdge::from(relation));
                        continue;
                    }
                    if level == query.depth {
                        continue;
                    }
                    if depth_of.len() >= query.max_entities {
                        truncated = true;
                        continue;
                    }

                    let other = if subject_seen {
                        relation.object_id
                    } else {
                        relation.subject_id
                    };
                    depth_of.insert(other, level + 1);
                    admitted.push(other);
                    next.push(other);
                    edges.insert(relation.id, GraphEdge::from(relation));
                }

                debug!(
                    root = root.id,
                    level,
                    fetched = relations.len(),
                    admitted = next.len(),
                    "Expanded traversal level"
                );
                frontier = next;
            }
        }

        let entities = self.entities.get_many(&admitted).await?;
        let mut nodes: Vec<GraphNode> = entities
            .iter()
            .filter_map(|e| {
                depth_of
                    .get(&e.id)
                    .map(|depth| GraphNode::from_entity(e, *depth, e.id == root.id))
            })
            .collect();
        nodes.sort_by_key(|n| (n.depth, n.id));

        let present: HashSet<EntityId> = nodes.iter().map(|n| n.id).collect();
        let edges: Vec<GraphEdge> = edges
            .into_values()
            .filter(|e| present.contains(&e.subject_id) && present.contains(&e.object_id))
            .collect();

        let metadata = TraversalMetadata {
            nodes_visited: nodes.len(),
            depth_reached: nodes.iter().map(|n| n.depth).max().unwrap_or(0),
            requested_depth: query.depth,
            max_entities: query.max_entities,
            truncated,
        };

        Ok(Subgraph {
            nodes,
            edges,
            metadata,
        })
    }
}
