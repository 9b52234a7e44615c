//! Bounded neighbor-expansion results.

use serde::{Deserialize, Serialize};

use super::entity::{Entity, EntityId};
use super::relation::{Relation, RelationId};

/// A node in a traversal result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: EntityId,
    pub name: String,
    pub entity_type: String,
    /// BFS depth at which the node was discovered.
    pub depth: u8,
    /// Whether this is the traversal root.
    pub is_center: bool,
}

impl GraphNode {
    pub(crate) fn from_entity(entity: &Entity, depth: u8, is_center: bool) -> Self {
        Self {
            id: entity.id,
            name: entity.name.clone(),
            entity_type: entity.entity_type.clone(),
            depth,
            is_center,
        }
    }
}

/// An edge in a traversal result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: RelationId,
    pub subject_id: EntityId,
    pub predicate: String,
    pub object_id: EntityId,
}

impl From<&Relation> for GraphEdge {
    fn from(relation: &Relation) -> Self {
        Self {
            id: relation.id,
            subject_id: relation.subject_id,
            predicate: relation.predicate.clone(),
            object_id: relation.object_id,
        }
    }
}

/// Traversal bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraversalMetadata {
    pub nodes_visited: usize,
    /// Deepest level that produced at least one node.
    pub depth_reached: u8,
    pub requested_depth: u8,
    pub max_entities: usize,
    /// The node cap was hit before the requested depth was exhausted.
    pub truncated: bool,
}

/// Nodes and edges around a root entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subgraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub metadata: TraversalMetadata,
}

impl Subgraph {
    /// The center node.
    pub fn center(&self) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.is_center)
    }

    /// Whether a node with the given id is present.
    pub fn contains_node(&self, id: EntityId) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }
}

/// Parameters for a neighbor expansion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborQuery {
    pub root_id: EntityId,
    pub depth: u8,
    /// Only follow relations with one of these predicates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicates: Option<Vec<String>>,
    pub max_entities: usize,
}

impl NeighborQuery {
    /// Create a query with an explicit depth and node cap.
    pub fn new(root_id: EntityId, depth: u8, max_entities: usize) -> Self {
        Self {
            root_id,
            depth,
            predicates: None,
            max_entities,
        }
    }

    /// Restrict expansion to the given predicates.
    pub fn with_predicates<I, S>(mut self, predicates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.predicates = Some(predicates.into_iter().map(Into::into).collect());
        self
    }
}
