//! Entity ↔ document associations and intersection results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::EntityId;

/// A link between an entity and a document it was mentioned in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentAssociation {
    pub entity_id: EntityId,
    pub document_id: String,
    pub created_at: DateTime<Utc>,
}

/// One page of document ids shared by a set of entities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentPage {
    /// Document ids on this page, in ascending order.
    pub items: Vec<String>,
    /// Size of the whole intersection.
    pub total: usize,
    /// 1-based page number.
    pub page: usize,
    pub page_size: usize,
}

impl DocumentPage {
    /// An empty page.
    pub fn empty(page: usize, page_size: usize) -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            page,
            page_size,
        }
    }

    /// Whether another page follows this one.
    pub fn has_more(&self) -> bool {
        self.page.saturating_mul(self.page_size) < self.total
    }
}
