//! Documents shared by several entities.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::canonical::CanonicalGraphMaintainer;
use crate::config::IntersectionConfig;
use crate::context::OperationContext;
use crate::error::{CanonError, CanonResult};
use crate::traits::DocumentStore;
use crate::types::{DocumentPage, EntityId};

/// Intersects the document sets of entities, read through each entity's
/// canonical group.
#[derive(Clone)]
pub struct IntersectionQuery {
    documents: Arc<dyn DocumentStore>,
    maintainer: CanonicalGraphMaintainer,
}

impl IntersectionQuery {
    pub fn new(documents: Arc<dyn DocumentStore>, maintainer: CanonicalGraphMaintainer) -> Self {
        Self {
            documents,
            maintainer,
        }
    }

    /// One page of the documents every entity in `entity_ids` appears in.
    ///
    /// `page` is 1-based. Fewer than two distinct ids yields an empty page
    /// whatever the paging arguments; so does an unknown id.
    pub async fn get_common_documents(
        &self,
        ctx: &OperationContext,
        config: &IntersectionConfig,
        entity_ids: &[EntityId],
        page: usize,
        page_size: usize,
    ) -> CanonResult<DocumentPage> {
        let distinct: BTreeSet<EntityId> = entity_ids.iter().copied().collect();
        if distinct.len() < 2 {
            return Ok(DocumentPage::empty(page, page_size));
        }

        if page == 0 {
            return Err(CanonError::out_of_range("page", page, ">= 1"));
        }
        if page_size == 0 || page_size > config.max_page_size {
            return Err(CanonError::out_of_range(
                "page_size",
                page_size,
                &format!("1..={}", config.max_page_size),
            ));
        }
        ctx.check()?;

        let mut common: Option<BTreeSet<String>> = None;
        for &id in &distinct {
            let group = match self.maintainer.canonical_group(id).await {
                Ok(group) => group,
                Err(CanonError::NotFound { .. }) => {
                    debug!(entity_id = id, "Unknown entity in intersection");
                    return Ok(DocumentPage::empty(page, page_size));
                }
                Err(err) => return Err(err),
            };
            let documents: BTreeSet<String> =
                self.documents.documents_for(&group).await?.into_iter().collect();

            let running = match common.take() {
                None => documents,
                Some(running) => {
                    let (small, large) = if running.len() <= documents.len() {
                        (running, documents)
                    } else {
                        (documents, running)
                    };
                    small.into_iter().filter(|d| large.contains(d)).collect()
                }
            };
            if running.is_empty() {
                debug!(entity_id = id, "Intersection emptied, stopping early");
                return Ok(DocumentPage::empty(page, page_size));
            }
            common = Some(running);
            ctx.check()?;
        }
        let common = common.unwrap_or_default();

        let total = common.len();
        let items: Vec<String> = common
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .collect();

        Ok(DocumentPage {
            items,
            total,
            page,
            page_size,
        })
    }
}
