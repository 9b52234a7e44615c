//! Read-only graph queries.

mod intersection;
mod traversal;

pub use intersection::IntersectionQuery;
pub use traversal::GraphTraversal;
