//! Core types for canon.

mod batch;
mod document;
mod entity;
mod graph;
mod relation;

pub use batch::*;
pub use document::*;
pub use entity::*;
pub use graph::*;
pub use relation::*;

/// A record kind managed by a [`Repository`](crate::traits::Repository).
///
/// Ties a stored record to its id type and to the draft type used to
/// create it.
pub trait Record: Clone + Send + Sync + 'static {
    /// Store-assigned identifier.
    type Id: Copy + Eq + std::hash::Hash + std::fmt::Debug + std::fmt::Display + Send + Sync + 'static;
    /// Fields supplied by the caller on create.
    type Draft: Clone + Send + Sync + 'static;

    /// The record's id.
    fn id(&self) -> Self::Id;
}

/// Normalize an entity name for batch-local matching.
///
/// Trims, collapses inner whitespace and lowercases, so "Acme  Corp" and
/// " acme corp" are the same mention.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
