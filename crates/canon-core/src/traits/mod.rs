//! Core traits for canon collaborators and stores.

mod embedder;
mod oracle;
mod store;
mod vector_index;

pub use embedder::*;
pub use oracle::*;
pub use store::*;
pub use vector_index::*;
