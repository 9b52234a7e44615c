//! Reference store implementations.

mod memory;

pub use memory::{InMemoryGraphStore, StoreStats};
