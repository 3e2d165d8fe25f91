//! Search backend implementations

mod in_memory;

pub use in_memory::{ChunkRecord, InMemorySearchBackend};
