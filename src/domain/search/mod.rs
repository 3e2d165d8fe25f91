//! Similarity-search seam consumed by the retrieval strategies

mod backend;
mod hit;

pub use backend::{ScopedSearch, SearchBackend};
pub use hit::Hit;

#[cfg(test)]
pub use backend::mock::StaticSearchBackend;
