//! Embedding service trait and vector helpers

mod service;
mod similarity;

pub use service::EmbeddingService;
pub use similarity::cosine_similarity;

#[cfg(test)]
pub use service::mock::MockEmbeddingService;
