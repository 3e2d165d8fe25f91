//! Embedding service implementations

mod hashing;
mod openai;

pub use hashing::{DEFAULT_HASHING_DIMENSIONS, HashingEmbeddingService};
pub use openai::{DEFAULT_EMBEDDING_MODEL, OpenAiEmbeddingService};
