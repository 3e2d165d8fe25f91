//! Retrieval policy implementations, one module per strategy

mod adaptive;
mod chunk_headers;
mod chunk_size;
mod compression;
mod context_enriched;
mod crag;
mod doc_augmentation;
mod fusion;
mod graph;
mod hierarchical;
mod hyde;
mod proposition;
mod query_transform;
mod rerank;
mod segment;
mod self_rag;
mod simple;

pub use adaptive::{AdaptiveStrategy, QueryCategory};
pub use chunk_headers::ChunkHeadersStrategy;
pub use chunk_size::{ChunkGroup, ChunkSizeStrategy, EvaluationMethod, evaluate_grouping, group_chunks};
pub use compression::CompressionStrategy;
pub use context_enriched::ContextEnrichedStrategy;
pub use crag::{CragAction, CragStrategy};
pub use doc_augmentation::DocAugmentationStrategy;
pub use fusion::{FusedScore, FusionStrategy, fuse_scores, min_max_normalize};
pub use graph::{EdgeWeights, GraphEdge, GraphNode, GraphStrategy, KnowledgeGraph, Visit, traverse};
pub use hierarchical::HierarchicalStrategy;
pub use hyde::HydeStrategy;
pub use proposition::{PropositionStrategy, overlap_score};
pub use query_transform::{QueryTransformStrategy, TransformationType};
pub use rerank::RerankStrategy;
pub use segment::{SegmentLimits, SegmentStrategy, find_best_segments};
pub use self_rag::{SelfRagStrategy, SupportLevel, combined_score};
pub use simple::SimpleStrategy;
