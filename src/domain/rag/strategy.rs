use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{RetrievedUnit, StrategyConfig, TraceRecorder};
use crate::domain::DomainError;

/// Closed set of retrieval strategies the engine can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Simple,
    Fusion,
    Reranker,
    Hyde,
    ContextualCompression,
    QueryTransformation,
    Adaptive,
    Crag,
    SelfRag,
    ContextEnriched,
    ContextualChunkHeaders,
    Hierarchical,
    Graph,
    Rse,
    ChunkSizeSelector,
    PropositionChunking,
    DocAugmentation,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 17] = [
        Self::Simple,
        Self::Fusion,
        Self::Reranker,
        Self::Hyde,
        Self::ContextualCompression,
        Self::QueryTransformation,
        Self::Adaptive,
        Self::Crag,
        Self::SelfRag,
        Self::ContextEnriched,
        Self::ContextualChunkHeaders,
        Self::Hierarchical,
        Self::Graph,
        Self::Rse,
        Self::ChunkSizeSelector,
        Self::PropositionChunking,
        Self::DocAugmentation,
    ];

    /// Canonical identifier
    pub fn id(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Fusion => "fusion",
            Self::Reranker => "reranker",
            Self::Hyde => "hyde",
            Self::ContextualCompression => "contextual_compression",
            Self::QueryTransformation => "query_transformation",
            Self::Adaptive => "adaptive",
            Self::Crag => "crag",
            Self::SelfRag => "self_rag",
            Self::ContextEnriched => "context_enriched",
            Self::ContextualChunkHeaders => "contextual_chunk_headers",
            Self::Hierarchical => "hierarchical",
            Self::Graph => "graph",
            Self::Rse => "rse",
            Self::ChunkSizeSelector => "chunk_size_selector",
            Self::PropositionChunking => "proposition_chunking",
            Self::DocAugmentation => "doc_augmentation",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Simple => "Simple RAG",
            Self::Fusion => "Fusion RAG (vector + BM25)",
            Self::Reranker => "Reranker RAG",
            Self::Hyde => "HyDE RAG",
            Self::ContextualCompression => "Contextual Compression RAG",
            Self::QueryTransformation => "Query Transformation RAG",
            Self::Adaptive => "Adaptive RAG",
            Self::Crag => "Corrective RAG",
            Self::SelfRag => "Self-RAG",
            Self::ContextEnriched => "Context-Enriched RAG",
            Self::ContextualChunkHeaders => "Contextual Chunk Headers RAG",
            Self::Hierarchical => "Hierarchical RAG",
            Self::Graph => "Graph RAG",
            Self::Rse => "Relevant Segment Extraction",
            Self::ChunkSizeSelector => "Chunk Size Selector RAG",
            Self::PropositionChunking => "Proposition Chunking RAG",
            Self::DocAugmentation => "Document Augmentation RAG",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for StrategyKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        let name = normalized.strip_suffix("_rag").unwrap_or(&normalized);

        let kind = match name {
            "simple" => Self::Simple,
            "fusion" => Self::Fusion,
            "reranker" | "rerank" => Self::Reranker,
            "hyde" => Self::Hyde,
            "contextual_compression" | "compression" => Self::ContextualCompression,
            "query_transformation" | "query_transform" => Self::QueryTransformation,
            "adaptive" => Self::Adaptive,
            "crag" => Self::Crag,
            "self" | "self_rag" => Self::SelfRag,
            "context_enriched" => Self::ContextEnriched,
            "contextual_chunk_headers" | "chunk_headers" => Self::ContextualChunkHeaders,
            "hierarchical" => Self::Hierarchical,
            "graph" => Self::Graph,
            "rse" => Self::Rse,
            "chunk_size_selector" => Self::ChunkSizeSelector,
            "proposition_chunking" | "proposition" => Self::PropositionChunking,
            "doc_augmentation" => Self::DocAugmentation,
            _ => {
                return Err(DomainError::validation(format!(
                    "Unknown strategy identifier '{}'",
                    s
                )));
            }
        };

        Ok(kind)
    }
}

/// A retrieve-then-generate algorithm.
///
/// Instances are created per query and may keep per-query state (caches,
/// decisions made during `retrieve` that `generate` needs).
#[async_trait]
pub trait Strategy: Send + Sync + fmt::Debug {
    fn kind(&self) -> StrategyKind;

    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        trace: &TraceRecorder,
    ) -> Result<Vec<RetrievedUnit>, DomainError>;

    async fn generate(
        &self,
        query: &str,
        units: &[RetrievedUnit],
        trace: &TraceRecorder,
    ) -> Result<String, DomainError>;

    /// Strategy-specific facts worth keeping with the result
    fn aux_metadata(&self) -> Map<String, Value> {
        Map::new()
    }
}

/// Builds a fresh strategy instance for one query
pub trait StrategyFactory: Send + Sync + fmt::Debug {
    /// `scope` restricts every search the instance makes to one document
    fn create(
        &self,
        kind: StrategyKind,
        config: &StrategyConfig,
        scope: Option<&str>,
    ) -> Result<Box<dyn Strategy>, DomainError>;
}
