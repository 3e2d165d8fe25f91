//! Domain layer - strategy contract, data model and service seams

pub mod embedding;
pub mod error;
pub mod llm;
pub mod rag;
pub mod search;

pub use embedding::{EmbeddingService, cosine_similarity};
pub use error::DomainError;
pub use llm::{
    CompletionService, FinishReason, LlmProvider, LlmRequest, LlmRequestBuilder, LlmResponse,
    Message, MessageRole, ProviderCompletionService, Usage,
};
pub use rag::{
    ExecutionFailure, ExecutionTraceEntry, InstrumentedExecutor, MemoArena, NO_INFORMATION_ANSWER,
    ResultSink, RetrievedUnit, Strategy, StrategyConfig, StrategyFactory, StrategyKind,
    StrategyResult, TraceRecorder,
};
pub use search::{Hit, ScopedSearch, SearchBackend};

#[cfg(test)]
pub use rag::MockResultSink;
