//! Contextual compression: keep only the query-relevant part of each hit

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use crate::domain::{
    DomainError, RetrievedUnit, Strategy, StrategyConfig, StrategyKind, TraceRecorder,
};
use crate::infrastructure::rag::context::{
    StrategyDeps, ask, generate_grounded_answer, system_prompt_from, vector_search,
};

const COMPRESSION_SYSTEM_PROMPT: &str = "You compress retrieved passages. Extract only the \
sentences from the passage that help answer the question, removing everything else. If the \
passage is entirely unrelated to the question, reply with the single word IRRELEVANT.";

const IRRELEVANT_MARKER: &str = "IRRELEVANT";

/// Passages shorter than this are kept verbatim
const MIN_COMPRESSIBLE_CHARS: usize = 100;
/// Compressed output shorter than this counts as empty
const MIN_COMPRESSED_CHARS: usize = 20;

#[derive(Debug, PartialEq)]
enum Compression {
    Kept(String),
    Compressed(String),
    Dropped,
}

#[derive(Debug)]
pub struct CompressionStrategy {
    deps: StrategyDeps,
    system_prompt: String,
    compression_top_k: usize,
}

impl CompressionStrategy {
    pub fn new(deps: StrategyDeps, config: &StrategyConfig) -> Self {
        Self {
            deps,
            system_prompt: system_prompt_from(config),
            compression_top_k: config.usize_or("compressionTopK", 10),
        }
    }

    async fn compress(&self, query: &str, content: &str) -> Compression {
        if content.chars().count() < MIN_COMPRESSIBLE_CHARS {
            return Compression::Kept(content.to_string());
        }

        let user = format!("Question: {}\n\nPassage:\n{}", query, content);
        match ask(self.deps.llm.as_ref(), COMPRESSION_SYSTEM_PROMPT, &user, 0.3, 500).await {
            Ok(reply)
                if reply.contains(IRRELEVANT_MARKER)
                    || reply.trim().chars().count() < MIN_COMPRESSED_CHARS =>
            {
                Compression::Dropped
            }
            Ok(reply) => Compression::Compressed(reply.trim().to_string()),
            Err(e) => {
                warn!("Compression failed, keeping original passage: {}", e);
                Compression::Kept(content.to_string())
            }
        }
    }
}

#[async_trait]
impl Strategy for CompressionStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ContextualCompression
    }

    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        trace: &TraceRecorder,
    ) -> Result<Vec<RetrievedUnit>, DomainError> {
        let pool = self.compression_top_k.max(top_k);
        let candidates = vector_search(self.deps.search.as_ref(), query, pool, trace).await?;
        let candidate_count = candidates.len();

        let mut units = Vec::new();
        for candidate in candidates {
            let original_length = candidate.content.chars().count();

            let content = match self.compress(query, &candidate.content).await {
                Compression::Dropped => {
                    debug!("Dropped irrelevant passage {}", candidate.id);
                    continue;
                }
                Compression::Kept(content) | Compression::Compressed(content) => content,
            };

            let compressed_length = content.chars().count();
            let ratio = if original_length == 0 {
                100.0
            } else {
                compressed_length as f64 / original_length as f64 * 100.0
            };

            let mut unit = candidate
                .with_metadata("originalLength", original_length)
                .with_metadata("compressedLength", compressed_length)
                .with_metadata("compressionRatio", (ratio * 100.0).round() / 100.0);
            unit.content = content;
            units.push(unit);

            if units.len() == top_k {
                break;
            }
        }

        trace.log_details(
            "compression",
            format!("Kept {} of {} passages", units.len(), candidate_count),
            json!({ "candidates": candidate_count, "kept": units.len() }),
        );

        Ok(units)
    }

    async fn generate(
        &self,
        query: &str,
        units: &[RetrievedUnit],
        trace: &TraceRecorder,
    ) -> Result<String, DomainError> {
        generate_grounded_answer(self.deps.llm.as_ref(), query, units, &self.system_prompt, trace)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::llm::ScriptedCompletionService;
    use crate::infrastructure::rag::context::testing::{deps, hit};

    fn long(prefix: &str) -> String {
        format!("{} {}", prefix, "filler text ".repeat(12))
    }

    #[tokio::test]
    async fn test_compresses_drops_and_keeps() {
        let (deps, llm) = deps(
            vec![
                hit("d", 0, &long("RAG passage"), 0.9),
                hit("d", 1, &long("cooking passage"), 0.8),
                hit("d", 2, "short note about RAG", 0.7),
                hit("d", 3, &long("broken passage"), 0.6),
            ],
            ScriptedCompletionService::new()
                .on("RAG passage", "RAG retrieves documents before generating.")
                .on("cooking passage", "IRRELEVANT")
                .failing_on("broken passage", "timeout"),
        );
        let strategy = CompressionStrategy::new(deps, &StrategyConfig::new());

        let units = strategy
            .retrieve("what is RAG", 5, &TraceRecorder::new())
            .await
            .unwrap();

        let ids: Vec<&str> = units.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["d_0", "d_2", "d_3"]);
        assert_eq!(units[0].content, "RAG retrieves documents before generating.");
        assert_eq!(units[1].content, "short note about RAG");
        assert!(units[2].content.starts_with("broken passage"));
        // the short note never reaches the model
        assert_eq!(llm.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_too_short_compression_is_dropped() {
        let (deps, _) = deps(
            vec![hit("d", 0, &long("RAG passage"), 0.9)],
            ScriptedCompletionService::new().on("RAG passage", "RAG."),
        );
        let strategy = CompressionStrategy::new(deps, &StrategyConfig::new());

        let units = strategy
            .retrieve("what is RAG", 5, &TraceRecorder::new())
            .await
            .unwrap();

        assert!(units.is_empty());
    }
}
