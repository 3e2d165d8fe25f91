//! Second-pass relevance scoring of an over-fetched candidate pool

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::domain::{
    DomainError, RetrievedUnit, Strategy, StrategyConfig, StrategyKind, TraceRecorder,
};
use crate::infrastructure::rag::context::{
    StrategyDeps, ask, extract_json, generate_grounded_answer, parse_number, sort_by_score_desc,
    system_prompt_from, vector_search,
};
use crate::infrastructure::text::truncate_chars;

const RERANK_SYSTEM_PROMPT: &str = "You are a relevance grader for a search engine. Rate how \
well the document answers the query on a scale from 0 (unrelated) to 10 (fully answers it). \
Respond with JSON only: {\"score\": <0-10>, \"reason\": \"<short reason>\"}";

#[derive(Debug, Deserialize)]
struct RerankScore {
    score: f32,
}

/// Parses a 0-10 grade from JSON or a bare number and maps it to 0-1
fn parse_rerank_score(reply: &str) -> Option<f32> {
    let raw = extract_json(reply)
        .and_then(|j| serde_json::from_str::<RerankScore>(j).ok())
        .map(|r| r.score)
        .or_else(|| parse_number(reply))?;

    Some((raw / 10.0).clamp(0.0, 1.0))
}

#[derive(Debug)]
pub struct RerankStrategy {
    deps: StrategyDeps,
    system_prompt: String,
    rerank_top_k: usize,
}

impl RerankStrategy {
    pub fn new(deps: StrategyDeps, config: &StrategyConfig) -> Self {
        Self {
            deps,
            system_prompt: system_prompt_from(config),
            rerank_top_k: config.usize_or("rerankTopK", 20),
        }
    }

    async fn score(&self, query: &str, unit: &RetrievedUnit) -> Result<f32, DomainError> {
        let user = format!(
            "Query: {}\n\nDocument:\n{}",
            query,
            truncate_chars(&unit.content, 2000)
        );
        let reply = ask(self.deps.llm.as_ref(), RERANK_SYSTEM_PROMPT, &user, 0.0, 150).await?;

        parse_rerank_score(&reply).ok_or_else(|| {
            DomainError::validation(format!("Unparsable rerank reply: {}", reply))
        })
    }
}

#[async_trait]
impl Strategy for RerankStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Reranker
    }

    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        trace: &TraceRecorder,
    ) -> Result<Vec<RetrievedUnit>, DomainError> {
        let pool = self.rerank_top_k.min(top_k * 3).max(top_k);
        let candidates = vector_search(self.deps.search.as_ref(), query, pool, trace).await?;

        let mut reranked = Vec::with_capacity(candidates.len());
        let mut fallbacks = 0;

        for candidate in candidates {
            let original = candidate.score;
            let score = match self.score(query, &candidate).await {
                Ok(score) => score,
                Err(e) => {
                    warn!("Failed to rerank {}: {}", candidate.id, e);
                    fallbacks += 1;
                    original
                }
            };
            debug!("Reranked {}: {} -> {}", candidate.id, original, score);

            let mut unit = candidate
                .with_metadata("originalScore", original)
                .with_metadata("rerankScore", score);
            unit.score = score;
            reranked.push(unit);
        }

        sort_by_score_desc(&mut reranked);
        reranked.truncate(top_k);

        trace.log_details(
            "rerank",
            format!("Reranked candidate pool of {}", pool),
            json!({ "pool": pool, "fallbacks": fallbacks, "kept": reranked.len() }),
        );

        Ok(reranked)
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
