//! Two-level retrieval: rank group summaries first, then chunks inside the best groups

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::domain::{
    DomainError, Hit, MemoArena, RetrievedUnit, Strategy, StrategyConfig, StrategyKind,
    TraceRecorder, cosine_similarity,
};
use crate::infrastructure::rag::context::{
    DEFAULT_CORPUS_LIMIT, StrategyDeps, ask, generate_grounded_answer, load_corpus,
    sort_by_score_desc, system_prompt_from,
};
use crate::infrastructure::text::truncate_chars;

const SUMMARY_SYSTEM_PROMPT: &str = "You are a document summarisation system. Write a concise \
but complete summary of the text that captures the main content and key information, stays \
coherent and adds nothing that is not in the source.";

const SUMMARY_INPUT_CHARS: usize = 4000;
const SUMMARY_FALLBACK_CHARS: usize = 200;
const LEAF_DISCOUNT: f32 = 0.9;

#[derive(Debug, Clone)]
struct SummaryGroup {
    summary: String,
    members: Vec<Hit>,
}

#[derive(Debug)]
pub struct HierarchicalStrategy {
    deps: StrategyDeps,
    system_prompt: String,
    group_size: usize,
    k_summaries: usize,
    k_chunks_per_summary: usize,
    corpus_limit: usize,
    summaries: MemoArena<String, String>,
}

impl HierarchicalStrategy {
    pub fn new(deps: StrategyDeps, config: &StrategyConfig) -> Self {
        Self {
            deps,
            system_prompt: system_prompt_from(config),
            group_size: config.usize_or("summaryGroupSize", 5).max(1),
            k_summaries: config.usize_or("kSummaries", 3).max(1),
            k_chunks_per_summary: config.usize_or("kChunksPerSummary", 3).max(1),
            corpus_limit: config.usize_or("corpusLimit", DEFAULT_CORPUS_LIMIT),
            summaries: MemoArena::new(),
        }
    }

    async fn summarize(&self, members: &[Hit]) -> String {
        let key = members
            .iter()
            .map(|h| h.id.as_str())
            .collect::<Vec<_>>()
            .join("|");
        if let Some(cached) = self.summaries.get(&key) {
            return cached;
        }

        let combined = members
            .iter()
            .map(|h| h.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let user = format!(
            "Summarise the following text:\n\n{}",
            truncate_chars(&combined, SUMMARY_INPUT_CHARS)
        );

        match ask(self.deps.llm.as_ref(), SUMMARY_SYSTEM_PROMPT, &user, 0.3, 500).await {
            Ok(summary) => {
                self.summaries.insert(key, summary.clone());
                summary
            }
            Err(e) => {
                warn!("Group summary failed, using leading text: {}", e);
                format!("{}...", truncate_chars(&combined, SUMMARY_FALLBACK_CHARS))
            }
        }
    }

    async fn build_groups(&self, corpus: Vec<Hit>) -> Vec<SummaryGroup> {
        let mut groups = Vec::with_capacity(corpus.len().div_ceil(self.group_size));
        for members in corpus.chunks(self.group_size) {
            groups.push(SummaryGroup {
                summary: self.summarize(members).await,
                members: members.to_vec(),
            });
        }
        groups
    }
}

#[async_trait]
impl Strategy for HierarchicalStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Hierarchical
    }

    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        trace: &TraceRecorder,
    ) -> Result<Vec<RetrievedUnit>, DomainError> {
        let corpus = load_corpus(self.deps.search.as_ref(), self.corpus_limit).await?;
        if corpus.is_empty() {
            warn!("Corpus is empty; no summary index to build");
            return Ok(Vec::new());
        }

        let groups = self.build_groups(corpus).await;
        trace.log_details(
            "summary_build",
            format!("Built {} summary groups", groups.len()),
            json!({ "groups": groups.len(), "groupSize": self.group_size }),
        );

        let query_vector = self.deps.embedder.embed_one(query).await?;
        let summary_texts: Vec<String> = groups.iter().map(|g| g.summary.clone()).collect();
        let summary_vectors = self.deps.embedder.embed(&summary_texts).await?;

        let mut ranked: Vec<(usize, f32)> = summary_vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine_similarity(&query_vector, v)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(self.k_summaries);

        trace.log_details(
            "summary_retrieve",
            format!("Selected {} summaries", ranked.len()),
            json!({ "summaryScores": ranked.iter().map(|(_, s)| *s).collect::<Vec<_>>() }),
        );

        let mut units = Vec::new();
        for (rank, (group_idx, summary_score)) in ranked.iter().enumerate() {
            let group = &groups[*group_idx];
            let texts: Vec<String> = group.members.iter().map(|h| h.content.clone()).collect();
            let vectors = self.deps.embedder.embed(&texts).await?;

            let mut members: Vec<(&Hit, f32)> = group
                .members
                .iter()
                .zip(vectors.iter())
                .map(|(hit, v)| (hit, cosine_similarity(&query_vector, v)))
                .collect();
            members.sort_by(|a, b| b.1.total_cmp(&a.1));

            for (hit, similarity) in members.into_iter().take(self.k_chunks_per_summary) {
                debug!("Leaf {} under summary {} sim {:.3}", hit.id, rank + 1, similarity);
                units.push(
                    RetrievedUnit::from(hit.clone().with_score(summary_score * LEAF_DISCOUNT))
                        .with_metadata("summary", group.summary.clone())
                        .with_metadata("summaryRank", rank + 1)
                        .with_metadata("chunkSimilarity", similarity),
                );
            }
        }

        sort_by_score_desc(&mut units);
        units.truncate(top_k);
        info!("Hierarchical retrieval returned {} units", units.len());

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
    use crate::infrastructure::embedding::HashingEmbeddingService;
    use crate::infrastructure::rag::context::testing::{deps, hit};

    const SUMMARISE: &str = "Summarise the following text";

    fn corpus() -> Vec<Hit> {
        vec![
            hit("a", 0, "apples are sweet fruit", 0.1),
            hit("a", 1, "pears are fruit too", 0.1),
            hit("b", 0, "rust compiler checks borrows", 0.1),
            hit("b", 1, "rust compiler emits machine code", 0.1),
        ]
    }

    #[tokio::test]
    async fn test_descends_into_best_summary() {
        let (deps, _) = deps(
            corpus(),
            ScriptedCompletionService::new()
                .on("apples are sweet", "fruit orchard harvest")
                .on("rust compiler checks", "rust compiler internals"),
        );
        let config = StrategyConfig::new()
            .with("summaryGroupSize", 2)
            .with("kSummaries", 1);
        let strategy = HierarchicalStrategy::new(deps, &config);

        let units = strategy
            .retrieve("rust compiler", 5, &TraceRecorder::new())
            .await
            .unwrap();

        assert_eq!(units.len(), 2);
        assert!(units.iter().all(|u| u.doc_id() == Some("b")));
        assert_eq!(units[0].metadata("summary"), Some(&json!("rust compiler internals")));

        // leaves inherit the discounted summary score, not their own similarity
        let embedder = HashingEmbeddingService::default();
        let summary_score = cosine_similarity(
            &embedder.embed_text("rust compiler"),
            &embedder.embed_text("rust compiler internals"),
        );
        for unit in &units {
            assert!((unit.score - summary_score * LEAF_DISCOUNT).abs() < 1e-6);
            let similarity = unit.metadata_f32("chunkSimilarity").unwrap();
            assert!((unit.score - similarity).abs() > 1e-6);
        }
        assert_eq!(units[0].score, units[1].score);
    }

    #[tokio::test]
    async fn test_summaries_are_cached_by_members() {
        let (deps, llm) = deps(
            corpus(),
            ScriptedCompletionService::new().on(SUMMARISE, "summary"),
        );
        let config = StrategyConfig::new().with("summaryGroupSize", 2);
        let strategy = HierarchicalStrategy::new(deps, &config);

        strategy.retrieve("q", 2, &TraceRecorder::new()).await.unwrap();
        strategy.retrieve("q", 2, &TraceRecorder::new()).await.unwrap();

        assert_eq!(llm.calls_matching(SUMMARISE), 2);
    }

    #[tokio::test]
    async fn test_summary_failure_uses_leading_text() {
        let (deps, _) = deps(
            vec![hit("a", 0, "short text", 0.1)],
            ScriptedCompletionService::new().failing_on(SUMMARISE, "down"),
        );
        let strategy = HierarchicalStrategy::new(deps, &StrategyConfig::new());

        let units = strategy.retrieve("q", 1, &TraceRecorder::new()).await.unwrap();

        assert_eq!(
            units[0].metadata("summary"),
            Some(&json!("short text..."))
        );
    }
}
