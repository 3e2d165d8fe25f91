//! Corrective retrieval: grade candidates, then keep, refine or re-query

use std::sync::Mutex;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::domain::{
    DomainError, RetrievedUnit, Strategy, StrategyConfig, StrategyKind, TraceRecorder,
};
use crate::infrastructure::rag::context::{
    StrategyDeps, ask, generate_grounded_answer, parse_number, sort_by_score_desc,
    system_prompt_from, vector_search,
};
use crate::infrastructure::text::truncate_chars;

const JUDGE_SYSTEM_PROMPT: &str = "You are a document relevance assessor. Rate how relevant the \
document is to the query with a number between 0 and 1:\n\
- 0-0.3: unrelated or nearly unrelated\n\
- 0.4-0.7: partially relevant, contains some useful information\n\
- 0.8-1.0: highly relevant, directly answers the query\n\
Return only the number.";

const REFINE_SYSTEM_PROMPT: &str = "Extract the key facts from the text as a concise bullet \
list. Focus on the most relevant and important facts and details. Start each item with •.";

const REWRITE_SYSTEM_PROMPT: &str = "You are a query rewriting expert. Rewrite the query into a \
form better suited for search: use keywords and factual phrasing, remove filler words, keep the \
meaning, make it concise. Return only the rewritten query.";

/// Characters of each candidate shown to the grader
const JUDGE_PREVIEW_CHARS: usize = 600;

/// Branch taken after grading the first candidate pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CragAction {
    KeepHigh,
    RewriteAndRetry,
    Refine,
}

impl CragAction {
    /// `max > high` keeps, `max < low` rewrites, anything in between refines
    pub fn decide(max_relevance: f32, high_threshold: f32, low_threshold: f32) -> Self {
        if max_relevance > high_threshold {
            Self::KeepHigh
        } else if max_relevance < low_threshold {
            Self::RewriteAndRetry
        } else {
            Self::Refine
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeepHigh => "keep_high",
            Self::RewriteAndRetry => "rewrite_and_retry",
            Self::Refine => "refine",
        }
    }
}

#[derive(Debug, Default)]
struct CragState {
    action: Option<CragAction>,
    max_relevance: Option<f32>,
    rewritten_query: Option<String>,
}

#[derive(Debug)]
pub struct CragStrategy {
    deps: StrategyDeps,
    system_prompt: String,
    high_threshold: f32,
    low_threshold: f32,
    state: Mutex<CragState>,
}

impl CragStrategy {
    pub fn new(deps: StrategyDeps, config: &StrategyConfig) -> Self {
        Self {
            deps,
            system_prompt: system_prompt_from(config),
            high_threshold: config.f32_or("highThreshold", 0.7),
            low_threshold: config.f32_or("lowThreshold", 0.4),
            state: Mutex::new(CragState::default()),
        }
    }

    /// Grades one candidate; unparsable or failed grades fall back to the similarity score
    async fn judge(&self, query: &str, unit: &RetrievedUnit) -> f32 {
        let user = format!(
            "Query: {}\n\nDocument:\n{}\n\nRelevance (0-1):",
            query,
            truncate_chars(&unit.content, JUDGE_PREVIEW_CHARS)
        );

        match ask(self.deps.llm.as_ref(), JUDGE_SYSTEM_PROMPT, &user, 0.0, 10).await {
            Ok(reply) => match parse_number(&reply) {
                Some(score) => score.clamp(0.0, 1.0),
                None => {
                    warn!("Unparsable relevance grade for {}: {}", unit.id, reply);
                    unit.score
                }
            },
            Err(e) => {
                warn!("Relevance grading failed for {}: {}", unit.id, e);
                unit.score
            }
        }
    }

    /// Grades every candidate; the returned units carry the grade as their score
    async fn grade(&self, query: &str, candidates: Vec<RetrievedUnit>) -> Vec<RetrievedUnit> {
        let grades = join_all(candidates.iter().map(|c| self.judge(query, c))).await;

        candidates
            .into_iter()
            .zip(grades)
            .map(|(candidate, relevance)| {
                debug!("Candidate {} relevance {}", candidate.id, relevance);
                let original = candidate.score;
                let mut unit = candidate
                    .with_metadata("originalScore", original)
                    .with_metadata("relevanceScore", relevance)
                    .with_metadata("refined", false);
                unit.score = relevance;
                unit
            })
            .collect()
    }

    async fn rewrite(&self, query: &str) -> String {
        let user = format!("Original query: {}\n\nRewritten query:", query);
        match ask(self.deps.llm.as_ref(), REWRITE_SYSTEM_PROMPT, &user, 0.3, 100).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => query.to_string(),
            Err(e) => {
                warn!("Query rewrite failed, retrying with original query: {}", e);
                query.to_string()
            }
        }
    }

    async fn refine(&self, content: &str) -> Option<String> {
        let user = format!("Text to refine:\n\n{}", content);
        match ask(self.deps.llm.as_ref(), REFINE_SYSTEM_PROMPT, &user, 0.3, 500).await {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                warn!("Knowledge refinement failed, keeping original text: {}", e);
                None
            }
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, CragState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Strategy for CragStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Crag
    }

    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        trace: &TraceRecorder,
    ) -> Result<Vec<RetrievedUnit>, DomainError> {
        let candidates = vector_search(self.deps.search.as_ref(), query, top_k * 2, trace).await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let graded = self.grade(query, candidates).await;
        let max_relevance = graded
            .iter()
            .map(|u| u.score)
            .fold(f32::NEG_INFINITY, f32::max);
        let action = CragAction::decide(max_relevance, self.high_threshold, self.low_threshold);

        info!("CRAG max relevance {:.2} -> {}", max_relevance, action.as_str());
        trace.log_details(
            "relevance_evaluation",
            format!("Graded {} candidates, max relevance {:.2}", graded.len(), max_relevance),
            json!({
                "candidates": graded.len(),
                "maxRelevance": max_relevance,
                "action": action.as_str(),
            }),
        );

        {
            let mut state = self.state();
            state.action = Some(action);
            state.max_relevance = Some(max_relevance);
        }

        let units = match action {
            CragAction::KeepHigh => graded
                .into_iter()
                .filter(|u| u.score > self.high_threshold)
                .take(top_k)
                .collect(),
            CragAction::RewriteAndRetry => {
                let rewritten = self.rewrite(query).await;
                trace.log_details(
                    "query_rewrite",
                    "Low relevance; retrying with rewritten query",
                    json!({ "rewrittenQuery": rewritten }),
                );
                self.state().rewritten_query = Some(rewritten.clone());

                let retry =
                    vector_search(self.deps.search.as_ref(), &rewritten, top_k * 2, trace).await?;
                let mut pool = if retry.is_empty() {
                    graded
                } else {
                    self.grade(&rewritten, retry).await
                };
                sort_by_score_desc(&mut pool);
                pool.truncate(top_k);
                pool
            }
            CragAction::Refine => {
                let mut pool = graded;
                sort_by_score_desc(&mut pool);
                pool.truncate(top_k);

                for unit in &mut pool {
                    if let Some(refined) = self.refine(&unit.content).await {
                        unit.content = refined;
                        unit.set_metadata("refined", true);
                    }
                }
                trace.log("knowledge_refinement", format!("Refined {} units", pool.len()));
                pool
            }
        };

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

    fn aux_metadata(&self) -> Map<String, Value> {
        let state = self.state();
        let mut aux = Map::new();
        if let Some(action) = state.action {
            aux.insert("cragAction".into(), Value::from(action.as_str()));
        }
        if let Some(max) = state.max_relevance {
            aux.insert("maxRelevance".into(), Value::from(max));
        }
        if let Some(ref rewritten) = state.rewritten_query {
            aux.insert("rewrittenQuery".into(), Value::from(rewritten.clone()));
        }
        aux
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::llm::ScriptedCompletionService;
    use crate::domain::search::StaticSearchBackend;
    use crate::infrastructure::embedding::HashingEmbeddingService;
    use crate::infrastructure::rag::context::testing::hit;
    use std::sync::Arc;

    const JUDGE: &str = "document relevance assessor";
    const REWRITE: &str = "query rewriting expert";
    const REFINE: &str = "Extract the key facts";

    fn strategy(
        llm: ScriptedCompletionService,
        hits: usize,
    ) -> (CragStrategy, Arc<StaticSearchBackend>, Arc<ScriptedCompletionService>) {
        let search = Arc::new(StaticSearchBackend::new(
            (0..hits)
                .map(|i| hit("d", i, &format!("passage {}", i), 0.9 - i as f32 * 0.05))
                .collect(),
        ));
        let llm = Arc::new(llm);
        let deps = StrategyDeps::new(
            search.clone(),
            llm.clone(),
            Arc::new(HashingEmbeddingService::default()),
        );
        (CragStrategy::new(deps, &StrategyConfig::new()), search, llm)
    }

    #[test]
    fn test_decide_is_pure_function_of_max() {
        for max in [0.71, 0.8, 1.0] {
            assert_eq!(CragAction::decide(max, 0.7, 0.4), CragAction::KeepHigh);
        }
        for max in [0.0, 0.2, 0.39] {
            assert_eq!(CragAction::decide(max, 0.7, 0.4), CragAction::RewriteAndRetry);
        }
        for max in [0.4, 0.55, 0.7] {
            assert_eq!(CragAction::decide(max, 0.7, 0.4), CragAction::Refine);
        }
    }

    #[tokio::test]
    async fn test_high_relevance_keeps_candidates() {
        let (strategy, search, llm) = strategy(
            ScriptedCompletionService::new().on_sequence(
                JUDGE,
                vec!["0.9".into(), "0.5".into(), "0.95".into(), "0.1".into()],
            ),
            4,
        );

        let units = strategy.retrieve("q", 2, &TraceRecorder::new()).await.unwrap();

        let ids: Vec<&str> = units.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["d_0", "d_2"]);
        assert_eq!(llm.calls_matching(REWRITE), 0);
        assert_eq!(llm.calls_matching(REFINE), 0);
        assert_eq!(search.queries().len(), 1);
        assert_eq!(strategy.aux_metadata()["cragAction"], "keep_high");
        assert_eq!(units[0].metadata_f32("relevanceScore"), Some(0.9));
    }

    #[tokio::test]
    async fn test_low_relevance_rewrites_exactly_once() {
        let (strategy, search, llm) = strategy(
            ScriptedCompletionService::new()
                .on(JUDGE, "0.2")
                .on(REWRITE, "RAG definition retrieval generation"),
            4,
        );

        let units = strategy.retrieve("q", 2, &TraceRecorder::new()).await.unwrap();

        assert_eq!(llm.calls_matching(REWRITE), 1);
        assert_eq!(search.queries().len(), 2);
        assert_eq!(search.queries()[1].0, "RAG definition retrieval generation");
        assert_eq!(units.len(), 2);
        assert_eq!(strategy.aux_metadata()["cragAction"], "rewrite_and_retry");
    }

    #[tokio::test]
    async fn test_ambiguous_relevance_refines_top_k() {
        let (strategy, _, llm) = strategy(
            ScriptedCompletionService::new()
                .on(JUDGE, "0.5")
                .on(REFINE, "• refined fact"),
            6,
        );

        let units = strategy.retrieve("q", 3, &TraceRecorder::new()).await.unwrap();

        assert_eq!(units.len(), 3);
        assert_eq!(llm.calls_matching(REFINE), 3);
        assert_eq!(llm.calls_matching(REWRITE), 0);
        assert!(units.iter().all(|u| u.content == "• refined fact"));
        assert!(units.iter().all(|u| u.metadata("refined") == Some(&json!(true))));
    }

    #[tokio::test]
    async fn test_failed_grades_use_similarity_score() {
        let (strategy, _, llm) = strategy(ScriptedCompletionService::new().failing_on(JUDGE, "down"), 2);

        let units = strategy.retrieve("q", 1, &TraceRecorder::new()).await.unwrap();

        // similarity 0.9 > 0.7 keeps the first hit without refinement
        assert_eq!(units.len(), 1);
        assert!((units[0].score - 0.9).abs() < 1e-6);
        assert_eq!(llm.calls().iter().filter(|c| c.temperature == 0.0).count(), 2);
    }

    #[tokio::test]
    async fn test_empty_retry_falls_back_to_first_pass() {
        let search = Arc::new(
            StaticSearchBackend::new(vec![
                hit("d", 0, "passage 0", 0.1),
                hit("d", 1, "passage 1", 0.3),
                hit("d", 2, "passage 2", 0.2),
            ])
            .only_for("q"),
        );
        let llm = Arc::new(
            ScriptedCompletionService::new()
                .failing_on(JUDGE, "down")
                .on(REWRITE, "keywords nobody indexed"),
        );
        let deps = StrategyDeps::new(
            search.clone(),
            llm.clone(),
            Arc::new(HashingEmbeddingService::default()),
        );
        let strategy = CragStrategy::new(deps, &StrategyConfig::new());

        let units = strategy.retrieve("q", 2, &TraceRecorder::new()).await.unwrap();

        assert_eq!(search.queries().len(), 2);
        assert_eq!(search.queries()[1].0, "keywords nobody indexed");
        // judging is down, so the first-pass similarity scores carry over
        let ranked: Vec<(&str, f32)> = units.iter().map(|u| (u.id.as_str(), u.score)).collect();
        assert_eq!(ranked, vec![("d_1", 0.3), ("d_2", 0.2)]);
        assert_eq!(strategy.aux_metadata()["cragAction"], "rewrite_and_retry");
        assert_eq!(llm.calls_matching(REWRITE), 1);
    }
}
