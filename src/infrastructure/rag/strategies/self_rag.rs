//! Self-reflective generation: decide whether to retrieve, filter, then grade candidate answers

use std::sync::Mutex;

use async_trait::async_trait;
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::domain::{
    DomainError, NO_INFORMATION_ANSWER, RetrievedUnit, Strategy, StrategyConfig, StrategyKind,
    TraceRecorder,
};
use crate::infrastructure::rag::context::{StrategyDeps, ask, vector_search};
use crate::infrastructure::text::truncate_chars;

const RETRIEVAL_DECISION_PROMPT: &str = "You decide whether a query needs document retrieval. \
Answer \"Yes\" for factual questions, requests for specific information, or questions about \
events, people or concepts. Answer \"No\" for opinions, hypothetical scenarios or simple common \
knowledge. Answer only \"Yes\" or \"No\".";

const RELEVANCE_PROMPT: &str = "You judge whether a document is relevant to a query, meaning it \
contains information that helps answer it. Answer only \"Relevant\" or \"Irrelevant\".";

const SUPPORT_PROMPT: &str = "You check whether an answer is grounded in the given context. \
Answer with exactly one of:\n\
- \"Fully supported\": every statement follows from the context\n\
- \"Partially supported\": some statements are backed by the context\n\
- \"No support\": the answer contains information absent from the context";

const UTILITY_PROMPT: &str = "You rate how useful an answer is for a query, considering accuracy, \
completeness and helpfulness. Use a 1-5 scale where 1 is useless and 5 is extremely useful. \
Answer with a single digit.";

const RESPONSE_PROMPT: &str = "You are a helpful assistant. Give a clear, accurate and \
informative answer to the query.";

/// Characters of a unit shown to the relevance and support graders
const GRADER_PREVIEW_CHARS: usize = 1500;
const MAX_CANDIDATES: usize = 3;
const DEFAULT_UTILITY: u32 = 3;

static UTILITY_DIGIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[1-5]").expect("valid digit pattern"));

/// How well a candidate answer is backed by its source unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportLevel {
    Fully,
    Partially,
    None,
}

impl SupportLevel {
    pub fn parse(reply: &str) -> Self {
        let reply = reply.to_lowercase();
        if reply.contains("fully") {
            Self::Fully
        } else if reply.contains("partially") {
            Self::Partially
        } else {
            Self::None
        }
    }

    pub fn score(&self) -> u32 {
        match self {
            Self::Fully => 3,
            Self::Partially => 1,
            Self::None => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fully => "fully",
            Self::Partially => "partially",
            Self::None => "none",
        }
    }
}

/// Support dominates; utility breaks ties between equally supported answers
pub fn combined_score(support: SupportLevel, utility: u32) -> u32 {
    support.score() * 5 + utility
}

#[derive(Debug, Default)]
struct SelfRagState {
    retrieval_skipped: bool,
    best_score: Option<u32>,
}

#[derive(Debug)]
pub struct SelfRagStrategy {
    deps: StrategyDeps,
    min_support_score: u32,
    state: Mutex<SelfRagState>,
}

impl SelfRagStrategy {
    pub fn new(deps: StrategyDeps, config: &StrategyConfig) -> Self {
        Self {
            deps,
            min_support_score: config.usize_or("minSupportScore", 1) as u32,
            state: Mutex::new(SelfRagState::default()),
        }
    }

    async fn needs_retrieval(&self, query: &str) -> bool {
        let user = format!("Query: {}\n\nDoes this query need document retrieval?", query);
        match ask(self.deps.llm.as_ref(), RETRIEVAL_DECISION_PROMPT, &user, 0.0, 10).await {
            Ok(reply) => reply.to_lowercase().contains("yes"),
            Err(e) => {
                warn!("Retrieval decision failed, retrieving anyway: {}", e);
                true
            }
        }
    }

    async fn is_relevant(&self, query: &str, unit: &RetrievedUnit) -> bool {
        let user = format!(
            "Query: {}\n\nDocument:\n{}\n\nIs the document relevant?",
            query,
            truncate_chars(&unit.content, GRADER_PREVIEW_CHARS)
        );
        match ask(self.deps.llm.as_ref(), RELEVANCE_PROMPT, &user, 0.0, 20).await {
            Ok(reply) => !reply.to_lowercase().contains("irrelevant"),
            Err(e) => {
                warn!("Relevance check failed for {}, keeping it: {}", unit.id, e);
                true
            }
        }
    }

    async fn assess_support(&self, answer: &str, context: &str) -> SupportLevel {
        let user = format!(
            "Context:\n{}\n\nAnswer:\n{}\n\nHow well is the answer supported by the context?",
            truncate_chars(context, GRADER_PREVIEW_CHARS),
            answer
        );
        match ask(self.deps.llm.as_ref(), SUPPORT_PROMPT, &user, 0.0, 50).await {
            Ok(reply) => SupportLevel::parse(&reply),
            Err(e) => {
                warn!("Support assessment failed: {}", e);
                SupportLevel::Partially
            }
        }
    }

    async fn rate_utility(&self, query: &str, answer: &str) -> u32 {
        let user = format!("Query: {}\n\nAnswer:\n{}\n\nUtility rating (1-5):", query, answer);
        match ask(self.deps.llm.as_ref(), UTILITY_PROMPT, &user, 0.0, 10).await {
            Ok(reply) => UTILITY_DIGIT
                .find(&reply)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(DEFAULT_UTILITY),
            Err(e) => {
                warn!("Utility rating failed: {}", e);
                DEFAULT_UTILITY
            }
        }
    }

    async fn respond(&self, query: &str, context: Option<&str>) -> Result<String, DomainError> {
        let user = match context {
            Some(context) => format!(
                "Answer the question using the context below.\n\nContext:\n{}\n\nQuestion: {}",
                context, query
            ),
            None => format!("Question: {}\n\nAnswer as well as you can.", query),
        };
        ask(self.deps.llm.as_ref(), RESPONSE_PROMPT, &user, 0.2, 1000).await
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SelfRagState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Strategy for SelfRagStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SelfRag
    }

    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        trace: &TraceRecorder,
    ) -> Result<Vec<RetrievedUnit>, DomainError> {
        let needed = self.needs_retrieval(query).await;
        self.state().retrieval_skipped = !needed;
        trace.log_details(
            "retrieval_decision",
            format!("Retrieval needed: {}", needed),
            json!({ "retrievalNeeded": needed }),
        );

        if !needed {
            info!("Self-RAG skipping retrieval for this query");
            return Ok(Vec::new());
        }

        let candidates = vector_search(self.deps.search.as_ref(), query, top_k * 2, trace).await?;
        let verdicts = join_all(candidates.iter().map(|c| self.is_relevant(query, c))).await;

        let total = candidates.len();
        let relevant: Vec<RetrievedUnit> = candidates
            .into_iter()
            .zip(verdicts)
            .filter(|(_, relevant)| *relevant)
            .map(|(unit, _)| unit.with_metadata("isRelevant", true))
            .take(top_k)
            .collect();

        trace.log_details(
            "relevance_filter",
            format!("{} of {} candidates judged relevant", relevant.len(), total),
            json!({ "candidates": total, "relevant": relevant.len() }),
        );

        Ok(relevant)
    }

    async fn generate(
        &self,
        query: &str,
        units: &[RetrievedUnit],
        trace: &TraceRecorder,
    ) -> Result<String, DomainError> {
        if units.is_empty() {
            if self.state().retrieval_skipped {
                trace.log("direct_answer", "Answering without retrieval");
                return self.respond(query, None).await;
            }
            trace.log("no_context", "No relevant units; returning fixed answer");
            return Ok(NO_INFORMATION_ANSWER.to_string());
        }

        let mut best: Option<(u32, String)> = None;

        for (i, unit) in units.iter().take(MAX_CANDIDATES).enumerate() {
            let answer = match self.respond(query, Some(&unit.content)).await {
                Ok(answer) => answer,
                Err(e) => {
                    warn!("Candidate {} generation failed: {}", i + 1, e);
                    continue;
                }
            };

            let support = self.assess_support(&answer, &unit.content).await;
            let utility = self.rate_utility(query, &answer).await;
            let score = combined_score(support, utility);

            debug!(
                "Candidate {}: support={} utility={} score={}",
                i + 1,
                support.as_str(),
                utility,
                score
            );
            trace.log_details(
                "candidate_evaluation",
                format!("Candidate {} scored {}", i + 1, score),
                json!({
                    "unitId": unit.id,
                    "support": support.as_str(),
                    "utility": utility,
                    "score": score,
                }),
            );

            if best.as_ref().is_none_or(|(s, _)| score > *s) {
                best = Some((score, answer));
            }
        }

        self.state().best_score = best.as_ref().map(|(s, _)| *s);

        match best {
            Some((score, answer)) if score >= self.min_support_score => {
                info!("Self-RAG selected candidate with score {}", score);
                Ok(answer)
            }
            other => {
                warn!(
                    "Best candidate score {:?} below floor {}; answering without context",
                    other.map(|(s, _)| s),
                    self.min_support_score
                );
                trace.log("direct_answer", "All candidates below support floor");
                self.respond(query, None).await
            }
        }
    }

    fn aux_metadata(&self) -> Map<String, Value> {
        let state = self.state();
        let mut aux = Map::new();
        aux.insert("retrievalSkipped".into(), Value::from(state.retrieval_skipped));
        if let Some(score) = state.best_score {
            aux.insert("bestCandidateScore".into(), Value::from(score));
        }
        aux
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::rag::context::testing::{deps, hit};
    use crate::domain::llm::ScriptedCompletionService;

    const DECIDE: &str = "needs document retrieval";
    const RELEVANCE: &str = "Is the document relevant?";
    const SUPPORT: &str = "grounded in the given context";
    const UTILITY: &str = "Utility rating";
    const WITH_CONTEXT: &str = "using the context below";
    const NO_CONTEXT: &str = "Answer as well as you can";

    fn hits() -> Vec<crate::domain::Hit> {
        vec![
            hit("d", 0, "RAG retrieves documents", 0.9),
            hit("d", 1, "weather report", 0.8),
            hit("d", 2, "RAG then generates", 0.7),
        ]
    }

    #[test]
    fn test_support_parsing_and_score() {
        assert_eq!(SupportLevel::parse("Fully supported"), SupportLevel::Fully);
        assert_eq!(SupportLevel::parse("Partially supported"), SupportLevel::Partially);
        assert_eq!(SupportLevel::parse("No support"), SupportLevel::None);
        assert_eq!(combined_score(SupportLevel::Fully, 4), 19);
        assert_eq!(combined_score(SupportLevel::None, 3), 3);
    }

    #[tokio::test]
    async fn test_filters_irrelevant_units() {
        let (deps, _) = deps(
            hits(),
            ScriptedCompletionService::new()
                .on(DECIDE, "Yes")
                .on("weather report", "Irrelevant")
                .on(RELEVANCE, "Relevant"),
        );
        let strategy = SelfRagStrategy::new(deps, &StrategyConfig::new());

        let units = strategy.retrieve("what is RAG", 5, &TraceRecorder::new()).await.unwrap();

        let ids: Vec<&str> = units.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["d_0", "d_2"]);
    }

    #[tokio::test]
    async fn test_skipped_retrieval_answers_directly() {
        let (deps, llm) = deps(
            hits(),
            ScriptedCompletionService::new()
                .on(DECIDE, "No")
                .on(NO_CONTEXT, "direct answer"),
        );
        let strategy = SelfRagStrategy::new(deps, &StrategyConfig::new());
        let trace = TraceRecorder::new();

        let units = strategy.retrieve("tell me a joke", 5, &trace).await.unwrap();
        let answer = strategy.generate("tell me a joke", &units, &trace).await.unwrap();

        assert!(units.is_empty());
        assert_eq!(answer, "direct answer");
        assert_eq!(llm.calls_matching(RELEVANCE), 0);
        assert_eq!(strategy.aux_metadata()["retrievalSkipped"], true);
    }

    #[tokio::test]
    async fn test_picks_best_supported_candidate() {
        let (deps, _) = deps(
            vec![],
            ScriptedCompletionService::new()
                .on_sequence(WITH_CONTEXT, vec!["first".into(), "second".into()])
                .on("Answer:\nfirst\n\nHow well", "No support")
                .on("Answer:\nsecond\n\nHow well", "Fully supported")
                .on(UTILITY, "4"),
        );
        let strategy = SelfRagStrategy::new(deps, &StrategyConfig::new());
        let units = vec![
            RetrievedUnit::new("a", "context a", 0.9),
            RetrievedUnit::new("b", "context b", 0.8),
        ];

        let answer = strategy.generate("q", &units, &TraceRecorder::new()).await.unwrap();

        assert_eq!(answer, "second");
        assert_eq!(strategy.aux_metadata()["bestCandidateScore"], 19);
    }

    #[tokio::test]
    async fn test_scores_below_floor_fall_back_to_no_context_answer() {
        let (deps, llm) = deps(
            vec![],
            ScriptedCompletionService::new()
                .on(WITH_CONTEXT, "candidate")
                .on(SUPPORT, "No support")
                .on(UTILITY, "2")
                .on(NO_CONTEXT, "fallback answer"),
        );
        let config = StrategyConfig::new().with("minSupportScore", 10);
        let strategy = SelfRagStrategy::new(deps, &config);
        let units = vec![
            RetrievedUnit::new("a", "context a", 0.9),
            RetrievedUnit::new("b", "context b", 0.8),
        ];

        let answer = strategy.generate("q", &units, &TraceRecorder::new()).await.unwrap();

        assert_eq!(answer, "fallback answer");
        assert_eq!(llm.calls_matching(NO_CONTEXT), 1);
    }

    #[tokio::test]
    async fn test_empty_relevant_set_returns_fixed_answer() {
        let (deps, _) = deps(
            hits(),
            ScriptedCompletionService::new()
                .on(DECIDE, "Yes")
                .on(RELEVANCE, "Irrelevant"),
        );
        let strategy = SelfRagStrategy::new(deps, &StrategyConfig::new());
        let trace = TraceRecorder::new();

        let units = strategy.retrieve("q", 5, &trace).await.unwrap();
        let answer = strategy.generate("q", &units, &trace).await.unwrap();

        assert_eq!(answer, NO_INFORMATION_ANSWER);
    }
}
