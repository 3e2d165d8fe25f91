//! Dependencies and helpers shared by the strategy implementations

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use tracing::debug;

use crate::domain::{
    CompletionService, DomainError, EmbeddingService, Hit, Message, NO_INFORMATION_ANSWER,
    RetrievedUnit, ScopedSearch, SearchBackend, StrategyConfig, TraceRecorder,
};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a knowledgeable assistant. Answer the question \
using only the reference documents provided. If the documents do not contain the answer, say so \
plainly instead of guessing.";

pub const ANSWER_TEMPERATURE: f32 = 0.7;
pub const ANSWER_MAX_TOKENS: u32 = 2000;

/// Maximum number of chunks loaded by strategies that walk the whole corpus
pub const DEFAULT_CORPUS_LIMIT: usize = 100;
const CORPUS_PROBE_QUERY: &str = "document content";

static NUMBER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("valid number pattern"));

static LIST_MARKER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:\d+[.)、:]|[-*•])\s*").expect("valid list pattern"));

/// Services a strategy instance talks to
#[derive(Debug, Clone)]
pub struct StrategyDeps {
    pub search: Arc<dyn SearchBackend>,
    pub llm: Arc<dyn CompletionService>,
    pub embedder: Arc<dyn EmbeddingService>,
}

impl StrategyDeps {
    pub fn new(
        search: Arc<dyn SearchBackend>,
        llm: Arc<dyn CompletionService>,
        embedder: Arc<dyn EmbeddingService>,
    ) -> Self {
        Self {
            search,
            llm,
            embedder,
        }
    }

    /// Same services with every search restricted to `scope`
    pub fn scoped(&self, scope: Option<&str>) -> Self {
        Self {
            search: Arc::new(ScopedSearch::new(
                self.search.clone(),
                scope.map(str::to_string),
            )),
            llm: self.llm.clone(),
            embedder: self.embedder.clone(),
        }
    }
}

/// System prompt for grounded answers, overridable with `systemPrompt`
pub fn system_prompt_from(config: &StrategyConfig) -> String {
    config
        .optional_string("systemPrompt")
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
}

/// One system + user exchange
pub async fn ask(
    llm: &dyn CompletionService,
    system: &str,
    user: &str,
    temperature: f32,
    max_tokens: u32,
) -> Result<String, DomainError> {
    llm.complete(
        vec![Message::system(system), Message::user(user)],
        temperature,
        max_tokens,
    )
    .await
}

/// Plain vector search converted to units
pub async fn vector_search(
    search: &dyn SearchBackend,
    query: &str,
    top_k: usize,
    trace: &TraceRecorder,
) -> Result<Vec<RetrievedUnit>, DomainError> {
    let hits = search.search(query, top_k, None).await?;

    trace.log_details(
        "vector_search",
        format!("Vector search returned {} hits", hits.len()),
        json!({ "requested": top_k, "returned": hits.len() }),
    );

    Ok(hits.into_iter().map(RetrievedUnit::from).collect())
}

/// Loads up to `limit` chunks of the scoped corpus ordered by `(doc_id, index)`
pub async fn load_corpus(search: &dyn SearchBackend, limit: usize) -> Result<Vec<Hit>, DomainError> {
    let mut hits = search.search(CORPUS_PROBE_QUERY, limit, None).await?;
    hits.sort_by(|a, b| a.doc_id.cmp(&b.doc_id).then(a.index.cmp(&b.index)));

    debug!("Loaded corpus of {} chunks", hits.len());
    Ok(hits)
}

/// Numbered `[Document i]` blocks fed to the answering model
pub fn build_context(units: &[RetrievedUnit]) -> String {
    units
        .iter()
        .enumerate()
        .map(|(i, unit)| match unit.source_name() {
            Some(source) => format!("[Document {}] (source: {})\n{}", i + 1, source, unit.content),
            None => format!("[Document {}]\n{}", i + 1, unit.content),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Answers from the given units, or the fixed no-information answer when there are none
pub async fn generate_grounded_answer(
    llm: &dyn CompletionService,
    query: &str,
    units: &[RetrievedUnit],
    system_prompt: &str,
    trace: &TraceRecorder,
) -> Result<String, DomainError> {
    if units.is_empty() {
        trace.log("no_context", "No units retrieved; returning fixed answer");
        return Ok(NO_INFORMATION_ANSWER.to_string());
    }

    let user = format!(
        "Reference documents:\n\n{}\n\nQuestion: {}\n\nAnswer the question based on the reference documents above.",
        build_context(units),
        query
    );

    let answer = ask(llm, system_prompt, &user, ANSWER_TEMPERATURE, ANSWER_MAX_TOKENS).await?;

    trace.log_details(
        "llm_generate",
        format!("Generated answer from {} units", units.len()),
        json!({ "contextUnits": units.len() }),
    );

    Ok(answer)
}

/// First number in a model reply
pub fn parse_number(text: &str) -> Option<f32> {
    NUMBER_PATTERN
        .find(text)
        .and_then(|m| m.as_str().parse::<f32>().ok())
}

/// Outermost `{...}` span of a reply
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

/// Non-empty lines with list markers stripped, at most `max` items
pub fn parse_list(text: &str, max: usize) -> Vec<String> {
    text.lines()
        .map(|line| LIST_MARKER_PATTERN.replace(line, "").trim().to_string())
        .filter(|line| !line.is_empty())
        .take(max)
        .collect()
}

pub fn sort_by_score_desc(units: &mut [RetrievedUnit]) {
    units.sort_by(|a, b| b.score.total_cmp(&a.score));
}

/// Keeps one unit per id, the one with the highest score, in first-seen order
pub fn dedup_keep_max(units: Vec<RetrievedUnit>) -> Vec<RetrievedUnit> {
    let mut kept: Vec<RetrievedUnit> = Vec::with_capacity(units.len());

    for unit in units {
        match kept.iter_mut().find(|k| k.id == unit.id) {
            Some(existing) if unit.score > existing.score => *existing = unit,
            Some(_) => {}
            None => kept.push(unit),
        }
    }

    kept
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::llm::ScriptedCompletionService;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("Score: 0.85"), Some(0.85));
        assert_eq!(parse_number("7/10"), Some(7.0));
        assert_eq!(parse_number("no digits"), None);
    }

    #[test]
    fn test_extract_json() {
        assert_eq!(
            extract_json("Sure: {\"concepts\": [\"rag\"]} done"),
            Some("{\"concepts\": [\"rag\"]}")
        );
        assert_eq!(extract_json("nothing"), None);
    }

    #[test]
    fn test_parse_list_strips_markers() {
        let items = parse_list("1. What is RAG?\n- Why use it?\n\n3) How?\n4. extra", 3);
        assert_eq!(items, vec!["What is RAG?", "Why use it?", "How?"]);
    }

    #[test]
    fn test_dedup_keep_max() {
        let units = vec![
            RetrievedUnit::new("a", "x", 0.2),
            RetrievedUnit::new("b", "y", 0.5),
            RetrievedUnit::new("a", "x", 0.9),
        ];
        let kept = dedup_keep_max(units);

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].id, "a");
        assert!((kept[0].score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_build_context_numbers_documents() {
        let units = vec![
            RetrievedUnit::new("a", "alpha", 1.0).with_metadata("sourceName", "a.md"),
            RetrievedUnit::new("b", "beta", 0.5),
        ];
        let context = build_context(&units);

        assert!(context.starts_with("[Document 1] (source: a.md)\nalpha"));
        assert!(context.contains("[Document 2]\nbeta"));
    }

    #[tokio::test]
    async fn test_grounded_answer_without_units_skips_llm() {
        let llm = ScriptedCompletionService::new().with_fallback("should not be used");
        let trace = TraceRecorder::new();

        let answer = generate_grounded_answer(&llm, "q", &[], DEFAULT_SYSTEM_PROMPT, &trace)
            .await
            .unwrap();

        assert_eq!(answer, NO_INFORMATION_ANSWER);
        assert!(llm.calls().is_empty());
    }

    #[tokio::test]
    async fn test_load_corpus_orders_by_document_and_index() {
        let search = crate::domain::search::StaticSearchBackend::new(vec![
            testing::hit("b", 0, "b0", 0.9),
            testing::hit("a", 1, "a1", 0.8),
            testing::hit("a", 0, "a0", 0.1),
        ]);

        let corpus = load_corpus(&search, 10).await.unwrap();
        let ids: Vec<&str> = corpus.iter().map(|h| h.id.as_str()).collect();

        assert_eq!(ids, vec!["a_0", "a_1", "b_0"]);
    }
}
