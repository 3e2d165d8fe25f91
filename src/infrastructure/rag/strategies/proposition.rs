//! Proposition chunking: break chunks into atomic statements and match the query against those

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::domain::{
    DomainError, Hit, MemoArena, RetrievedUnit, Strategy, StrategyConfig, StrategyKind,
    TraceRecorder,
};
use crate::infrastructure::rag::context::{
    DEFAULT_CORPUS_LIMIT, StrategyDeps, ask, generate_grounded_answer, load_corpus, parse_list,
    system_prompt_from, vector_search,
};
use crate::infrastructure::text::{split_sentences, tokenize, truncate_chars};

const PROPOSITION_SYSTEM_PROMPT: &str = "Break the text down into simple, self-contained \
propositions. Each proposition must state a single fact, be understandable without extra \
context, use full entity names instead of pronouns, keep relevant dates and qualifiers, and \
have a single subject-predicate relation. Output one proposition per line with no numbering.";

const MIN_CHUNK_CHARS: usize = 50;
const MIN_PROPOSITION_CHARS: usize = 10;
const MAX_PROPOSITIONS: usize = 10;
const FALLBACK_SENTENCES: usize = 5;
const PROPOSITION_INPUT_CHARS: usize = 1500;

/// Share of query tokens that also occur in `text`
pub fn overlap_score(query_tokens: &HashSet<String>, text: &str) -> f32 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let tokens: HashSet<String> = tokenize(text).into_iter().collect();
    query_tokens.intersection(&tokens).count() as f32 / query_tokens.len() as f32
}

#[derive(Debug)]
struct ScoredProposition<'a> {
    text: String,
    score: f32,
    source: &'a Hit,
}

#[derive(Debug)]
pub struct PropositionStrategy {
    deps: StrategyDeps,
    system_prompt: String,
    max_chunks: usize,
    corpus_limit: usize,
    propositions: MemoArena<String, Vec<String>>,
}

impl PropositionStrategy {
    pub fn new(deps: StrategyDeps, config: &StrategyConfig) -> Self {
        Self {
            deps,
            system_prompt: system_prompt_from(config),
            max_chunks: config.usize_or("maxChunks", 10),
            corpus_limit: config.usize_or("corpusLimit", DEFAULT_CORPUS_LIMIT),
            propositions: MemoArena::new(),
        }
    }

    async fn propositions_for(&self, hit: &Hit) -> Vec<String> {
        if let Some(cached) = self.propositions.get(&hit.id) {
            return cached;
        }

        let user = format!(
            "Text to convert into propositions:\n\n{}",
            truncate_chars(&hit.content, PROPOSITION_INPUT_CHARS)
        );
        let propositions: Vec<String> =
            match ask(self.deps.llm.as_ref(), PROPOSITION_SYSTEM_PROMPT, &user, 0.0, 800).await {
                Ok(reply) => parse_list(&reply, usize::MAX)
                    .into_iter()
                    .filter(|p| p.chars().count() > MIN_PROPOSITION_CHARS)
                    .take(MAX_PROPOSITIONS)
                    .collect(),
                Err(e) => {
                    warn!("Proposition generation failed for {}, splitting sentences: {}", hit.id, e);
                    split_sentences(&hit.content)
                        .into_iter()
                        .filter(|s| s.chars().count() > MIN_PROPOSITION_CHARS)
                        .take(FALLBACK_SENTENCES)
                        .collect()
                }
            };

        self.propositions.insert(hit.id.clone(), propositions.clone());
        propositions
    }
}

#[async_trait]
impl Strategy for PropositionStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PropositionChunking
    }

    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        trace: &TraceRecorder,
    ) -> Result<Vec<RetrievedUnit>, DomainError> {
        let corpus = load_corpus(self.deps.search.as_ref(), self.corpus_limit).await?;
        if corpus.is_empty() {
            return Ok(Vec::new());
        }

        let query_tokens: HashSet<String> = tokenize(query).into_iter().collect();
        let mut scored = Vec::new();
        for hit in corpus.iter().take(self.max_chunks) {
            if hit.content.trim().chars().count() < MIN_CHUNK_CHARS {
                continue;
            }
            for text in self.propositions_for(hit).await {
                scored.push(ScoredProposition {
                    score: overlap_score(&query_tokens, &text),
                    text,
                    source: hit,
                });
            }
        }

        trace.log_details(
            "propositions_generated",
            format!("Generated {} propositions", scored.len()),
            json!({ "propositions": scored.len(), "chunks": corpus.len().min(self.max_chunks) }),
        );

        if scored.is_empty() {
            warn!("No propositions available; falling back to chunk search");
            let units = vector_search(self.deps.search.as_ref(), query, top_k, trace).await?;
            return Ok(units
                .into_iter()
                .map(|u| u.with_metadata("fallback", true))
                .collect());
        }

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k * 3);

        let mut groups: Vec<(&Hit, Vec<ScoredProposition>)> = Vec::new();
        for prop in scored {
            match groups.iter_mut().find(|(hit, _)| hit.id == prop.source.id) {
                Some((_, props)) => props.push(prop),
                None => groups.push((prop.source, vec![prop])),
            }
        }

        let units: Vec<RetrievedUnit> = groups
            .into_iter()
            .take(top_k)
            .map(|(hit, props)| {
                let average = props.iter().map(|p| p.score).sum::<f32>() / props.len() as f32;
                let scores: Vec<f32> = props.iter().map(|p| p.score).collect();
                let content = props
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n");

                let mut unit = RetrievedUnit::from(hit.clone().with_score(average));
                unit.content = content;
                unit.with_metadata("numPropositions", scores.len())
                    .with_metadata("propositionScores", scores)
            })
            .collect();

        info!("Proposition retrieval returned {} units", units.len());
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
