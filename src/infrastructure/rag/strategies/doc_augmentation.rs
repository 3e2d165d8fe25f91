//! Document augmentation: match the query against generated questions as well as chunk text

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::domain::{
    DomainError, Hit, MemoArena, RetrievedUnit, Strategy, StrategyConfig, StrategyKind,
    TraceRecorder, cosine_similarity,
};
use crate::infrastructure::rag::context::{
    DEFAULT_CORPUS_LIMIT, StrategyDeps, ask, generate_grounded_answer, load_corpus, parse_list,
    sort_by_score_desc, system_prompt_from,
};
use crate::infrastructure::text::truncate_chars;

const QUESTION_SYSTEM_PROMPT: &str = "You are an expert at generating questions from text. \
Generate concise questions that can be answered from the text alone, focusing on its core \
information and key concepts. Reply with a numbered list of questions and nothing else.";

const MIN_CHUNK_CHARS: usize = 50;
const QUESTION_INPUT_CHARS: usize = 2000;

#[derive(Debug)]
pub struct DocAugmentationStrategy {
    deps: StrategyDeps,
    system_prompt: String,
    questions_per_chunk: usize,
    question_weight: f32,
    content_weight: f32,
    corpus_limit: usize,
    questions: MemoArena<String, Vec<String>>,
}

impl DocAugmentationStrategy {
    pub fn new(deps: StrategyDeps, config: &StrategyConfig) -> Self {
        Self {
            deps,
            system_prompt: system_prompt_from(config),
            questions_per_chunk: config.usize_or("numQuestionsPerChunk", 3),
            question_weight: config.f32_or("questionWeight", 0.6),
            content_weight: config.f32_or("contentWeight", 0.4),
            corpus_limit: config.usize_or("corpusLimit", DEFAULT_CORPUS_LIMIT),
            questions: MemoArena::new(),
        }
    }

    async fn questions_for(&self, hit: &Hit) -> Vec<String> {
        if let Some(cached) = self.questions.get(&hit.id) {
            return cached;
        }
        if hit.content.trim().chars().count() < MIN_CHUNK_CHARS {
            return Vec::new();
        }

        let user = format!(
            "Generate {} different questions answerable only from this text:\n\n{}",
            self.questions_per_chunk,
            truncate_chars(&hit.content, QUESTION_INPUT_CHARS)
        );
        let questions =
            match ask(self.deps.llm.as_ref(), QUESTION_SYSTEM_PROMPT, &user, 0.7, 500).await {
                Ok(reply) => parse_list(&reply, self.questions_per_chunk),
                Err(e) => {
                    warn!("Question generation failed for {}: {}", hit.id, e);
                    Vec::new()
                }
            };

        self.questions.insert(hit.id.clone(), questions.clone());
        questions
    }
}

#[async_trait]
impl Strategy for DocAugmentationStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DocAugmentation
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

        let questions = join_all(corpus.iter().map(|h| self.questions_for(h))).await;
        let total_questions: usize = questions.iter().map(Vec::len).sum();
        trace.log_details(
            "questions_generated",
            format!("{} questions for {} chunks", total_questions, corpus.len()),
            json!({ "totalQuestions": total_questions, "chunks": corpus.len() }),
        );

        let query_vector = self.deps.embedder.embed_one(query).await?;
        let contents: Vec<String> = corpus.iter().map(|h| h.content.clone()).collect();
        let content_vectors = self.deps.embedder.embed(&contents).await?;

        let flat: Vec<String> = questions.iter().flatten().cloned().collect();
        let question_vectors = if flat.is_empty() {
            Vec::new()
        } else {
            self.deps.embedder.embed(&flat).await?
        };

        let mut offset = 0;
        let mut units = Vec::with_capacity(corpus.len());
        for ((hit, chunk_questions), content_vector) in
            corpus.into_iter().zip(questions).zip(content_vectors)
        {
            let content_score = cosine_similarity(&query_vector, &content_vector);

            let mut best: Option<(f32, &str)> = None;
            for (i, question) in chunk_questions.iter().enumerate() {
                let similarity = cosine_similarity(&query_vector, &question_vectors[offset + i]);
                if best.is_none_or(|(s, _)| similarity > s) {
                    best = Some((similarity, question.as_str()));
                }
            }
            offset += chunk_questions.len();

            let question_score = best.map(|(s, _)| s).unwrap_or(0.0);
            let score = self.question_weight * question_score + self.content_weight * content_score;
            debug!("{} content={:.3} question={:.3}", hit.id, content_score, question_score);

            let matched = best.map(|(_, q)| Value::from(q)).unwrap_or(Value::Null);
            units.push(
                RetrievedUnit::from(hit.with_score(score))
                    .with_metadata("contentScore", content_score)
                    .with_metadata("questionScore", question_score)
                    .with_metadata("matchedQuestion", matched),
            );
        }

        sort_by_score_desc(&mut units);
        units.truncate(top_k);
        info!("Document augmentation returned {} units", units.len());

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

    const QUESTIONS: &str = "questions answerable only from this text";

    #[tokio::test]
    async fn test_question_match_lifts_chunk() {
        let (deps, _) = deps(
            vec![
                hit("a", 0, "The committee approved the budget after a long debate on Tuesday.", 0.5),
                hit("b", 0, "Photosynthesis converts light into chemical energy inside leaves.", 0.5),
            ],
            ScriptedCompletionService::new()
                .on("committee approved", "1. When was the budget approved?")
                .on("Photosynthesis converts", "1. How do plants make energy from light?"),
        );
        let strategy = DocAugmentationStrategy::new(deps, &StrategyConfig::new());

        let units = strategy
            .retrieve("how do plants make energy from light", 1, &TraceRecorder::new())
            .await
            .unwrap();

        assert_eq!(units[0].id, "b_0");
        assert_eq!(
            units[0].metadata("matchedQuestion"),
            Some(&json!("How do plants make energy from light?"))
        );
        let q = units[0].metadata_f32("questionScore").unwrap();
        let c = units[0].metadata_f32("contentScore").unwrap();
        assert!((units[0].score - (0.6 * q + 0.4 * c)).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_questions_cached_and_short_chunks_skipped() {
        let (deps, llm) = deps(
            vec![
                hit("a", 0, "A chunk long enough to deserve generated questions about it.", 0.5),
                hit("b", 0, "short", 0.5),
            ],
            ScriptedCompletionService::new().on(QUESTIONS, "1. What is this?"),
        );
        let strategy = DocAugmentationStrategy::new(deps, &StrategyConfig::new());

        strategy.retrieve("q", 2, &TraceRecorder::new()).await.unwrap();
        let units = strategy.retrieve("q", 2, &TraceRecorder::new()).await.unwrap();

        assert_eq!(llm.calls_matching(QUESTIONS), 1);
        let short = units.iter().find(|u| u.id == "b_0").unwrap();
        assert_eq!(short.metadata("matchedQuestion"), Some(&Value::Null));
    }
}
