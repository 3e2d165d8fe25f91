//! Chunk-size selection: regroup the corpus at several granularities and keep the best one

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::domain::{
    DomainError, Hit, RetrievedUnit, Strategy, StrategyConfig, StrategyKind, TraceRecorder,
};
use crate::infrastructure::rag::context::{
    DEFAULT_CORPUS_LIMIT, StrategyDeps, generate_grounded_answer, load_corpus,
    sort_by_score_desc, system_prompt_from,
};

const IDEAL_GROUP_CHARS: f32 = 1000.0;
const IDEAL_GROUP_COUNT: f32 = 20.0;
const DIVERSITY_SATURATION: f32 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationMethod {
    Coverage,
    Diversity,
    Hybrid,
}

impl EvaluationMethod {
    /// Unknown names evaluate as hybrid
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "coverage" => Self::Coverage,
            "diversity" => Self::Diversity,
            _ => Self::Hybrid,
        }
    }
}

/// Neighbouring chunks merged into one candidate unit
#[derive(Debug, Clone)]
pub struct ChunkGroup {
    pub id: String,
    pub content: String,
    pub chunk_ids: Vec<String>,
    pub source_name: String,
}

/// Consecutive groups of `size` chunks, ids `combined_{start}_{end}`
pub fn group_chunks(corpus: &[Hit], size: usize) -> Vec<ChunkGroup> {
    let size = size.max(1);
    corpus
        .chunks(size)
        .enumerate()
        .map(|(n, members)| {
            let start = n * size;
            ChunkGroup {
                id: format!("combined_{}_{}", start, start + members.len()),
                content: members
                    .iter()
                    .map(|h| h.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n"),
                chunk_ids: members.iter().map(|h| h.id.clone()).collect(),
                source_name: members[0].source_name.clone(),
            }
        })
        .collect()
}

/// Heuristic quality in `[0, 1]` of a grouping
pub fn evaluate_grouping(groups: &[ChunkGroup], method: EvaluationMethod) -> f32 {
    if groups.is_empty() {
        return 0.0;
    }

    let count = groups.len() as f32;
    let avg_chars =
        groups.iter().map(|g| g.content.chars().count()).sum::<usize>() as f32 / count;
    let length_score = (1.0 - (avg_chars - IDEAL_GROUP_CHARS).abs() / IDEAL_GROUP_CHARS).clamp(0.0, 1.0);
    let count_score = (1.0 - (count - IDEAL_GROUP_COUNT).abs() / IDEAL_GROUP_COUNT).clamp(0.0, 1.0);
    let diversity_score = (count / DIVERSITY_SATURATION).min(1.0);

    match method {
        EvaluationMethod::Coverage => (length_score + count_score) / 2.0,
        EvaluationMethod::Diversity => diversity_score,
        EvaluationMethod::Hybrid => length_score * 0.4 + count_score * 0.3 + diversity_score * 0.3,
    }
}

#[derive(Debug)]
pub struct ChunkSizeStrategy {
    deps: StrategyDeps,
    system_prompt: String,
    candidate_sizes: Vec<usize>,
    method: EvaluationMethod,
    corpus_limit: usize,
}

impl ChunkSizeStrategy {
    pub fn new(deps: StrategyDeps, config: &StrategyConfig) -> Self {
        Self {
            deps,
            system_prompt: system_prompt_from(config),
            candidate_sizes: config.usize_list_or("candidateSizes", &[3, 5, 7, 10]),
            method: EvaluationMethod::parse(&config.string_or("evaluationMethod", "coverage")),
            corpus_limit: config.usize_or("corpusLimit", DEFAULT_CORPUS_LIMIT),
        }
    }
}

#[async_trait]
impl Strategy for ChunkSizeStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ChunkSizeSelector
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

        let mut best: Option<(usize, f32, Vec<ChunkGroup>)> = None;
        let mut all_scores = serde_json::Map::new();
        for &size in &self.candidate_sizes {
            let groups = group_chunks(&corpus, size);
            let quality = evaluate_grouping(&groups, self.method);
            all_scores.insert(size.to_string(), json!(quality));

            if best.as_ref().is_none_or(|(_, q, _)| quality > *q) {
                best = Some((size, quality, groups));
            }
        }

        let Some((size, quality, groups)) = best else {
            return Ok(Vec::new());
        };
        info!("Selected chunk group size {} (quality {:.3})", size, quality);
        trace.log_details(
            "best_size_selected",
            format!("Selected group size {}", size),
            json!({ "selectedSize": size, "quality": quality, "allScores": all_scores }),
        );

        let similarities: HashMap<String, f32> = self
            .deps
            .search
            .search(query, corpus.len(), None)
            .await?
            .into_iter()
            .map(|h| (h.id, h.score))
            .collect();

        let mut units: Vec<RetrievedUnit> = groups
            .into_iter()
            .map(|group| {
                let average = group
                    .chunk_ids
                    .iter()
                    .map(|id| similarities.get(id).copied().unwrap_or(0.0))
                    .sum::<f32>()
                    / group.chunk_ids.len() as f32;
                RetrievedUnit::new(group.id, group.content, average)
                    .with_metadata("chunkSize", size)
                    .with_metadata("chunkIds", group.chunk_ids)
                    .with_metadata("sourceName", group.source_name)
            })
            .collect();

        sort_by_score_desc(&mut units);
        units.truncate(top_k);
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
