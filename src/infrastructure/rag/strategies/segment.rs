//! Relevant segment extraction: return contiguous runs of chunks instead of isolated hits

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use crate::domain::{
    DomainError, RetrievedUnit, Strategy, StrategyConfig, StrategyKind, TraceRecorder,
};
use crate::infrastructure::rag::context::{
    DEFAULT_CORPUS_LIMIT, StrategyDeps, generate_grounded_answer, load_corpus, system_prompt_from,
};

/// Limits applied while picking segments
#[derive(Debug, Clone, Copy)]
pub struct SegmentLimits {
    pub max_segment_length: usize,
    pub total_max_length: usize,
    pub min_segment_value: f32,
}

/// Greedily claims the highest-sum non-overlapping runs of `values`.
///
/// Returns half-open `(start, end)` ranges sorted by start. Each pick must sum
/// above `min_segment_value` and fit in the remaining length budget.
pub fn find_best_segments(values: &[f32], limits: SegmentLimits) -> Vec<(usize, usize)> {
    let mut prefix = Vec::with_capacity(values.len() + 1);
    prefix.push(0.0f32);
    for v in values {
        prefix.push(prefix[prefix.len() - 1] + v);
    }

    let mut segments: Vec<(usize, usize)> = Vec::new();
    let mut used = 0;

    while used < limits.total_max_length {
        let budget = limits.max_segment_length.min(limits.total_max_length - used);
        let mut best: Option<(usize, usize)> = None;
        let mut best_sum = limits.min_segment_value;

        for start in 0..values.len() {
            let longest = budget.min(values.len() - start);
            for end in (start + 1)..=(start + longest) {
                if segments.iter().any(|&(s, e)| start < e && s < end) {
                    break;
                }
                let sum = prefix[end] - prefix[start];
                if sum > best_sum {
                    best_sum = sum;
                    best = Some((start, end));
                }
            }
        }

        let Some(segment) = best else {
            break;
        };
        debug!("Claimed segment [{}, {}) with value {:.4}", segment.0, segment.1, best_sum);
        used += segment.1 - segment.0;
        segments.push(segment);
    }

    segments.sort_by_key(|&(start, _)| start);
    segments
}

#[derive(Debug)]
pub struct SegmentStrategy {
    deps: StrategyDeps,
    system_prompt: String,
    irrelevant_penalty: f32,
    limits: SegmentLimits,
    corpus_limit: usize,
}

impl SegmentStrategy {
    pub fn new(deps: StrategyDeps, config: &StrategyConfig) -> Self {
        Self {
            deps,
            system_prompt: system_prompt_from(config),
            irrelevant_penalty: config.f32_or("irrelevantPenalty", 0.2),
            limits: SegmentLimits {
                max_segment_length: config.usize_or("maxSegmentLength", 20).max(1),
                total_max_length: config.usize_or("totalMaxLength", 30),
                min_segment_value: config.f32_or("minSegmentValue", 0.2),
            },
            corpus_limit: config.usize_or("corpusLimit", DEFAULT_CORPUS_LIMIT),
        }
    }
}

#[async_trait]
impl Strategy for SegmentStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Rse
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

        let similarities: HashMap<String, f32> = self
            .deps
            .search
            .search(query, corpus.len(), None)
            .await?
            .into_iter()
            .map(|h| (h.id, h.score))
            .collect();
        let similarity_of = |id: &str| similarities.get(id).copied().unwrap_or(0.0);

        let values: Vec<f32> = corpus
            .iter()
            .map(|h| similarity_of(&h.id) - self.irrelevant_penalty)
            .collect();
        trace.log_details(
            "values_computed",
            format!("Scored {} chunks", values.len()),
            json!({
                "positive": values.iter().filter(|v| **v > 0.0).count(),
                "nonPositive": values.iter().filter(|v| **v <= 0.0).count(),
            }),
        );

        let segments = find_best_segments(&values, self.limits);
        info!("RSE selected {} segments", segments.len());
        trace.log_details(
            "segments_found",
            format!("Found {} segments", segments.len()),
            json!({
                "segments": segments.iter().map(|(s, e)| format!("[{}:{}]", s, e)).collect::<Vec<_>>(),
            }),
        );

        Ok(segments
            .iter()
            .enumerate()
            .take(top_k)
            .map(|(i, &(start, end))| {
                let members = &corpus[start..end];
                let content = members
                    .iter()
                    .map(|h| h.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                let average =
                    members.iter().map(|h| similarity_of(&h.id)).sum::<f32>() / members.len() as f32;

                RetrievedUnit::new(format!("segment_{}_{}", start, end), content, average)
                    .with_metadata("segmentRange", vec![start, end])
                    .with_metadata("segmentLength", end - start)
                    .with_metadata("segmentIndex", i)
                    .with_metadata(
                        "chunkIds",
                        members.iter().map(|h| h.id.clone()).collect::<Vec<_>>(),
                    )
                    .with_metadata("sourceName", members[0].source_name.clone())
            })
            .collect())
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
