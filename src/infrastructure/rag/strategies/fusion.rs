//! Vector + BM25 score fusion

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::json;

use crate::domain::{
    DomainError, RetrievedUnit, Strategy, StrategyConfig, StrategyKind, TraceRecorder,
};
use crate::infrastructure::rag::context::{
    StrategyDeps, generate_grounded_answer, system_prompt_from, vector_search,
};
use crate::infrastructure::rag::lexical::Bm25Index;

/// Min-max normalization; a constant list maps to all ones
pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    let Some(min) = scores.iter().copied().reduce(f32::min) else {
        return Vec::new();
    };
    let max = scores.iter().copied().fold(min, f32::max);
    let range = max - min;

    if range == 0.0 {
        return vec![1.0; scores.len()];
    }

    scores.iter().map(|s| (s - min) / range).collect()
}

/// Fused scores for one candidate
#[derive(Debug, Clone, PartialEq)]
pub struct FusedScore {
    pub id: String,
    pub vector: f32,
    pub lexical: f32,
    pub fused: f32,
}

/// Normalizes both ranked lists and combines them by id; missing entries count as 0
pub fn fuse_scores(
    vector: &[(String, f32)],
    lexical: &[(String, f32)],
    vector_weight: f32,
    lexical_weight: f32,
) -> Vec<FusedScore> {
    let vector_norm = min_max_normalize(&vector.iter().map(|(_, s)| *s).collect::<Vec<_>>());
    let lexical_norm = min_max_normalize(&lexical.iter().map(|(_, s)| *s).collect::<Vec<_>>());

    let mut order: Vec<String> = Vec::new();
    let mut combined: HashMap<String, (f32, f32)> = HashMap::new();

    for ((id, _), norm) in vector.iter().zip(vector_norm) {
        if !combined.contains_key(id) {
            order.push(id.clone());
        }
        combined.entry(id.clone()).or_insert((0.0, 0.0)).0 = norm;
    }
    for ((id, _), norm) in lexical.iter().zip(lexical_norm) {
        if !combined.contains_key(id) {
            order.push(id.clone());
        }
        combined.entry(id.clone()).or_insert((0.0, 0.0)).1 = norm;
    }

    let mut fused: Vec<FusedScore> = order
        .into_iter()
        .map(|id| {
            let (v, l) = combined.get(&id).copied().unwrap_or_default();
            FusedScore {
                id,
                vector: v,
                lexical: l,
                fused: vector_weight * v + lexical_weight * l,
            }
        })
        .collect();

    fused.sort_by(|a, b| b.fused.total_cmp(&a.fused));
    fused
}

#[derive(Debug)]
pub struct FusionStrategy {
    deps: StrategyDeps,
    system_prompt: String,
    vector_weight: f32,
    lexical_weight: f32,
}

impl FusionStrategy {
    pub fn new(deps: StrategyDeps, config: &StrategyConfig) -> Self {
        let lexical_default = config.f32_or("bm25Weight", 0.5);

        Self {
            deps,
            system_prompt: system_prompt_from(config),
            vector_weight: config.f32_or("vectorWeight", 0.5),
            lexical_weight: config.f32_or("lexicalWeight", lexical_default),
        }
    }
}

#[async_trait]
impl Strategy for FusionStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Fusion
    }

    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        trace: &TraceRecorder,
    ) -> Result<Vec<RetrievedUnit>, DomainError> {
        let candidates =
            vector_search(self.deps.search.as_ref(), query, top_k * 2, trace).await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let index = Bm25Index::new(
            &candidates
                .iter()
                .map(|c| c.content.as_str())
                .collect::<Vec<_>>(),
        );
        let lexical: Vec<(String, f32)> = index
            .top(query, top_k * 2)
            .into_iter()
            .map(|(pos, score)| (candidates[pos].id.clone(), score))
            .collect();
        let vector: Vec<(String, f32)> =
            candidates.iter().map(|c| (c.id.clone(), c.score)).collect();

        trace.log_details(
            "bm25_search",
            format!("BM25 scored {} candidates", lexical.len()),
            json!({ "returned": lexical.len() }),
        );

        let fused = fuse_scores(&vector, &lexical, self.vector_weight, self.lexical_weight);

        let units: Vec<RetrievedUnit> = fused
            .into_iter()
            .take(top_k)
            .filter_map(|score| {
                let candidate = candidates.iter().find(|c| c.id == score.id)?;
                let mut unit = candidate.clone();
                unit.score = score.fused;
                unit.set_metadata("vectorScore", score.vector);
                unit.set_metadata("lexicalScore", score.lexical);
                unit.set_metadata("fusionScore", score.fused);
                Some(unit)
            })
            .collect();

        trace.log_details(
            "fusion",
            format!("Fused to {} units", units.len()),
            json!({
                "vectorWeight": self.vector_weight,
                "lexicalWeight": self.lexical_weight,
            }),
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
