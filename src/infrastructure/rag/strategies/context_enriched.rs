//! Context enrichment: widen each hit with its neighbouring chunks

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use crate::domain::{
    DomainError, Hit, RetrievedUnit, Strategy, StrategyConfig, StrategyKind, TraceRecorder,
};
use crate::infrastructure::rag::context::{
    DEFAULT_CORPUS_LIMIT, StrategyDeps, generate_grounded_answer, system_prompt_from,
    vector_search,
};

const NEIGHBOUR_PROBE_QUERY: &str = "document content";

#[derive(Debug)]
pub struct ContextEnrichedStrategy {
    deps: StrategyDeps,
    system_prompt: String,
    context_size: usize,
    corpus_limit: usize,
}

impl ContextEnrichedStrategy {
    pub fn new(deps: StrategyDeps, config: &StrategyConfig) -> Self {
        Self {
            deps,
            system_prompt: system_prompt_from(config),
            context_size: config.usize_or("contextSize", 1),
            corpus_limit: config.usize_or("corpusLimit", DEFAULT_CORPUS_LIMIT),
        }
    }

    /// All chunks of one document keyed by chunk index
    async fn document_chunks(&self, doc_id: &str) -> Result<HashMap<usize, Hit>, DomainError> {
        let hits = self
            .deps
            .search
            .search(NEIGHBOUR_PROBE_QUERY, self.corpus_limit, Some(doc_id))
            .await?;
        Ok(hits.into_iter().map(|h| (h.index, h)).collect())
    }
}

#[async_trait]
impl Strategy for ContextEnrichedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ContextEnriched
    }

    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        trace: &TraceRecorder,
    ) -> Result<Vec<RetrievedUnit>, DomainError> {
        let hits = vector_search(self.deps.search.as_ref(), query, top_k, trace).await?;

        let mut documents: HashMap<String, HashMap<usize, Hit>> = HashMap::new();
        let mut seen = HashSet::new();
        let mut units = Vec::with_capacity(hits.len());

        for hit in hits {
            let (Some(doc_id), Some(center)) = (hit.doc_id().map(str::to_string), hit.chunk_index())
            else {
                if seen.insert(hit.id.clone()) {
                    units.push(hit);
                }
                continue;
            };

            if !documents.contains_key(&doc_id) {
                let chunks = self.document_chunks(&doc_id).await?;
                documents.insert(doc_id.clone(), chunks);
            }
            let chunks = &documents[&doc_id];

            let last_index = chunks.keys().copied().max().unwrap_or(center);
            let start = center.saturating_sub(self.context_size);
            let end = center.saturating_add(self.context_size).min(last_index);
            let neighbours: Vec<&Hit> = (start..=end).filter_map(|i| chunks.get(&i)).collect();

            if neighbours.is_empty() {
                if seen.insert(hit.id.clone()) {
                    units.push(hit);
                }
                continue;
            }

            let id = format!("{}_enriched_{}", doc_id, center);
            if !seen.insert(id.clone()) {
                continue;
            }

            debug!("Enriched {} with {} neighbours", hit.id, neighbours.len());
            let content = neighbours
                .iter()
                .map(|h| h.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            let range = format!(
                "[{} - {}]",
                neighbours[0].index,
                neighbours[neighbours.len() - 1].index
            );

            let mut unit = RetrievedUnit::new(id, content, hit.score)
                .with_metadata("contextRange", range)
                .with_metadata("numChunks", neighbours.len())
                .with_metadata("enriched", true);
            for key in ["docId", "sourceName", "chunkIndex"] {
                if let Some(value) = hit.metadata(key) {
                    unit.set_metadata(key, value.clone());
                }
            }
            units.push(unit);
        }

        units.truncate(top_k);
        info!("Context enrichment produced {} units", units.len());
        trace.log_details(
            "context_enrichment",
            format!("Enriched {} hits", units.len()),
            json!({ "contextSize": self.context_size, "documents": documents.len() }),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::llm::ScriptedCompletionService;
    use crate::infrastructure::rag::context::testing::{deps, hit};

    #[tokio::test]
    async fn test_merges_neighbours_in_index_order() {
        let (deps, _) = deps(
            vec![
                hit("d", 1, "middle", 0.9),
                hit("d", 0, "first", 0.5),
                hit("d", 2, "last", 0.4),
                hit("e", 0, "other doc", 0.3),
            ],
            ScriptedCompletionService::new(),
        );
        let strategy = ContextEnrichedStrategy::new(deps, &StrategyConfig::new());

        let units = strategy.retrieve("q", 1, &TraceRecorder::new()).await.unwrap();

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].id, "d_enriched_1");
        assert_eq!(units[0].content, "first\n\nmiddle\n\nlast");
        assert_eq!(units[0].metadata("contextRange"), Some(&json!("[0 - 2]")));
        assert_eq!(units[0].metadata("numChunks"), Some(&json!(3)));
        assert!((units[0].score - 0.9).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_edge_chunk_has_single_neighbour() {
        let (deps, _) = deps(
            vec![hit("d", 0, "first", 0.9), hit("d", 1, "second", 0.5)],
            ScriptedCompletionService::new(),
        );
        let strategy = ContextEnrichedStrategy::new(deps, &StrategyConfig::new());

        let units = strategy.retrieve("q", 2, &TraceRecorder::new()).await.unwrap();

        // both hits enrich to overlapping windows but keep distinct ids
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].content, "first\n\nsecond");
        assert_eq!(units[1].id, "d_enriched_1");
    }

    #[tokio::test]
    async fn test_huge_context_size_is_clamped_to_document() {
        let (deps, _) = deps(
            vec![hit("d", 1, "middle", 0.9), hit("d", 0, "first", 0.5)],
            ScriptedCompletionService::new(),
        );
        let config = StrategyConfig::new().with("contextSize", u64::MAX);
        let strategy = ContextEnrichedStrategy::new(deps, &config);

        let units = strategy.retrieve("q", 1, &TraceRecorder::new()).await.unwrap();

        assert_eq!(units[0].content, "first\n\nmiddle");
        assert_eq!(units[0].metadata("contextRange"), Some(&json!("[0 - 1]")));
    }
}
