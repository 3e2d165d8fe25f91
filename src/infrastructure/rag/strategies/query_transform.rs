//! Query transformation: rewrite, step back or decompose before searching

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::domain::{
    DomainError, RetrievedUnit, Strategy, StrategyConfig, StrategyKind, TraceRecorder,
};
use crate::infrastructure::rag::context::{
    StrategyDeps, ask, dedup_keep_max, generate_grounded_answer, parse_list, sort_by_score_desc,
    system_prompt_from, vector_search,
};

const REWRITE_SYSTEM_PROMPT: &str = "You optimize search queries. Rewrite the user's query to be \
more specific and detailed, adding the key terms and concepts that help retrieve accurate \
information. Keep it concise. Output only the rewritten query.";

const STEPBACK_SYSTEM_PROMPT: &str = "You design search strategies. Turn the specific query into \
a broader, more general question that retrieves useful background information. Output only the \
broader query.";

const DECOMPOSE_SYSTEM_PROMPT: &str = "You break complex questions into simpler sub-questions, \
each focusing on a different aspect of the original. Output one numbered sub-question per line.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformationType {
    Rewrite,
    StepBack,
    Decompose,
    Hybrid,
}

impl TransformationType {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "stepback" => Self::StepBack,
            "decompose" => Self::Decompose,
            "hybrid" => Self::Hybrid,
            _ => Self::Rewrite,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rewrite => "rewrite",
            Self::StepBack => "stepback",
            Self::Decompose => "decompose",
            Self::Hybrid => "hybrid",
        }
    }
}

#[derive(Debug)]
pub struct QueryTransformStrategy {
    deps: StrategyDeps,
    system_prompt: String,
    transformation: TransformationType,
    num_subqueries: usize,
}

impl QueryTransformStrategy {
    pub fn new(deps: StrategyDeps, config: &StrategyConfig) -> Self {
        Self {
            deps,
            system_prompt: system_prompt_from(config),
            transformation: TransformationType::parse(
                &config.string_or("transformationType", "rewrite"),
            ),
            num_subqueries: config.usize_or("numSubqueries", 3).max(1),
        }
    }

    async fn single(&self, system: &str, query: &str, temperature: f32) -> String {
        let user = format!("Original query: {}", query);
        match ask(self.deps.llm.as_ref(), system, &user, temperature, 200).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => query.to_string(),
            Err(e) => {
                warn!("Query transformation failed, using original query: {}", e);
                query.to_string()
            }
        }
    }

    async fn decompose(&self, query: &str) -> Vec<String> {
        let user = format!(
            "Break the following query into {} simpler sub-questions.\n\nOriginal query: {}",
            self.num_subqueries, query
        );
        match ask(self.deps.llm.as_ref(), DECOMPOSE_SYSTEM_PROMPT, &user, 0.2, 500).await {
            Ok(text) => {
                let parts = parse_list(&text, self.num_subqueries);
                if parts.is_empty() {
                    vec![query.to_string()]
                } else {
                    parts
                }
            }
            Err(e) => {
                warn!("Query decomposition failed, using original query: {}", e);
                vec![query.to_string()]
            }
        }
    }

    async fn transform(&self, query: &str) -> Vec<String> {
        match self.transformation {
            TransformationType::Rewrite => vec![self.single(REWRITE_SYSTEM_PROMPT, query, 0.0).await],
            TransformationType::StepBack => {
                vec![self.single(STEPBACK_SYSTEM_PROMPT, query, 0.1).await]
            }
            TransformationType::Decompose => self.decompose(query).await,
            TransformationType::Hybrid => {
                let mut queries = vec![self.single(REWRITE_SYSTEM_PROMPT, query, 0.0).await];
                queries.extend(self.decompose(query).await.into_iter().take(2));
                queries
            }
        }
    }
}

#[async_trait]
impl Strategy for QueryTransformStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::QueryTransformation
    }

    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        trace: &TraceRecorder,
    ) -> Result<Vec<RetrievedUnit>, DomainError> {
        let queries = self.transform(query).await;
        info!(
            "Transformed query ({}) into {} queries",
            self.transformation.as_str(),
            queries.len()
        );
        trace.log_details(
            "query_transform",
            format!("{} produced {} queries", self.transformation.as_str(), queries.len()),
            json!({ "type": self.transformation.as_str(), "queries": queries }),
        );

        let mut pooled = Vec::new();
        for transformed in &queries {
            pooled.extend(
                vector_search(self.deps.search.as_ref(), transformed, top_k * 2, trace).await?,
            );
        }

        let mut units = dedup_keep_max(pooled);
        sort_by_score_desc(&mut units);
        units.truncate(top_k);

        Ok(units
            .into_iter()
            .map(|u| {
                u.with_metadata("transformationType", self.transformation.as_str())
                    .with_metadata("numQueries", queries.len())
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::llm::ScriptedCompletionService;
    use crate::domain::search::StaticSearchBackend;
    use crate::infrastructure::embedding::HashingEmbeddingService;
    use crate::infrastructure::rag::context::testing::hit;
    use std::sync::Arc;

    fn strategy(
        transformation: &str,
        llm: ScriptedCompletionService,
    ) -> (QueryTransformStrategy, Arc<StaticSearchBackend>) {
        let search = Arc::new(StaticSearchBackend::new(vec![
            hit("d", 0, "a", 0.9),
            hit("d", 1, "b", 0.5),
        ]));
        let deps = StrategyDeps::new(
            search.clone(),
            Arc::new(llm),
            Arc::new(HashingEmbeddingService::default()),
        );
        let config = StrategyConfig::new().with("transformationType", transformation);
        (QueryTransformStrategy::new(deps, &config), search)
    }

    #[test]
    fn test_parse_transformation_type() {
        assert_eq!(TransformationType::parse("step-back"), TransformationType::StepBack);
        assert_eq!(TransformationType::parse("HYBRID"), TransformationType::Hybrid);
        assert_eq!(TransformationType::parse("unknown"), TransformationType::Rewrite);
    }

    #[tokio::test]
    async fn test_hybrid_searches_rewrite_and_two_subqueries() {
        let llm = ScriptedCompletionService::new()
            .on("You optimize search queries", "retrieval augmented generation definition")
            .on("sub-questions", "1. What is retrieval?\n2. What is generation?\n3. Why combine?");
        let (strategy, search) = strategy("hybrid", llm);

        let units = strategy
            .retrieve("what is RAG", 2, &TraceRecorder::new())
            .await
            .unwrap();

        let searched: Vec<String> = search.queries().into_iter().map(|q| q.0).collect();
        assert_eq!(
            searched,
            vec![
                "retrieval augmented generation definition",
                "What is retrieval?",
                "What is generation?"
            ]
        );
        // same two hits come back for every query and are deduplicated
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].metadata("numQueries"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn test_failed_decomposition_uses_original_query() {
        let (strategy, search) = strategy("decompose", ScriptedCompletionService::new());

        strategy
            .retrieve("what is RAG", 2, &TraceRecorder::new())
            .await
            .unwrap();

        assert_eq!(search.queries()[0].0, "what is RAG");
        assert_eq!(search.queries()[0].1, 4);
    }
}
