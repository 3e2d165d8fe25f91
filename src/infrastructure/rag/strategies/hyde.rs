//! Hypothetical document embeddings: search with a generated answer

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::Mutex;
use tracing::warn;

use crate::domain::{
    DomainError, RetrievedUnit, Strategy, StrategyConfig, StrategyKind, TraceRecorder,
};
use crate::infrastructure::rag::context::{
    StrategyDeps, ask, generate_grounded_answer, system_prompt_from, vector_search,
};
use crate::infrastructure::text::truncate_chars;

const HYPOTHESIS_SYSTEM_PROMPT: &str = "You write hypothetical reference passages. Given a \
question, write a detailed, factual-sounding paragraph that would answer it, as it might appear \
in a textbook.";

#[derive(Debug)]
pub struct HydeStrategy {
    deps: StrategyDeps,
    system_prompt: String,
    hypothesis: Mutex<Option<String>>,
}

impl HydeStrategy {
    pub fn new(deps: StrategyDeps, config: &StrategyConfig) -> Self {
        Self {
            deps,
            system_prompt: system_prompt_from(config),
            hypothesis: Mutex::new(None),
        }
    }

    async fn hypothesize(&self, query: &str) -> String {
        match ask(
            self.deps.llm.as_ref(),
            HYPOTHESIS_SYSTEM_PROMPT,
            &format!("Question: {}", query),
            0.7,
            500,
        )
        .await
        {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => query.to_string(),
            Err(e) => {
                warn!("Hypothetical document generation failed: {}", e);
                query.to_string()
            }
        }
    }
}

#[async_trait]
impl Strategy for HydeStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Hyde
    }

    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        trace: &TraceRecorder,
    ) -> Result<Vec<RetrievedUnit>, DomainError> {
        let hypothesis = self.hypothesize(query).await;
        let preview = truncate_chars(&hypothesis, 200).to_string();

        trace.log_details(
            "hypothesis",
            "Generated hypothetical document",
            json!({ "fallbackToQuery": hypothesis == query, "preview": preview }),
        );

        let units = vector_search(self.deps.search.as_ref(), &hypothesis, top_k, trace)
            .await?
            .into_iter()
            .map(|u| u.with_metadata("hypothesisUsed", preview.clone()))
            .collect();

        *self.hypothesis.lock().unwrap_or_else(|e| e.into_inner()) = Some(preview);

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
        let mut aux = Map::new();
        if let Some(ref hypothesis) = *self.hypothesis.lock().unwrap_or_else(|e| e.into_inner()) {
            aux.insert("hypothesis".into(), Value::from(hypothesis.clone()));
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
    use std::sync::Arc;

    #[tokio::test]
    async fn test_searches_with_hypothesis() {
        let search = Arc::new(StaticSearchBackend::new(vec![crate::domain::Hit::new(
            "d_0", "text", "d", 0,
        )]));
        let deps = StrategyDeps::new(
            search.clone(),
            Arc::new(
                ScriptedCompletionService::new()
                    .on("hypothetical reference passages", "RAG retrieves documents first."),
            ),
            Arc::new(HashingEmbeddingService::default()),
        );
        let strategy = HydeStrategy::new(deps, &StrategyConfig::new());

        let units = strategy
            .retrieve("what is RAG", 3, &TraceRecorder::new())
            .await
            .unwrap();

        assert_eq!(search.queries()[0].0, "RAG retrieves documents first.");
        assert_eq!(
            units[0].metadata("hypothesisUsed").and_then(Value::as_str),
            Some("RAG retrieves documents first.")
        );
        assert!(strategy.aux_metadata().contains_key("hypothesis"));
    }

    #[tokio::test]
    async fn test_falls_back_to_query() {
        let search = Arc::new(StaticSearchBackend::new(vec![]));
        let deps = StrategyDeps::new(
            search.clone(),
            Arc::new(ScriptedCompletionService::new()),
            Arc::new(HashingEmbeddingService::default()),
        );
        let strategy = HydeStrategy::new(deps, &StrategyConfig::new());

        strategy
            .retrieve("what is RAG", 3, &TraceRecorder::new())
            .await
            .unwrap();

        assert_eq!(search.queries()[0].0, "what is RAG");
    }
}
