use async_trait::async_trait;

use crate::domain::{
    DomainError, RetrievedUnit, Strategy, StrategyConfig, StrategyKind, TraceRecorder,
};
use crate::infrastructure::rag::context::{
    StrategyDeps, generate_grounded_answer, system_prompt_from, vector_search,
};

/// Vector search followed by a grounded answer
#[derive(Debug)]
pub struct SimpleStrategy {
    deps: StrategyDeps,
    system_prompt: String,
}

impl SimpleStrategy {
    pub fn new(deps: StrategyDeps, config: &StrategyConfig) -> Self {
        Self {
            deps,
            system_prompt: system_prompt_from(config),
        }
    }
}

#[async_trait]
impl Strategy for SimpleStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Simple
    }

    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        trace: &TraceRecorder,
    ) -> Result<Vec<RetrievedUnit>, DomainError> {
        vector_search(self.deps.search.as_ref(), query, top_k, trace).await
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
    use crate::domain::NO_INFORMATION_ANSWER;
    use crate::domain::llm::ScriptedCompletionService;
    use crate::infrastructure::rag::context::testing::{deps, hit};

    #[tokio::test]
    async fn test_retrieve_then_generate() {
        let (deps, llm) = deps(
            vec![hit("d", 0, "RAG combines search with generation", 0.9)],
            ScriptedCompletionService::new().on("Reference documents", "RAG is retrieval + generation"),
        );
        let strategy = SimpleStrategy::new(deps, &StrategyConfig::new());
        let trace = TraceRecorder::new();

        let units = strategy.retrieve("what is RAG", 5, &trace).await.unwrap();
        let answer = strategy.generate("what is RAG", &units, &trace).await.unwrap();

        assert_eq!(units.len(), 1);
        assert_eq!(answer, "RAG is retrieval + generation");

        let call = &llm.calls()[0];
        assert!(call.transcript.contains("[Document 1]"));
        assert!((call.temperature - 0.7).abs() < 1e-6);
        assert_eq!(call.max_tokens, 2000);
    }

    #[tokio::test]
    async fn test_custom_system_prompt() {
        let (deps, llm) = deps(
            vec![hit("d", 0, "text", 0.9)],
            ScriptedCompletionService::new().with_fallback("ok"),
        );
        let config = StrategyConfig::new().with("systemPrompt", "Answer like a pirate");
        let strategy = SimpleStrategy::new(deps, &config);
        let trace = TraceRecorder::new();

        let units = strategy.retrieve("q", 5, &trace).await.unwrap();
        strategy.generate("q", &units, &trace).await.unwrap();

        assert!(llm.calls()[0].transcript.starts_with("Answer like a pirate"));
    }

    #[tokio::test]
    async fn test_empty_retrieval_returns_fixed_answer() {
        let (deps, llm) = deps(vec![], ScriptedCompletionService::new());
        let strategy = SimpleStrategy::new(deps, &StrategyConfig::new());
        let trace = TraceRecorder::new();

        let units = strategy.retrieve("q", 5, &trace).await.unwrap();
        let answer = strategy.generate("q", &units, &trace).await.unwrap();

        assert!(units.is_empty());
        assert_eq!(answer, NO_INFORMATION_ANSWER);
        assert!(llm.calls().is_empty());
    }
}
