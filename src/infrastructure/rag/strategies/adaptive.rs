//! Adaptive routing: classify the query, then run the matching retrieval recipe

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::domain::{
    DomainError, RetrievedUnit, SearchBackend, Strategy, StrategyConfig, StrategyKind,
    TraceRecorder,
};
use crate::infrastructure::rag::context::{
    StrategyDeps, ask, generate_grounded_answer, parse_list, vector_search,
};

const CLASSIFY_SYSTEM_PROMPT: &str = "You are a query classification expert. Classify the query \
into exactly one of these categories:\n\
- Factual: asks for specific, verifiable information (\"what is\", \"how is it defined\")\n\
- Analytical: needs comprehensive analysis or explanation (\"why\", \"how does it affect\")\n\
- Opinion: subjective or seeks multiple viewpoints (\"what do you think\", \"pros and cons\")\n\
- Contextual: depends on the user's specific situation (\"is it right for me\", \"how to apply\")\n\
Return only the category name.";

const FACTUAL_REWRITE_PROMPT: &str = "You sharpen search queries. Rewrite the query to be more \
precise, focusing on the key entities. Return only the rewritten query.";

const ANALYTICAL_PROMPT: &str = "You break complex questions down. Generate 3 sub-questions that \
explore different dimensions of the query, one per line.";

const OPINION_PROMPT: &str = "You analyse topics from several angles. Identify 3 distinct \
viewpoints on the topic, one per line.";

const CONTEXT_INFER_PROMPT: &str = "You infer the implicit context behind queries. Briefly \
describe the background the user is likely asking from.";

const CONTEXT_REWRITE_PROMPT: &str = "You merge context into queries. Rewrite the query so it \
includes the given context. Return only the rewritten query.";

/// Hits taken per sub-question or viewpoint
const HITS_PER_BRANCH: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryCategory {
    Factual,
    Analytical,
    Opinion,
    Contextual,
}

impl QueryCategory {
    const ALL: [QueryCategory; 4] = [
        Self::Factual,
        Self::Analytical,
        Self::Opinion,
        Self::Contextual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Factual => "Factual",
            Self::Analytical => "Analytical",
            Self::Opinion => "Opinion",
            Self::Contextual => "Contextual",
        }
    }

    /// First category name found in a classifier reply; Factual when none matches
    pub fn from_label(reply: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|c| reply.contains(c.as_str()))
            .unwrap_or(Self::Factual)
    }

    fn answer_prompt(&self) -> &'static str {
        match self {
            Self::Factual => {
                "You are a precise factual assistant. Give accurate, specific information \
                 based on the documents."
            }
            Self::Analytical => {
                "You are an analytical assistant. Give a thorough analysis based on the \
                 documents, covering multiple dimensions."
            }
            Self::Opinion => {
                "You are an impartial assistant. Present the different viewpoints and \
                 positions found in the documents in a balanced way."
            }
            Self::Contextual => {
                "You are a context-aware assistant. Tailor the answer to the specific \
                 situation implied by the question, based on the documents."
            }
        }
    }
}

#[derive(Debug)]
pub struct AdaptiveStrategy {
    deps: StrategyDeps,
    category: Mutex<Option<QueryCategory>>,
}

impl AdaptiveStrategy {
    pub fn new(deps: StrategyDeps, _config: &StrategyConfig) -> Self {
        Self {
            deps,
            category: Mutex::new(None),
        }
    }

    fn search(&self) -> &dyn SearchBackend {
        self.deps.search.as_ref()
    }

    async fn classify(&self, query: &str) -> QueryCategory {
        let user = format!("Classify this query: {}", query);
        match ask(self.deps.llm.as_ref(), CLASSIFY_SYSTEM_PROMPT, &user, 0.0, 50).await {
            Ok(reply) => QueryCategory::from_label(&reply),
            Err(e) => {
                warn!("Query classification failed, defaulting to Factual: {}", e);
                QueryCategory::Factual
            }
        }
    }

    async fn factual(
        &self,
        query: &str,
        top_k: usize,
        trace: &TraceRecorder,
    ) -> Result<Vec<RetrievedUnit>, DomainError> {
        let user = format!("Rewrite this query: {}", query);
        let search_query = match ask(self.deps.llm.as_ref(), FACTUAL_REWRITE_PROMPT, &user, 0.0, 200).await {
            Ok(rewritten) if !rewritten.trim().is_empty() => rewritten,
            Ok(_) => query.to_string(),
            Err(e) => {
                warn!("Factual rewrite failed, searching with original query: {}", e);
                query.to_string()
            }
        };

        vector_search(self.search(), &search_query, top_k, trace).await
    }

    async fn analytical(
        &self,
        query: &str,
        top_k: usize,
        trace: &TraceRecorder,
    ) -> Result<Vec<RetrievedUnit>, DomainError> {
        let user = format!("Generate sub-questions for: {}", query);
        let sub_questions = match ask(self.deps.llm.as_ref(), ANALYTICAL_PROMPT, &user, 0.3, 300).await {
            Ok(text) => parse_list(&text, 3),
            Err(e) => {
                warn!("Sub-question generation failed, using plain search: {}", e);
                return vector_search(self.search(), query, top_k, trace).await;
            }
        };

        let mut seen = HashSet::new();
        let mut units = Vec::new();

        for sub_question in &sub_questions {
            for unit in vector_search(self.search(), sub_question, HITS_PER_BRANCH, trace).await? {
                if seen.insert(unit.id.clone()) {
                    units.push(unit.with_metadata("subQuestion", sub_question.clone()));
                }
            }
        }

        if units.len() < top_k {
            for unit in vector_search(self.search(), query, top_k, trace).await? {
                if units.len() >= top_k {
                    break;
                }
                if seen.insert(unit.id.clone()) {
                    units.push(unit);
                }
            }
        }

        units.truncate(top_k);
        Ok(units)
    }

    async fn opinion(
        &self,
        query: &str,
        top_k: usize,
        trace: &TraceRecorder,
    ) -> Result<Vec<RetrievedUnit>, DomainError> {
        let user = format!("Identify viewpoints on: {}", query);
        let viewpoints = match ask(self.deps.llm.as_ref(), OPINION_PROMPT, &user, 0.3, 300).await {
            Ok(text) => parse_list(&text, 3),
            Err(e) => {
                warn!("Viewpoint generation failed, using plain search: {}", e);
                return vector_search(self.search(), query, top_k, trace).await;
            }
        };

        let mut seen = HashSet::new();
        let mut units = Vec::new();

        for viewpoint in &viewpoints {
            let combined = format!("{} {}", query, viewpoint);
            for unit in vector_search(self.search(), &combined, HITS_PER_BRANCH, trace).await? {
                if seen.insert(unit.id.clone()) {
                    units.push(unit.with_metadata("viewpoint", viewpoint.clone()));
                }
            }
        }

        units.truncate(top_k);
        Ok(units)
    }

    async fn contextual(
        &self,
        query: &str,
        top_k: usize,
        trace: &TraceRecorder,
    ) -> Result<Vec<RetrievedUnit>, DomainError> {
        let llm = self.deps.llm.as_ref();
        let inferred = ask(
            llm,
            CONTEXT_INFER_PROMPT,
            &format!("Infer the implicit context of: {}", query),
            0.1,
            200,
        )
        .await;

        let rewritten = match inferred {
            Ok(context) => {
                ask(
                    llm,
                    CONTEXT_REWRITE_PROMPT,
                    &format!("Query: {}\nContext: {}\nRewritten query:", query, context),
                    0.0,
                    200,
                )
                .await
            }
            Err(e) => Err(e),
        };

        let search_query = match rewritten {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => query.to_string(),
            Err(e) => {
                warn!("Contextual rewrite failed, searching with original query: {}", e);
                query.to_string()
            }
        };

        vector_search(self.search(), &search_query, top_k, trace).await
    }

    fn current_category(&self) -> Option<QueryCategory> {
        *self.category.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Strategy for AdaptiveStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Adaptive
    }

    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        trace: &TraceRecorder,
    ) -> Result<Vec<RetrievedUnit>, DomainError> {
        let category = self.classify(query).await;
        *self.category.lock().unwrap_or_else(|e| e.into_inner()) = Some(category);

        info!("Adaptive routing chose {}", category.as_str());
        trace.log_details(
            "classify",
            format!("Query classified as {}", category.as_str()),
            json!({ "category": category.as_str() }),
        );

        let units = match category {
            QueryCategory::Factual => self.factual(query, top_k, trace).await?,
            QueryCategory::Analytical => self.analytical(query, top_k, trace).await?,
            QueryCategory::Opinion => self.opinion(query, top_k, trace).await?,
            QueryCategory::Contextual => self.contextual(query, top_k, trace).await?,
        };

        Ok(units
            .into_iter()
            .map(|u| u.with_metadata("queryCategory", category.as_str()))
            .collect())
    }

    async fn generate(
        &self,
        query: &str,
        units: &[RetrievedUnit],
        trace: &TraceRecorder,
    ) -> Result<String, DomainError> {
        let category = self.current_category().unwrap_or(QueryCategory::Factual);

        generate_grounded_answer(
            self.deps.llm.as_ref(),
            query,
            units,
            category.answer_prompt(),
            trace,
        )
        .await
    }

    fn aux_metadata(&self) -> Map<String, Value> {
        let mut aux = Map::new();
        if let Some(category) = self.current_category() {
            aux.insert("queryCategory".into(), Value::from(category.as_str()));
        }
        aux
    }
}
