//! Contextual chunk headers: prefix each hit with its source, position and a generated title

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::domain::{
    DomainError, RetrievedUnit, Strategy, StrategyConfig, StrategyKind, TraceRecorder,
};
use crate::infrastructure::rag::context::{
    StrategyDeps, ask, generate_grounded_answer, system_prompt_from, vector_search,
};
use crate::infrastructure::text::truncate_chars;

const TITLE_SYSTEM_PROMPT: &str = "Write a concise topic title for the given text passage. Keep \
it under 15 words, summarise the main content and highlight key information. Do not refer to \
\"this text\" or \"this passage\". Return only the title.";

const TITLE_PREVIEW_CHARS: usize = 300;

#[derive(Debug)]
pub struct ChunkHeadersStrategy {
    deps: StrategyDeps,
    system_prompt: String,
    include_source_name: bool,
}

impl ChunkHeadersStrategy {
    pub fn new(deps: StrategyDeps, config: &StrategyConfig) -> Self {
        Self {
            deps,
            system_prompt: system_prompt_from(config),
            include_source_name: config.bool_or("includeFilename", true),
        }
    }

    async fn header_for(&self, unit: &RetrievedUnit) -> String {
        let mut parts = Vec::with_capacity(3);
        if self.include_source_name {
            if let Some(source) = unit.source_name().filter(|s| !s.is_empty()) {
                parts.push(format!("[Document: {}]", source));
            }
        }
        parts.push(format!("[Chunk #{}]", unit.chunk_index().unwrap_or(0) + 1));

        let user = format!(
            "Write a topic title for this text:\n\n{}",
            truncate_chars(&unit.content, TITLE_PREVIEW_CHARS)
        );
        match ask(self.deps.llm.as_ref(), TITLE_SYSTEM_PROMPT, &user, 0.3, 50).await {
            Ok(title) if !title.trim().is_empty() => {
                parts.push(format!("[Topic: {}]", title.trim()));
            }
            Ok(_) => {}
            Err(e) => warn!("Title generation failed for {}: {}", unit.id, e),
        }

        parts.join(" ")
    }
}

#[async_trait]
impl Strategy for ChunkHeadersStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ContextualChunkHeaders
    }

    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        trace: &TraceRecorder,
    ) -> Result<Vec<RetrievedUnit>, DomainError> {
        let hits = vector_search(self.deps.search.as_ref(), query, top_k, trace).await?;
        let headers = join_all(hits.iter().map(|h| self.header_for(h))).await;

        let units: Vec<RetrievedUnit> = hits
            .into_iter()
            .zip(headers)
            .map(|(mut unit, header)| {
                debug!("Header for {}: {}", unit.id, header);
                unit.content = format!("{}\n\n{}", header, unit.content);
                unit.with_metadata("header", header)
                    .with_metadata("hasHeader", true)
            })
            .collect();

        trace.log("chunk_headers", format!("Added headers to {} units", units.len()));
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
