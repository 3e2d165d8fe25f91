//! RAG Arena
//!
//! Runs one query through several retrieve-then-generate strategies at once
//! and keeps an instrumented result per strategy:
//! - Seventeen interchangeable retrieval policies behind one contract
//! - Bounded-concurrency fan-out with per-task and per-request timeouts
//! - Append-only result sinks fed by a single writer task

pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use domain::{CompletionService, EmbeddingService, ProviderCompletionService, ResultSink};
use infrastructure::{
    embedding::{HashingEmbeddingService, OpenAiEmbeddingService},
    llm::{HttpClient, OpenAiProvider},
    rag::{DefaultStrategyFactory, Orchestrator, ResultWriter, StrategyDeps},
    search::{ChunkRecord, InMemorySearchBackend},
};
use tokio::task::JoinHandle;
use tracing::info;

/// How the engine is assembled for one run
#[derive(Default)]
pub struct EngineOptions {
    /// Use local hashing embeddings instead of the embeddings endpoint
    pub offline_embeddings: bool,
    /// Receives every successful result
    pub sink: Option<Arc<dyn ResultSink>>,
}

impl std::fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineOptions")
            .field("offline_embeddings", &self.offline_embeddings)
            .field("persisting", &self.sink.is_some())
            .finish()
    }
}

/// A ready orchestrator plus the writer task draining its sink
#[derive(Debug)]
pub struct Engine {
    pub orchestrator: Orchestrator,
    pub writer_handle: Option<JoinHandle<()>>,
}

/// Create the orchestrator with every service initialized
pub async fn create_engine(
    config: &AppConfig,
    records: Vec<ChunkRecord>,
    options: EngineOptions,
) -> anyhow::Result<Engine> {
    let http_client = HttpClient::with_timeout(Duration::from_secs(config.llm.timeout_secs))?;

    let llm = create_completion_service(config, http_client.clone())?;
    let embedder = create_embedding_service(config, http_client, options.offline_embeddings)?;

    let search = InMemorySearchBackend::build(embedder.clone(), records)
        .await
        .context("Failed to index corpus")?;
    info!("Search backend ready with {} chunks", search.len());

    let deps = StrategyDeps::new(Arc::new(search), llm, embedder);
    let factory = Arc::new(DefaultStrategyFactory::new(deps));

    let mut orchestrator =
        Orchestrator::new(factory).with_settings(config.engine.orchestrator_settings());

    let writer_handle = match options.sink {
        Some(sink) => {
            let (writer, handle) = ResultWriter::spawn(sink);
            orchestrator = orchestrator.with_writer(writer);
            Some(handle)
        }
        None => None,
    };

    Ok(Engine {
        orchestrator,
        writer_handle,
    })
}

fn create_completion_service(
    config: &AppConfig,
    http_client: HttpClient,
) -> anyhow::Result<Arc<dyn CompletionService>> {
    let api_key = config
        .llm
        .api_key
        .clone()
        .context("llm.api_key is not configured (set APP__LLM__API_KEY)")?;

    let provider = OpenAiProvider::with_base_url(http_client, api_key, &config.llm.base_url);
    info!(
        "Using completion model '{}' at {}",
        config.llm.model, config.llm.base_url
    );

    Ok(Arc::new(ProviderCompletionService::new(
        Arc::new(provider),
        &config.llm.model,
    )))
}

fn create_embedding_service(
    config: &AppConfig,
    http_client: HttpClient,
    offline: bool,
) -> anyhow::Result<Arc<dyn EmbeddingService>> {
    if offline {
        info!("Using offline hashing embeddings");
        return Ok(Arc::new(HashingEmbeddingService::default()));
    }

    let api_key = config
        .embedding
        .api_key
        .clone()
        .or_else(|| config.llm.api_key.clone())
        .context("embedding.api_key is not configured (set APP__EMBEDDING__API_KEY)")?;
    let base_url = config
        .embedding
        .base_url
        .clone()
        .unwrap_or_else(|| config.llm.base_url.clone());

    let service = OpenAiEmbeddingService::with_base_url(http_client, api_key, base_url)
        .with_model(&config.embedding.model);

    Ok(Arc::new(service))
}
