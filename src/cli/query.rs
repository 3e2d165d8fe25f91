//! Query command - runs one fan-out and prints the outcome as JSON

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Args;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::domain::{ResultSink, StrategyConfig};
use crate::infrastructure::rag::{JsonlResultSink, OrchestratorError, QueryRequest};
use crate::infrastructure::search::ChunkRecord;
use crate::{EngineOptions, create_engine};

const DEMO_DOC_ID: &str = "rag-intro";

const DEMO_CORPUS: &[&str] = &[
    "RAG（检索增强生成）是一种将信息检索与文本生成结合的技术。模型在回答之前先从外部知识库中检索相关文档。",
    "Retrieval-Augmented Generation grounds a language model's answer in passages fetched from a document collection at query time.",
    "检索阶段通常使用向量相似度搜索，将查询和文档块编码为嵌入向量，再按余弦相似度排序。",
    "Hybrid retrieval fuses dense vector scores with lexical BM25 scores so that exact keyword matches are not lost.",
    "生成阶段把检索到的文档块作为上下文提供给大语言模型，从而减少幻觉并引用最新信息。",
    "Corrective and self-reflective variants grade retrieved passages and rewrite the query or skip retrieval when evidence is weak.",
];

/// Arguments for the query command
#[derive(Args, Clone, Debug)]
pub struct QueryArgs {
    /// The question to answer
    pub query: String,

    /// Comma-separated strategy identifiers (see `rag-arena strategies`)
    #[arg(long, short, value_delimiter = ',', default_value = "simple")]
    pub strategies: Vec<String>,

    /// JSONL file with one chunk per line; a small built-in corpus when omitted
    #[arg(long)]
    pub corpus: Option<PathBuf>,

    /// Restrict every search to one document id
    #[arg(long)]
    pub scope: Option<String>,

    /// Maximum strategies running at once (overrides config)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Units each strategy returns (overrides config)
    #[arg(long)]
    pub top_k: Option<usize>,

    /// Strategy parameter as key=value; values are parsed as JSON when possible
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,

    /// Append successful results to this JSONL file
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Use local hashing embeddings instead of the embeddings endpoint
    #[arg(long)]
    pub offline: bool,
}

/// Run the query command
pub async fn run(args: QueryArgs) -> anyhow::Result<()> {
    let config = super::bootstrap();

    let records = match &args.corpus {
        Some(path) => load_corpus(path).await?,
        None => demo_corpus(),
    };
    if records.is_empty() {
        bail!("Corpus is empty");
    }

    let sink = args
        .output
        .as_ref()
        .map(|path| Arc::new(JsonlResultSink::new(path)) as Arc<dyn ResultSink>);

    let engine = create_engine(
        &config,
        records,
        EngineOptions {
            offline_embeddings: args.offline,
            sink,
        },
    )
    .await?;

    let top_k = args.top_k.unwrap_or(config.engine.default_top_k);
    let request = build_request(&args, top_k)?;

    let outcome = engine.orchestrator.run(request).await;

    // Dropping the orchestrator closes the writer channel so the sink drains
    drop(engine.orchestrator);
    if let Some(handle) = engine.writer_handle {
        handle.await.context("Result writer task failed")?;
    }

    match outcome {
        Ok(outcome) => {
            if outcome.degraded() {
                warn!(
                    "{} of {} strategies failed",
                    outcome.failures.len(),
                    outcome.requested
                );
            }
            info!("Completed {} strategies", outcome.results.len());
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Err(e) => {
            if let OrchestratorError::AllFailed { failures, .. }
            | OrchestratorError::Timeout { failures, .. } = &e
            {
                for failure in failures {
                    error!(technique = failure.technique_id.as_str(), "{}", failure.reason);
                }
            }
            Err(e.into())
        }
    }
}

fn build_request(args: &QueryArgs, top_k: usize) -> anyhow::Result<QueryRequest> {
    let mut strategy_config = StrategyConfig::new().with("topK", top_k);
    for pair in &args.set {
        let (key, value) = parse_param(pair)?;
        strategy_config.set(key, value);
    }

    let mut request = QueryRequest::new(&args.query, args.strategies.iter().map(|s| s.trim()))
        .with_config(strategy_config);

    if let Some(scope) = &args.scope {
        request = request.with_scope(scope);
    }
    if let Some(concurrency) = args.concurrency {
        request = request.with_concurrency(concurrency);
    }

    Ok(request)
}

fn parse_param(pair: &str) -> anyhow::Result<(String, Value)> {
    let (key, raw) = pair
        .split_once('=')
        .with_context(|| format!("Expected KEY=VALUE, got '{}'", pair))?;

    let key = key.trim();
    if key.is_empty() {
        bail!("Empty parameter name in '{}'", pair);
    }

    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));

    Ok((key.to_string(), value))
}

async fn load_corpus(path: &Path) -> anyhow::Result<Vec<ChunkRecord>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read corpus {}", path.display()))?;

    let records = ChunkRecord::parse_jsonl(&text)?;
    info!("Loaded {} chunks from {}", records.len(), path.display());

    Ok(records)
}

fn demo_corpus() -> Vec<ChunkRecord> {
    DEMO_CORPUS
        .iter()
        .enumerate()
        .map(|(index, content)| {
            ChunkRecord::new(DEMO_DOC_ID, index, *content).with_source_name("rag-intro.md")
        })
        .collect()
}
