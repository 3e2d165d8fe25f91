use std::time::Instant;

use serde_json::{Value, json};
use thiserror::Error;
use tracing::{info, warn};

use super::{ExecutionTraceEntry, Strategy, StrategyConfig, StrategyResult, TraceRecorder};
use crate::domain::DomainError;

/// A strategy run that stopped with an error, with the trace recorded so far
#[derive(Debug, Error)]
#[error("strategy '{technique_id}' failed: {error}")]
pub struct ExecutionFailure {
    pub technique_id: String,
    #[source]
    pub error: DomainError,
    pub partial_trace: Vec<ExecutionTraceEntry>,
}

/// Runs retrieve then generate with timing and a structured trace
#[derive(Debug, Default)]
pub struct InstrumentedExecutor {
    trace: TraceRecorder,
}

impl InstrumentedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn execute(
        &self,
        strategy: &dyn Strategy,
        query: &str,
        config: &StrategyConfig,
    ) -> Result<StrategyResult, ExecutionFailure> {
        let kind = strategy.kind();
        let top_k = config.top_k();

        self.trace.clear();
        let started = Instant::now();

        info!(technique = kind.id(), top_k, "Executing strategy");
        self.trace.log_details(
            "init",
            format!("Starting {}", kind.display_name()),
            json!({
                "techniqueId": kind.id(),
                "topK": top_k,
                "queryLength": query.chars().count(),
            }),
        );

        self.trace.log("retrieve_start", "Retrieving relevant content");
        let retrieve_started = Instant::now();
        let units = strategy
            .retrieve(query, top_k, &self.trace)
            .await
            .map_err(|e| self.failure(kind.id(), "retrieve", e))?;
        let retrieve_seconds = retrieve_started.elapsed().as_secs_f64();

        let top_scores: Vec<f32> = units.iter().take(5).map(|u| u.score).collect();
        self.trace.log_details(
            "retrieve_end",
            format!("Retrieved {} units", units.len()),
            json!({
                "count": units.len(),
                "topScores": top_scores,
                "seconds": retrieve_seconds,
            }),
        );

        self.trace.log("generate_start", "Generating answer");
        let generate_started = Instant::now();
        let answer = strategy
            .generate(query, &units, &self.trace)
            .await
            .map_err(|e| self.failure(kind.id(), "generate", e))?;
        let generate_seconds = generate_started.elapsed().as_secs_f64();

        self.trace.log_details(
            "generate_end",
            format!("Generated answer of {} characters", answer.chars().count()),
            json!({
                "answerLength": answer.chars().count(),
                "seconds": generate_seconds,
            }),
        );

        // Coarse clocks can report zero for very fast runs
        let total_seconds = started.elapsed().as_secs_f64().max(f64::MIN_POSITIVE);
        let retrieve_percent = retrieve_seconds / total_seconds * 100.0;
        let generate_percent = generate_seconds / total_seconds * 100.0;

        self.trace.log_details(
            "complete",
            format!("Finished in {:.3}s", total_seconds),
            json!({
                "totalSeconds": total_seconds,
                "retrieveSeconds": retrieve_seconds,
                "generateSeconds": generate_seconds,
                "retrievePercent": retrieve_percent,
                "generatePercent": generate_percent,
            }),
        );

        info!(
            technique = kind.id(),
            units = units.len(),
            seconds = total_seconds,
            "Strategy completed"
        );

        let mut aux_metadata = strategy.aux_metadata();
        aux_metadata.insert("techniqueName".into(), Value::from(kind.display_name()));
        aux_metadata.insert("topK".into(), Value::from(top_k));
        aux_metadata.insert("retrieveSeconds".into(), Value::from(retrieve_seconds));
        aux_metadata.insert("generateSeconds".into(), Value::from(generate_seconds));

        Ok(StrategyResult::new(
            kind.id(),
            query,
            answer,
            units,
            total_seconds,
            self.trace.take(),
            aux_metadata,
        ))
    }

    /// Entries recorded by the current or most recent run
    pub fn trace_len(&self) -> usize {
        self.trace.len()
    }

    fn failure(&self, technique_id: &str, phase: &str, error: DomainError) -> ExecutionFailure {
        warn!(technique = technique_id, phase, "Strategy failed: {}", error);
        self.trace.log_details(
            "error",
            format!("{} failed: {}", phase, error),
            json!({ "phase": phase }),
        );

        ExecutionFailure {
            technique_id: technique_id.to_string(),
            error,
            partial_trace: self.trace.take(),
        }
    }
}
