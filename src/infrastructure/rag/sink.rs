//! Result persistence: in-memory and JSONL sinks behind a single writer task

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::domain::{DomainError, ResultSink, StrategyResult};

const WRITER_BUFFER: usize = 64;

/// Keeps results in memory; used by the CLI and tests
#[derive(Debug, Default)]
pub struct InMemoryResultSink {
    results: Mutex<Vec<StrategyResult>>,
}

impl InMemoryResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<StrategyResult> {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ResultSink for InMemoryResultSink {
    async fn persist(&self, result: &StrategyResult) -> Result<(), DomainError> {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(result.clone());
        Ok(())
    }
}

/// Appends one JSON document per line to a file
#[derive(Debug, Clone)]
pub struct JsonlResultSink {
    path: PathBuf,
}

impl JsonlResultSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ResultSink for JsonlResultSink {
    async fn persist(&self, result: &StrategyResult) -> Result<(), DomainError> {
        let mut line = serde_json::to_string(result)
            .map_err(|e| DomainError::storage(format!("Failed to encode result: {}", e)))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                DomainError::storage(format!("Failed to open {}: {}", self.path.display(), e))
            })?;

        file.write_all(line.as_bytes())
            .await
            .map_err(|e| DomainError::storage(format!("Failed to append result: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| DomainError::storage(format!("Failed to flush results: {}", e)))?;

        Ok(())
    }
}

struct PersistRequest {
    result: StrategyResult,
    ack: oneshot::Sender<Result<(), DomainError>>,
}

impl std::fmt::Debug for PersistRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistRequest")
            .field("result", &self.result.id())
            .finish()
    }
}

/// Serializes all writes to a sink through one task.
///
/// Cloning the handle shares the same writer. The task exits once every
/// handle is dropped.
#[derive(Debug, Clone)]
pub struct ResultWriter {
    tx: mpsc::Sender<PersistRequest>,
}

impl ResultWriter {
    /// Starts the writer task for `sink`
    pub fn spawn(sink: Arc<dyn ResultSink>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<PersistRequest>(WRITER_BUFFER);

        let handle = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let outcome = sink.persist(&request.result).await;
                if let Err(ref e) = outcome {
                    error!("Failed to persist result {}: {}", request.result.id(), e);
                } else {
                    debug!("Persisted result {}", request.result.id());
                }
                // The requester may have timed out and gone away
                let _ = request.ack.send(outcome);
            }
            debug!("Result writer stopped");
        });

        (Self { tx }, handle)
    }

    /// Queues `result` and waits until the sink has stored it
    pub async fn persist(&self, result: StrategyResult) -> Result<(), DomainError> {
        let (ack, done) = oneshot::channel();

        self.tx
            .send(PersistRequest { result, ack })
            .await
            .map_err(|_| DomainError::storage("Result writer is not running"))?;

        done.await
            .map_err(|_| DomainError::storage("Result writer dropped the request"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MockResultSink;
    use serde_json::Map;

    fn result(technique: &str) -> StrategyResult {
        StrategyResult::new(technique, "q", "a", vec![], 0.5, vec![], Map::new())
    }

    #[tokio::test]
    async fn test_writer_forwards_to_sink() {
        let mut sink = MockResultSink::new();
        sink.expect_persist()
            .times(2)
            .returning(|_| Ok(()));

        let (writer, handle) = ResultWriter::spawn(Arc::new(sink));
        writer.persist(result("simple")).await.unwrap();
        writer.persist(result("fusion")).await.unwrap();

        drop(writer);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_writer_reports_sink_failure() {
        let mut sink = MockResultSink::new();
        sink.expect_persist()
            .returning(|_| Err(DomainError::storage("disk full")));

        let (writer, _handle) = ResultWriter::spawn(Arc::new(sink));
        let outcome = writer.persist(result("simple")).await;

        assert!(matches!(outcome, Err(DomainError::Storage { .. })));
    }

    #[tokio::test]
    async fn test_jsonl_sink_appends_lines() {
        let path = std::env::temp_dir().join(format!("rag-arena-{}.jsonl", uuid::Uuid::new_v4()));
        let sink = JsonlResultSink::new(&path);

        sink.persist(&result("simple")).await.unwrap();
        sink.persist(&result("crag")).await.unwrap();

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["techniqueId"], "crag");

        tokio::fs::remove_file(&path).await.unwrap();
    }
}
