//! Brute-force cosine search over pre-embedded chunks

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{DomainError, EmbeddingService, Hit, SearchBackend, cosine_similarity};

/// A pre-chunked piece of a document, as loaded from a JSONL corpus file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub content: String,
    pub doc_id: String,
    #[serde(default)]
    pub source_name: Option<String>,
    pub index: usize,
}

impl ChunkRecord {
    pub fn new(doc_id: impl Into<String>, index: usize, content: impl Into<String>) -> Self {
        Self {
            id: None,
            content: content.into(),
            doc_id: doc_id.into(),
            source_name: None,
            index,
        }
    }

    pub fn with_source_name(mut self, source_name: impl Into<String>) -> Self {
        self.source_name = Some(source_name.into());
        self
    }

    /// Parses one record per non-empty line
    pub fn parse_jsonl(text: &str) -> Result<Vec<Self>, DomainError> {
        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|e| {
                    DomainError::validation(format!("Invalid chunk on line {}: {}", n + 1, e))
                })
            })
            .collect()
    }

    fn into_hit(self) -> Hit {
        let id = self
            .id
            .unwrap_or_else(|| format!("{}_{}", self.doc_id, self.index));
        let source_name = self.source_name.unwrap_or_else(|| self.doc_id.clone());

        Hit::new(id, self.content, self.doc_id, self.index).with_source_name(source_name)
    }
}

#[derive(Debug)]
struct IndexedChunk {
    hit: Hit,
    embedding: Vec<f32>,
}

/// In-process search backend for development and tests
#[derive(Debug)]
pub struct InMemorySearchBackend {
    embedder: Arc<dyn EmbeddingService>,
    chunks: Vec<IndexedChunk>,
}

impl InMemorySearchBackend {
    /// Embeds every record once and keeps the vectors in memory
    pub async fn build(
        embedder: Arc<dyn EmbeddingService>,
        records: Vec<ChunkRecord>,
    ) -> Result<Self, DomainError> {
        let texts: Vec<String> = records.iter().map(|r| r.content.clone()).collect();
        let embeddings = embedder.embed(&texts).await?;

        if embeddings.len() != records.len() {
            return Err(DomainError::provider(
                "embedding",
                format!(
                    "Expected {} embeddings, got {}",
                    records.len(),
                    embeddings.len()
                ),
            ));
        }

        let chunks: Vec<IndexedChunk> = records
            .into_iter()
            .zip(embeddings)
            .map(|(record, embedding)| IndexedChunk {
                hit: record.into_hit(),
                embedding,
            })
            .collect();

        info!("Indexed {} chunks in memory", chunks.len());

        Ok(Self { embedder, chunks })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[async_trait]
impl SearchBackend for InMemorySearchBackend {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<Hit>, DomainError> {
        if top_k == 0 || self.chunks.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self
            .embedder
            .embed_one(query)
            .await
            .map_err(|e| DomainError::search(format!("Failed to embed query: {}", e)))?;

        let mut hits: Vec<Hit> = self
            .chunks
            .iter()
            .filter(|c| filter.is_none_or(|doc| c.hit.doc_id == doc))
            .map(|c| {
                c.hit
                    .clone()
                    .with_score(cosine_similarity(&query_embedding, &c.embedding))
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);

        debug!(
            "In-memory search returned {} hits (filter: {:?})",
            hits.len(),
            filter
        );

        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::embedding::HashingEmbeddingService;

    async fn backend() -> InMemorySearchBackend {
        let records = vec![
            ChunkRecord::new("rag", 0, "RAG 是检索增强生成技术"),
            ChunkRecord::new("rag", 1, "检索增强生成结合向量检索与大模型"),
            ChunkRecord::new("cooking", 0, "Boil the pasta for ten minutes"),
        ];
        InMemorySearchBackend::build(Arc::new(HashingEmbeddingService::default()), records)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity() {
        let backend = backend().await;

        let hits = backend.search("什么是RAG", 3, None).await.unwrap();

        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].id, "rag_0");
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_search_honours_filter_and_top_k() {
        let backend = backend().await;

        let hits = backend.search("pasta", 5, Some("rag")).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.doc_id == "rag"));

        let hits = backend.search("pasta", 1, None).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_parse_jsonl() {
        let text = r#"{"content": "a", "docId": "d", "index": 0}

{"id": "x", "content": "b", "docId": "d", "sourceName": "d.md", "index": 1}"#;

        let records = ChunkRecord::parse_jsonl(text).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].source_name.as_deref(), Some("d.md"));

        let err = ChunkRecord::parse_jsonl("{not json").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }
}
