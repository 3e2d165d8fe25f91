use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::search::Hit;

/// A piece of evidence handed from retrieval to generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedUnit {
    pub id: String,
    pub content: String,
    /// Strategy-specific score; not comparable across strategies
    pub score: f32,
    #[serde(default)]
    pub source_metadata: Map<String, Value>,
}

impl RetrievedUnit {
    pub fn new(id: impl Into<String>, content: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            score,
            source_metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.source_metadata.insert(key.into(), value.into());
        self
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.source_metadata.insert(key.into(), value.into());
    }

    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.source_metadata.get(key)
    }

    pub fn metadata_f32(&self, key: &str) -> Option<f32> {
        self.metadata(key).and_then(Value::as_f64).map(|v| v as f32)
    }

    pub fn doc_id(&self) -> Option<&str> {
        self.metadata("docId").and_then(Value::as_str)
    }

    pub fn source_name(&self) -> Option<&str> {
        self.metadata("sourceName").and_then(Value::as_str)
    }

    pub fn chunk_index(&self) -> Option<usize> {
        self.metadata("chunkIndex")
            .and_then(Value::as_u64)
            .map(|v| v as usize)
    }
}

impl From<Hit> for RetrievedUnit {
    fn from(hit: Hit) -> Self {
        Self::new(hit.id, hit.content, hit.score)
            .with_metadata("docId", hit.doc_id)
            .with_metadata("sourceName", hit.source_name)
            .with_metadata("chunkIndex", hit.index)
    }
}
