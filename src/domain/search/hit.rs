use serde::{Deserialize, Serialize};

/// One chunk returned by a similarity search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hit {
    pub id: String,
    pub content: String,
    /// Similarity score; higher is closer
    pub score: f32,
    pub doc_id: String,
    pub source_name: String,
    /// Position of the chunk inside its document
    pub index: usize,
}

impl Hit {
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        doc_id: impl Into<String>,
        index: usize,
    ) -> Self {
        let doc_id = doc_id.into();
        Self {
            id: id.into(),
            content: content.into(),
            score: 0.0,
            source_name: doc_id.clone(),
            doc_id,
            index,
        }
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    pub fn with_source_name(mut self, source_name: impl Into<String>) -> Self {
        self.source_name = source_name.into();
        self
    }
}
