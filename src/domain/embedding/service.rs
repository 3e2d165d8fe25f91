use async_trait::async_trait;
use std::fmt::Debug;

use crate::domain::DomainError;

/// Batch text embedding; output order matches input order
#[async_trait]
pub trait EmbeddingService: Send + Sync + Debug {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DomainError>;

    /// Embed one text
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, DomainError> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| DomainError::provider("embedding", "Empty embedding response"))
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns fixed vectors for known texts and a default vector otherwise
    #[derive(Debug)]
    pub struct MockEmbeddingService {
        vectors: HashMap<String, Vec<f32>>,
        default_vector: Vec<f32>,
        error: Option<String>,
        calls: AtomicUsize,
    }

    impl MockEmbeddingService {
        pub fn new(default_vector: Vec<f32>) -> Self {
            Self {
                vectors: HashMap::new(),
                default_vector,
                error: None,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn with_vector(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
            self.vectors.insert(text.into(), vector);
            self
        }

        pub fn with_error(mut self, error: impl Into<String>) -> Self {
            self.error = Some(error.into());
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EmbeddingService for MockEmbeddingService {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DomainError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if let Some(ref error) = self.error {
                return Err(DomainError::provider("mock", error));
            }

            Ok(texts
                .iter()
                .map(|t| {
                    self.vectors
                        .get(t)
                        .cloned()
                        .unwrap_or_else(|| self.default_vector.clone())
                })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockEmbeddingService;
    use super::*;

    #[tokio::test]
    async fn test_embed_one_uses_batch_call() {
        let service = MockEmbeddingService::new(vec![0.0, 1.0]).with_vector("rag", vec![1.0, 0.0]);

        assert_eq!(service.embed_one("rag").await.unwrap(), vec![1.0, 0.0]);
        assert_eq!(service.embed_one("other").await.unwrap(), vec![0.0, 1.0]);
        assert_eq!(service.call_count(), 2);
    }
}
