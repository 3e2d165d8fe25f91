use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

use super::Hit;
use crate::domain::DomainError;

/// Similarity search over chunked documents.
///
/// `filter` restricts results to one document id when set. Results are
/// ordered by descending score.
#[async_trait]
pub trait SearchBackend: Send + Sync + Debug {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<Hit>, DomainError>;
}

/// Read-only handle that applies a fixed document scope to every search
#[derive(Debug, Clone)]
pub struct ScopedSearch {
    inner: Arc<dyn SearchBackend>,
    scope: Option<String>,
}

impl ScopedSearch {
    pub fn new(inner: Arc<dyn SearchBackend>, scope: Option<String>) -> Self {
        Self { inner, scope }
    }
}

#[async_trait]
impl SearchBackend for ScopedSearch {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<Hit>, DomainError> {
        self.inner
            .search(query, top_k, filter.or(self.scope.as_deref()))
            .await
    }
}
