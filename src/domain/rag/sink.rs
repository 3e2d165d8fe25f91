use async_trait::async_trait;

use super::StrategyResult;
use crate::domain::DomainError;

#[cfg(test)]
use mockall::automock;

/// Append-only destination for finished strategy results
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Stores one result record
    async fn persist(&self, result: &StrategyResult) -> Result<(), DomainError>;
}
