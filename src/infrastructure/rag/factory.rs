use tracing::debug;

use super::context::StrategyDeps;
use super::strategies::*;
use crate::domain::{DomainError, Strategy, StrategyConfig, StrategyFactory, StrategyKind};

/// Builds strategy instances over one set of shared services
#[derive(Debug, Clone)]
pub struct DefaultStrategyFactory {
    deps: StrategyDeps,
}

impl DefaultStrategyFactory {
    pub fn new(deps: StrategyDeps) -> Self {
        Self { deps }
    }
}

impl StrategyFactory for DefaultStrategyFactory {
    fn create(
        &self,
        kind: StrategyKind,
        config: &StrategyConfig,
        scope: Option<&str>,
    ) -> Result<Box<dyn Strategy>, DomainError> {
        debug!("Creating {} strategy (scope: {:?})", kind, scope);
        let deps = self.deps.scoped(scope);

        let strategy: Box<dyn Strategy> = match kind {
            StrategyKind::Simple => Box::new(SimpleStrategy::new(deps, config)),
            StrategyKind::Fusion => Box::new(FusionStrategy::new(deps, config)),
            StrategyKind::Reranker => Box::new(RerankStrategy::new(deps, config)),
            StrategyKind::Hyde => Box::new(HydeStrategy::new(deps, config)),
            StrategyKind::ContextualCompression => Box::new(CompressionStrategy::new(deps, config)),
            StrategyKind::QueryTransformation => Box::new(QueryTransformStrategy::new(deps, config)),
            StrategyKind::Adaptive => Box::new(AdaptiveStrategy::new(deps, config)),
            StrategyKind::Crag => Box::new(CragStrategy::new(deps, config)),
            StrategyKind::SelfRag => Box::new(SelfRagStrategy::new(deps, config)),
            StrategyKind::ContextEnriched => Box::new(ContextEnrichedStrategy::new(deps, config)),
            StrategyKind::ContextualChunkHeaders => Box::new(ChunkHeadersStrategy::new(deps, config)),
            StrategyKind::Hierarchical => Box::new(HierarchicalStrategy::new(deps, config)),
            StrategyKind::Graph => Box::new(GraphStrategy::new(deps, config)),
            StrategyKind::Rse => Box::new(SegmentStrategy::new(deps, config)),
            StrategyKind::ChunkSizeSelector => Box::new(ChunkSizeStrategy::new(deps, config)),
            StrategyKind::PropositionChunking => Box::new(PropositionStrategy::new(deps, config)),
            StrategyKind::DocAugmentation => Box::new(DocAugmentationStrategy::new(deps, config)),
        };

        Ok(strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::llm::ScriptedCompletionService;
    use crate::infrastructure::rag::context::testing::deps;

    #[test]
    fn test_creates_every_kind() {
        let (deps, _) = deps(vec![], ScriptedCompletionService::new());
        let factory = DefaultStrategyFactory::new(deps);

        for kind in StrategyKind::ALL {
            let strategy = factory
                .create(kind, &StrategyConfig::new(), Some("doc"))
                .unwrap();
            assert_eq!(strategy.kind(), kind);
        }
    }
}
