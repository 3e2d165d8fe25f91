//! Strategy implementations, the fan-out orchestrator and result sinks

pub mod context;
pub mod factory;
pub mod lexical;
pub mod orchestrator;
pub mod sink;
pub mod strategies;

pub use context::StrategyDeps;
pub use factory::DefaultStrategyFactory;
pub use orchestrator::{
    DEFAULT_CONCURRENCY, DEFAULT_TASK_TIMEOUT, FanOutOutcome, Orchestrator, OrchestratorError,
    OrchestratorSettings, QueryRequest, TaskFailure,
};
pub use sink::{InMemoryResultSink, JsonlResultSink, ResultWriter};
