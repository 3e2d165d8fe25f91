//! Strategy contract, execution instrumentation and the result/trace model

mod config;
mod executor;
mod memo;
mod result;
mod sink;
mod strategy;
mod trace;
mod unit;

pub use config::{DEFAULT_TOP_K, StrategyConfig};
pub use executor::{ExecutionFailure, InstrumentedExecutor};
pub use memo::MemoArena;
pub use result::StrategyResult;
pub use sink::ResultSink;
pub use strategy::{Strategy, StrategyFactory, StrategyKind};
pub use trace::{ExecutionTraceEntry, TraceRecorder};
pub use unit::RetrievedUnit;

#[cfg(test)]
pub use sink::MockResultSink;

/// Answer returned when no evidence survives retrieval
pub const NO_INFORMATION_ANSWER: &str =
    "Sorry, I could not find any relevant information to answer this question.";
