//! Infrastructure layer - provider clients, search backends and the strategy engine

pub mod embedding;
pub mod llm;
pub mod logging;
pub mod rag;
pub mod search;
pub mod text;

pub use logging::init_logging;
