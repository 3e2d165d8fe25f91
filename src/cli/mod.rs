//! CLI module for RAG Arena
//!
//! Provides subcommands for:
//! - `query`: fan one query out across strategies and print the results
//! - `strategies`: list the strategy identifiers the engine accepts

pub mod query;
pub mod strategies;

use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::infrastructure::logging;

/// RAG Arena - compare retrieve-then-generate strategies on one query
#[derive(Parser)]
#[command(name = "rag-arena")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a query through one or more strategies
    Query(query::QueryArgs),

    /// List available strategies
    Strategies,
}

/// Loads `.env`, layered configuration and the log subscriber
pub(crate) fn bootstrap() -> AppConfig {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().unwrap_or_default();
    logging::init_logging(&config.logging);

    config
}
