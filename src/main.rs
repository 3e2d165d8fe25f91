use clap::Parser;
use rag_arena::cli::{self, Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Query(args) => cli::query::run(args).await,
        Command::Strategies => cli::strategies::run(),
    }
}
