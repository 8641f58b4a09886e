use anyhow::Result;
use clap::Parser;
use market_aggregator::aggregator;
use market_aggregator::cli::{self, Cli};
use market_aggregator::logging;
use market_aggregator::snapshot;
use market_aggregator::tail;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("info")?;
    match Cli::parse().command() {
        cli::Command::Run(args) => aggregator::run_with_config(args.into_config()).await,
        cli::Command::Snapshot(args) => snapshot::run(args).await,
        cli::Command::Tail(args) => tail::run(args).await,
    }
}
