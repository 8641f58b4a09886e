use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::aggregator::AggregatorConfig;
use crate::snapshot::SnapshotArgs;
use crate::tail::TailArgs;

#[derive(Debug, Parser)]
#[command(author, version, about = "Crypto market and news aggregation service")]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

impl Cli {
    pub fn command(self) -> Command {
        self.command.unwrap_or_default()
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the market and news pipelines behind the HTTP/WebSocket gateway
    Run(RunArgs),
    /// Fetch one market refresh and print it as a table
    Snapshot(SnapshotArgs),
    /// Connect to a running gateway and print live updates
    Tail(TailArgs),
}

impl Default for Command {
    fn default() -> Self {
        Command::Run(RunArgs::default())
    }
}

#[derive(Debug, Args, Clone, Default)]
pub struct RunArgs {
    /// Gateway listen address (default 127.0.0.1:9001)
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    /// Base URL of the price API
    #[arg(long)]
    pub upstream_url: Option<String>,

    /// Seconds between market refreshes
    #[arg(long)]
    pub market_interval_secs: Option<u64>,

    /// Seconds between news batches
    #[arg(long)]
    pub news_interval_secs: Option<u64>,

    /// Upper bound on one upstream request, in seconds
    #[arg(long)]
    pub request_timeout_secs: Option<u64>,

    /// Keep the pipelines running without serving the gateway
    #[arg(long)]
    pub no_gateway: bool,
}

impl RunArgs {
    /// Overlay the flags that were given on top of the defaults.
    pub fn into_config(self) -> AggregatorConfig {
        let mut config = AggregatorConfig::default();
        if let Some(bind) = self.bind {
            config.gateway_addr = bind;
        }
        if let Some(url) = self.upstream_url {
            config.upstream_url = url;
        }
        if let Some(secs) = self.market_interval_secs {
            config.market_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = self.news_interval_secs {
            config.news_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = self.request_timeout_secs {
            config.request_timeout = Duration::from_secs(secs.max(1));
        }
        config.enable_gateway = !self.no_gateway;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_invocation_runs_with_defaults() {
        let cli = Cli::parse_from(["market-aggregator"]);
        match cli.command() {
            Command::Run(args) => {
                let config = args.into_config();
                assert!(config.enable_gateway);
                assert_eq!(config.market_interval, Duration::from_secs(30));
                assert_eq!(config.news_interval, Duration::from_secs(60));
            }
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn run_flags_override_defaults() {
        let cli = Cli::parse_from([
            "market-aggregator",
            "run",
            "--bind",
            "0.0.0.0:8080",
            "--market-interval-secs",
            "5",
            "--request-timeout-secs",
            "0",
            "--no-gateway",
        ]);
        let Command::Run(args) = cli.command() else {
            panic!("expected run");
        };
        let config = args.into_config();
        assert_eq!(config.gateway_addr, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.market_interval, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(1));
        assert!(!config.enable_gateway);
    }

    #[test]
    fn tail_accepts_filters() {
        let cli = Cli::parse_from(["market-aggregator", "tail", "--symbol", "btc", "--limit", "3"]);
        let Command::Tail(args) = cli.command() else {
            panic!("expected tail");
        };
        assert_eq!(args.symbol.as_deref(), Some("btc"));
        assert_eq!(args.limit, Some(3));
        assert!(!args.news);
    }
}
