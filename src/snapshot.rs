use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use crate::aggregator::{AggregatorConfig, AggregatorService};
use crate::constants::{REQUEST_TIMEOUT_SECS, UPSTREAM_BASE_URL};
use crate::format::{format_compact_usd, format_percent, format_price};
use crate::model::MarketSnapshot;
use crate::upstream::HttpMarketSource;

#[derive(Debug, Args, Clone)]
pub struct SnapshotArgs {
    /// Base URL of the price API
    #[arg(long, default_value = UPSTREAM_BASE_URL)]
    pub upstream_url: String,

    /// Upper bound on the request, in seconds
    #[arg(long, default_value_t = REQUEST_TIMEOUT_SECS)]
    pub timeout_secs: u64,
}

/// Run a single market refresh against the live upstream and print the result.
pub async fn run(args: SnapshotArgs) -> Result<()> {
    let config = AggregatorConfig {
        upstream_url: args.upstream_url,
        request_timeout: Duration::from_secs(args.timeout_secs.max(1)),
        enable_gateway: false,
        ..AggregatorConfig::default()
    };
    let source = HttpMarketSource::new(&config.upstream_url, config.request_timeout)
        .context("invalid upstream url")?;
    let service = AggregatorService::new(config, Arc::new(source));

    service
        .market_tick()
        .await
        .context("market refresh failed")?;

    let market = service.get_all_market_snapshots();
    let mut rows: Vec<&MarketSnapshot> = market.values().collect();
    rows.sort_by(|a, b| b.market_cap.total_cmp(&a.market_cap));

    println!("{}", render_table(&rows));
    Ok(())
}

/// Rows ordered as given, largest market cap first in normal use.
pub fn render_table(rows: &[&MarketSnapshot]) -> String {
    let mut out = format!(
        "{:<6} {:<14} {:>16} {:>9} {:>10} {:>10} {:>16} {:>16}",
        "SYMBOL", "NAME", "PRICE", "24H", "MCAP", "VOLUME", "HIGH", "LOW"
    );
    for snapshot in rows {
        out.push('\n');
        out.push_str(&format!(
            "{:<6} {:<14} {:>16} {:>9} {:>10} {:>10} {:>16} {:>16}",
            snapshot.symbol,
            snapshot.display_name,
            format_price(snapshot.price),
            format_percent(snapshot.change_24h_percent),
            format_compact_usd(snapshot.market_cap),
            format_compact_usd(snapshot.volume_24h),
            format_price(snapshot.high_24h),
            format_price(snapshot.low_24h),
        ));
    }
    out
}
