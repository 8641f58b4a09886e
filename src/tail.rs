use std::net::SocketAddr;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::Message;

use crate::aggregator::gateway::UpdateFrame;
use crate::constants::GATEWAY_PORT;
use crate::format::{format_compact_usd, format_percent, format_price};
use crate::model::{MarketSnapshot, NewsItemView};

#[derive(Debug, Args, Clone)]
pub struct TailArgs {
    /// Gateway address to connect to
    #[arg(long, default_value_t = SocketAddr::from(([127, 0, 0, 1], GATEWAY_PORT)))]
    pub addr: SocketAddr,

    /// Filter market rows to a single symbol (e.g. BTC)
    #[arg(short, long)]
    pub symbol: Option<String>,

    /// Stop after printing this many rows
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Print news items as well as market rows
    #[arg(long)]
    pub news: bool,
}

pub async fn run(args: TailArgs) -> Result<()> {
    let url = format!("ws://{}/ws", args.addr);
    let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .with_context(|| format!("failed to connect to {url}; run `market-aggregator run` first"))?;

    let filter = args.symbol.as_ref().map(|symbol| symbol.to_uppercase());
    let mut printed = 0usize;
    println!("Connected to {url}; streaming updates...");

    while let Some(message) = ws.next().await {
        let payload = match message? {
            Message::Text(payload) => payload,
            Message::Close(_) => break,
            _ => continue,
        };
        let frame: UpdateFrame =
            serde_json::from_str(&payload).context("gateway sent an unreadable frame")?;

        let lines = match frame {
            UpdateFrame::MarketUpdate(market) => market
                .values()
                .filter(|snapshot| filter.as_ref().map_or(true, |symbol| &snapshot.symbol == symbol))
                .map(market_line)
                .collect::<Vec<_>>(),
            UpdateFrame::NewsUpdate(items) if args.news => items.iter().map(news_line).collect(),
            UpdateFrame::NewsUpdate(_) => Vec::new(),
        };

        for line in lines {
            println!("{line}");
            printed += 1;
            if args.limit.is_some_and(|limit| printed >= limit) {
                return Ok(());
            }
        }
    }
    Ok(())
}

pub fn market_line(snapshot: &MarketSnapshot) -> String {
    format!(
        "{} | {:>6} | {:>16} | {:>8} | cap {:>9} | vol {:>9}",
        Utc::now().format("%H:%M:%S"),
        snapshot.symbol,
        format_price(snapshot.price),
        format_percent(snapshot.change_24h_percent),
        format_compact_usd(snapshot.market_cap),
        format_compact_usd(snapshot.volume_24h),
    )
}

fn news_line(item: &NewsItemView) -> String {
    format!(
        "{:>9} | {:<13} | {:<7} | {} ({})",
        item.timestamp, item.category, item.impact, item.title, item.source
    )
}
