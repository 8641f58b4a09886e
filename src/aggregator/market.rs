use chrono::{DateTime, Utc};
use serde_json::json;

use crate::logging;
use crate::model::{MarketCache, MarketSnapshot};
use crate::symbols::SymbolMap;
use crate::upstream::{FetchError, QuoteBatch, UpstreamQuote};

/// Turn one upstream batch into snapshots stamped with `now`.
///
/// A quote with a non-positive or non-finite price is logged and skipped; the
/// rest of the batch still lands. The batch fails only when it had quotes and
/// none of them were usable. An empty batch is a successful no-op.
pub fn normalize_quotes(
    batch: QuoteBatch,
    symbols: &SymbolMap,
    now: DateTime<Utc>,
) -> Result<Vec<MarketSnapshot>, FetchError> {
    let received = batch.len();
    let mut entries: Vec<(String, UpstreamQuote)> = batch.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut snapshots = Vec::with_capacity(received);
    for (upstream_id, quote) in entries {
        if !quote.price.is_finite() || quote.price <= 0.0 {
            logging::warn(
                "market.quote_skipped",
                "Upstream quote has no usable price, skipping it",
                json!({ "upstream_id": upstream_id, "price": quote.price.to_string() }),
            );
            continue;
        }
        snapshots.push(to_snapshot(&upstream_id, quote, symbols, now));
    }

    if received > 0 && snapshots.is_empty() {
        return Err(FetchError::Payload(format!(
            "none of {received} upstream quotes carried a positive price"
        )));
    }
    Ok(snapshots)
}

fn to_snapshot(
    upstream_id: &str,
    quote: UpstreamQuote,
    symbols: &SymbolMap,
    now: DateTime<Utc>,
) -> MarketSnapshot {
    let resolved = symbols.resolve(upstream_id);
    if !resolved.known {
        logging::warn(
            "market.unknown_id",
            "Upstream id missing from symbol map, using fallback symbol",
            json!({ "upstream_id": upstream_id, "symbol": resolved.symbol }),
        );
    }

    MarketSnapshot {
        symbol: resolved.symbol,
        display_name: resolved.display_name,
        price: quote.price,
        change_24h_percent: quote.change_24h.unwrap_or(0.0),
        market_cap: quote.market_cap.unwrap_or(0.0),
        volume_24h: quote.volume_24h.unwrap_or(0.0),
        high_24h: quote.high_24h.unwrap_or(quote.price),
        low_24h: quote.low_24h.unwrap_or(quote.price),
        last_updated: now,
    }
}

/// Copy of `previous` with every snapshot in `fresh` replacing its symbol's entry.
/// Symbols absent from `fresh` keep their previous (stale) entry.
pub fn apply_snapshots(previous: &MarketCache, fresh: Vec<MarketSnapshot>) -> MarketCache {
    let mut next = previous.clone();
    for snapshot in fresh {
        next.insert(snapshot.symbol.clone(), snapshot);
    }
    next
}
