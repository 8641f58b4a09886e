use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::format;

/// Current market state for one tracked asset, keyed by `symbol`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    pub symbol: String,
    pub display_name: String,
    pub price: f64,
    pub change_24h_percent: f64,
    pub market_cap: f64,
    pub volume_24h: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub last_updated: DateTime<Utc>,
}

/// Symbol -> snapshot. Replaced wholesale per symbol on every successful market tick.
pub type MarketCache = HashMap<String, MarketSnapshot>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NewsCategory {
    Adoption,
    Tech,
    Defi,
    Regulation,
    Market,
    Institutional,
    Security,
}

impl fmt::Display for NewsCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NewsCategory::Adoption => "Adoption",
            NewsCategory::Tech => "Tech",
            NewsCategory::Defi => "DeFi",
            NewsCategory::Regulation => "Regulation",
            NewsCategory::Market => "Market",
            NewsCategory::Institutional => "Institutional",
            NewsCategory::Security => "Security",
        };
        f.pad(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    Bullish,
    Bearish,
    Neutral,
}

impl fmt::Display for Impact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Impact::Bullish => "bullish",
            Impact::Bearish => "bearish",
            Impact::Neutral => "neutral",
        };
        f.pad(label)
    }
}

/// One generated news item. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsArticle {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub category: NewsCategory,
    pub generated_at: DateTime<Utc>,
    /// Tie-breaker for items generated in the same instant; higher is newer.
    #[serde(skip)]
    pub sequence: u64,
    pub source: String,
    pub impact: Impact,
    pub relevant_coins: Vec<String>,
    pub url: Option<String>,
}

impl NewsArticle {
    /// Ordering key for the newest-first cache.
    pub fn recency(&self) -> (DateTime<Utc>, u64) {
        (self.generated_at, self.sequence)
    }

    /// Render the item for readers, computing the relative timestamp against `now`.
    pub fn view(&self, now: DateTime<Utc>) -> NewsItemView {
        NewsItemView {
            id: self.id.clone(),
            title: self.title.clone(),
            summary: self.summary.clone(),
            category: self.category,
            timestamp: format::relative_time(self.generated_at, now),
            published_at: self.generated_at,
            source: self.source.clone(),
            impact: self.impact,
            relevant_coins: self.relevant_coins.clone(),
            url: self.url.clone(),
        }
    }
}

/// Read-side rendering of a [`NewsArticle`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsItemView {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub category: NewsCategory,
    pub timestamp: String,
    pub published_at: DateTime<Utc>,
    pub source: String,
    pub impact: Impact,
    pub relevant_coins: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub url: Option<String>,
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn article(generated_at: DateTime<Utc>) -> NewsArticle {
        NewsArticle {
            id: "news-1".into(),
            title: "Bitcoin rallies".into(),
            summary: "Summary".into(),
            category: NewsCategory::Market,
            generated_at,
            sequence: 7,
            source: "CoinDesk".into(),
            impact: Impact::Bullish,
            relevant_coins: vec!["BTC".into()],
            url: None,
        }
    }

    #[test]
    fn snapshot_serialises_with_camel_case_keys() {
        let snapshot = MarketSnapshot {
            symbol: "BTC".into(),
            display_name: "Bitcoin".into(),
            price: 50_000.0,
            change_24h_percent: 2.5,
            market_cap: 1.0,
            volume_24h: 2.0,
            high_24h: 51_000.0,
            low_24h: 49_000.0,
            last_updated: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["displayName"], "Bitcoin");
        assert_eq!(value["change24hPercent"], 2.5);
        assert_eq!(value["volume24h"], 2.0);
        assert!(value.get("lastUpdated").is_some());
    }

    #[test]
    fn view_renders_relative_timestamp_at_read_time() {
        let generated = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let item = article(generated);

        assert_eq!(item.view(generated).timestamp, "Just now");
        assert_eq!(item.view(generated + Duration::minutes(5)).timestamp, "5m ago");
        assert_eq!(item.view(generated).published_at, generated);
    }

    #[test]
    fn labels_are_stable() {
        assert_eq!(NewsCategory::Defi.to_string(), "DeFi");
        assert_eq!(Impact::Bearish.to_string(), "bearish");
        assert_eq!(
            serde_json::to_value(NewsCategory::Regulation).unwrap(),
            "regulation"
        );
    }
}
