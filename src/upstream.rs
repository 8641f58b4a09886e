//! Upstream price source: the injectable trait the market pipeline polls, plus
//! the HTTP implementation used in production.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use url::Url;

use crate::constants::QUOTE_CURRENCY;
use crate::logging;

/// Everything that can go wrong while fetching one market batch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport failure (DNS, connect, reset, client-side timeout).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The configured base URL could not be parsed or joined.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// The upstream answered with a non-success status.
    #[error("Unexpected response status: {status} at {url}")]
    Status { status: u16, url: String },

    /// The body was not the expected id -> quote mapping.
    #[error("Malformed payload: {0}")]
    Payload(String),

    /// The call outlived the per-request budget.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

impl FetchError {
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Http(err) if err.is_timeout() => "timeout",
            FetchError::Http(_) => "transport",
            FetchError::Url(_) => "config",
            FetchError::Status { .. } => "status",
            FetchError::Payload(_) => "payload",
            FetchError::Timeout(_) => "timeout",
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            FetchError::Http(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }
}

/// One upstream quote. Accepts both CoinGecko `simple/price` keys and the
/// generic camelCase names.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UpstreamQuote {
    #[serde(alias = "usd")]
    pub price: f64,
    #[serde(default, alias = "usd_24h_change", alias = "change24h")]
    pub change_24h: Option<f64>,
    #[serde(default, alias = "usd_market_cap", alias = "marketCap")]
    pub market_cap: Option<f64>,
    #[serde(default, alias = "usd_24h_vol", alias = "volume24h")]
    pub volume_24h: Option<f64>,
    #[serde(default, alias = "usd_24h_high", alias = "high24h")]
    pub high_24h: Option<f64>,
    #[serde(default, alias = "usd_24h_low", alias = "low24h")]
    pub low_24h: Option<f64>,
}

impl UpstreamQuote {
    pub fn new(price: f64) -> Self {
        Self {
            price,
            change_24h: None,
            market_cap: None,
            volume_24h: None,
            high_24h: None,
            low_24h: None,
        }
    }
}

/// Upstream id -> quote, exactly as returned by one batched call.
pub type QuoteBatch = HashMap<String, UpstreamQuote>;

/// Parse a `simple/price` body entry by entry.
///
/// An entry that does not decode as a quote (CoinGecko answers `{}` for coins it
/// has no data for) is logged and skipped. The call fails only when the body is
/// not an id -> object mapping, or when none of its entries decode.
pub fn parse_quotes(body: &str) -> Result<QuoteBatch, FetchError> {
    let raw: HashMap<String, Value> = serde_json::from_str(body)
        .map_err(|err| FetchError::Payload(format!("quote json parse: {err}")))?;
    let received = raw.len();

    let mut batch = QuoteBatch::with_capacity(received);
    for (upstream_id, value) in raw {
        match UpstreamQuote::deserialize(value) {
            Ok(quote) => {
                batch.insert(upstream_id, quote);
            }
            Err(err) => logging::warn(
                "market.quote_skipped",
                "Upstream quote has an unexpected shape, skipping it",
                json!({ "upstream_id": upstream_id, "error": err.to_string() }),
            ),
        }
    }

    if received > 0 && batch.is_empty() {
        return Err(FetchError::Payload(format!(
            "none of {received} upstream quotes could be decoded"
        )));
    }
    Ok(batch)
}

/// A batched price source for a basket of upstream ids.
#[async_trait]
pub trait MarketSource: Send + Sync {
    /// Where the data comes from, for diagnostics.
    fn endpoint(&self) -> String;

    async fn fetch_quotes(&self, ids: &[String]) -> Result<QuoteBatch, FetchError>;
}

/// `GET {base}simple/price?ids=...` against a CoinGecko-compatible API.
#[derive(Debug, Clone)]
pub struct HttpMarketSource {
    http: reqwest::Client,
    endpoint: Url,
}

impl HttpMarketSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let endpoint = Url::parse(&base)?.join("simple/price")?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, endpoint })
    }

    fn request_url(&self, ids: &[String]) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("ids", &ids.join(","))
            .append_pair("vs_currencies", QUOTE_CURRENCY)
            .append_pair("include_market_cap", "true")
            .append_pair("include_24hr_vol", "true")
            .append_pair("include_24hr_change", "true");
        url
    }
}

#[async_trait]
impl MarketSource for HttpMarketSource {
    fn endpoint(&self) -> String {
        self.endpoint.to_string()
    }

    async fn fetch_quotes(&self, ids: &[String]) -> Result<QuoteBatch, FetchError> {
        let url = self.request_url(ids);
        let resp = self
            .http
            .get(url.clone())
            .header("accept", "application/json")
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(FetchError::Status {
                status: resp.status().as_u16(),
                url: url.to_string(),
            });
        }

        let body = resp.text().await?;
        parse_quotes(&body)
    }
}
