pub const MARKET_TICK_SECS: u64 = 30;
pub const NEWS_TICK_SECS: u64 = 60;
pub const NEWS_BATCH_SIZE: usize = 3;
pub const NEWS_CAPACITY: usize = 20;
pub const REQUEST_TIMEOUT_SECS: u64 = 10;
pub const UPSTREAM_BASE_URL: &str = "https://api.coingecko.com/api/v3/";
pub const QUOTE_CURRENCY: &str = "usd";
pub const GATEWAY_PORT: u16 = 9001;
pub const GATEWAY_CHANNEL_CAPACITY: usize = 64;
pub const METRICS_REPORT_SECS: u64 = 60;
