use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::{Impact, NewsArticle, NewsCategory};

struct ArticleTemplate {
    title: &'static str,
    summary: &'static str,
    category: NewsCategory,
    impact: Impact,
    coins: &'static [&'static str],
}

static TEMPLATES: [ArticleTemplate; 10] = [
    ArticleTemplate {
        title: "Bitcoin {action} as {trend} lifts sentiment",
        summary: "BTC {action} through the session while desks point to {trend} as the main driver of demand.",
        category: NewsCategory::Market,
        impact: Impact::Bullish,
        coins: &["BTC"],
    },
    ArticleTemplate {
        title: "{country} advances licensing framework for digital asset firms",
        summary: "Lawmakers in {country} moved a draft framework forward that would set capital and custody rules for exchanges.",
        category: NewsCategory::Regulation,
        impact: Impact::Neutral,
        coins: &["BTC", "ETH"],
    },
    ArticleTemplate {
        title: "{protocol} governance approves protocol upgrade",
        summary: "Token holders backed a proposal to streamline fees on {protocol}, with analysts watching {metric} for the impact.",
        category: NewsCategory::Defi,
        impact: Impact::Bullish,
        coins: &["ETH"],
    },
    ArticleTemplate {
        title: "Ethereum {metric} reaches a new high",
        summary: "On-chain data shows Ethereum {metric} at a record level, a sign of {trend}.",
        category: NewsCategory::Tech,
        impact: Impact::Bullish,
        coins: &["ETH"],
    },
    ArticleTemplate {
        title: "Regulators in {country} warn against unregistered exchanges",
        summary: "The financial watchdog in {country} published a list of platforms operating without approval and urged caution.",
        category: NewsCategory::Regulation,
        impact: Impact::Bearish,
        coins: &["BTC", "ETH", "BNB"],
    },
    ArticleTemplate {
        title: "Retail chains in {country} begin accepting crypto payments",
        summary: "Several large retailers in {country} now settle purchases in BTC and SOL through a local payment processor.",
        category: NewsCategory::Adoption,
        impact: Impact::Bullish,
        coins: &["BTC", "SOL"],
    },
    ArticleTemplate {
        title: "{protocol} pauses markets after exploit report",
        summary: "Developers froze parts of {protocol} while investigating an exploit; {metric} dropped sharply within hours.",
        category: NewsCategory::Security,
        impact: Impact::Bearish,
        coins: &["ETH"],
    },
    ArticleTemplate {
        title: "Solana {metric} climbs amid {trend}",
        summary: "Solana {metric} rose for a third straight week as {trend} carried over from the previous month.",
        category: NewsCategory::Tech,
        impact: Impact::Bullish,
        coins: &["SOL"],
    },
    ArticleTemplate {
        title: "Altcoins {action} while majors trade flat",
        summary: "Mid-cap tokens {action} as traders rotated out of BTC, although {metric} across the sector stayed muted.",
        category: NewsCategory::Market,
        impact: Impact::Neutral,
        coins: &["ADA", "DOT", "AVAX"],
    },
    ArticleTemplate {
        title: "Major bank in {country} launches crypto custody desk",
        summary: "A top-tier lender in {country} will hold BTC and ETH for institutional clients, citing {trend}.",
        category: NewsCategory::Institutional,
        impact: Impact::Bullish,
        coins: &["BTC", "ETH"],
    },
];

static ACTIONS: [&str; 7] = [
    "surges",
    "rallies",
    "climbs",
    "rebounds",
    "consolidates",
    "edges higher",
    "breaks out",
];

static TRENDS: [&str; 6] = [
    "institutional inflows",
    "rising on-chain activity",
    "renewed retail interest",
    "record ETF volumes",
    "shrinking exchange reserves",
    "easing macro pressure",
];

static PROTOCOLS: [&str; 8] = [
    "Uniswap", "Aave", "Lido", "MakerDAO", "Curve", "Compound", "Arbitrum", "Optimism",
];

static COUNTRIES: [&str; 8] = [
    "Japan",
    "Brazil",
    "Germany",
    "Singapore",
    "the United Kingdom",
    "South Korea",
    "the UAE",
    "Canada",
];

static METRICS: [&str; 6] = [
    "daily active addresses",
    "total value locked",
    "transaction throughput",
    "stablecoin supply",
    "staking participation",
    "developer activity",
];

static SOURCES: [&str; 6] = [
    "CoinDesk",
    "The Block",
    "Decrypt",
    "CryptoSlate",
    "Cointelegraph",
    "Blockworks",
];

/// Template-based stand-in for a live news feed.
pub struct NewsSynthesizer {
    rng: StdRng,
    next_sequence: u64,
    last_generated_at: Option<DateTime<Utc>>,
}

impl NewsSynthesizer {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            next_sequence: 0,
            last_generated_at: None,
        }
    }

    /// Generate `count` items stamped with `now`, newest first.
    ///
    /// Items share the generation instant, so sequence numbers descend through the
    /// batch to keep the (time, sequence) order strict. The instant never moves
    /// backwards: a `now` earlier than the previous batch is clamped to it.
    pub fn generate_batch(&mut self, count: usize, now: DateTime<Utc>) -> Vec<NewsArticle> {
        let now = self.last_generated_at.map_or(now, |last| now.max(last));
        self.last_generated_at = Some(now);

        let base = self.next_sequence;
        self.next_sequence = self.next_sequence.saturating_add(count as u64);

        (0..count)
            .map(|idx| {
                let sequence = base + (count - 1 - idx) as u64;
                self.generate_one(sequence, now)
            })
            .collect()
    }

    fn generate_one(&mut self, sequence: u64, now: DateTime<Utc>) -> NewsArticle {
        let template = pick(&mut self.rng, &TEMPLATES);
        let slots = SlotFill {
            action: *pick(&mut self.rng, &ACTIONS),
            trend: *pick(&mut self.rng, &TRENDS),
            protocol: *pick(&mut self.rng, &PROTOCOLS),
            country: *pick(&mut self.rng, &COUNTRIES),
            metric: *pick(&mut self.rng, &METRICS),
        };
        let source = *pick(&mut self.rng, &SOURCES);

        NewsArticle {
            id: format!("news-{}-{sequence}", now.timestamp_millis()),
            title: capitalise(&slots.fill(template.title)),
            summary: capitalise(&slots.fill(template.summary)),
            category: template.category,
            generated_at: now,
            sequence,
            source: source.to_string(),
            impact: template.impact,
            relevant_coins: template.coins.iter().map(|coin| coin.to_string()).collect(),
            url: None,
        }
    }
}

struct SlotFill {
    action: &'static str,
    trend: &'static str,
    protocol: &'static str,
    country: &'static str,
    metric: &'static str,
}

impl SlotFill {
    fn fill(&self, text: &str) -> String {
        text.replace("{action}", self.action)
            .replace("{trend}", self.trend)
            .replace("{protocol}", self.protocol)
            .replace("{country}", self.country)
            .replace("{metric}", self.metric)
    }
}

fn pick<'a, T, const N: usize>(rng: &mut StdRng, items: &'a [T; N]) -> &'a T {
    const { assert!(N > 0, "word lists must not be empty") };
    &items[rng.gen_range(0..N)]
}

fn capitalise(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Prepend `batch` (already newest first) and keep the newest `capacity` items.
pub fn merge_newest_first(
    existing: &[NewsArticle],
    batch: Vec<NewsArticle>,
    capacity: usize,
) -> Vec<NewsArticle> {
    let mut merged = batch;
    merged.extend(existing.iter().cloned());
    merged.truncate(capacity);
    merged
}
