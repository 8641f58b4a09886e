use std::collections::HashMap;

/// One entry of the upstream-id -> display symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetInfo {
    pub upstream_id: &'static str,
    pub symbol: &'static str,
    pub display_name: &'static str,
}

pub const TRACKED_ASSETS: [AssetInfo; 12] = [
    asset("bitcoin", "BTC", "Bitcoin"),
    asset("ethereum", "ETH", "Ethereum"),
    asset("binancecoin", "BNB", "BNB"),
    asset("solana", "SOL", "Solana"),
    asset("ripple", "XRP", "XRP"),
    asset("cardano", "ADA", "Cardano"),
    asset("dogecoin", "DOGE", "Dogecoin"),
    asset("polkadot", "DOT", "Polkadot"),
    asset("avalanche-2", "AVAX", "Avalanche"),
    asset("chainlink", "LINK", "Chainlink"),
    asset("matic-network", "MATIC", "Polygon"),
    asset("litecoin", "LTC", "Litecoin"),
];

const fn asset(upstream_id: &'static str, symbol: &'static str, display_name: &'static str) -> AssetInfo {
    AssetInfo {
        upstream_id,
        symbol,
        display_name,
    }
}

/// Upstream ids polled on every market tick.
pub fn default_basket() -> Vec<String> {
    TRACKED_ASSETS
        .iter()
        .map(|asset| asset.upstream_id.to_string())
        .collect()
}

/// Internal symbol and display name for one upstream id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSymbol {
    pub symbol: String,
    pub display_name: String,
    pub known: bool,
}

/// Read-only lookup built once at startup.
#[derive(Debug, Clone)]
pub struct SymbolMap {
    by_id: HashMap<&'static str, AssetInfo>,
}

impl Default for SymbolMap {
    fn default() -> Self {
        Self::new(TRACKED_ASSETS)
    }
}

impl SymbolMap {
    pub fn new(assets: impl IntoIterator<Item = AssetInfo>) -> Self {
        let by_id = assets
            .into_iter()
            .map(|asset| (asset.upstream_id, asset))
            .collect();
        Self { by_id }
    }

    /// Unknown ids fall back to the upper-cased id; they are never dropped.
    pub fn resolve(&self, upstream_id: &str) -> ResolvedSymbol {
        match self.by_id.get(upstream_id) {
            Some(asset) => ResolvedSymbol {
                symbol: asset.symbol.to_string(),
                display_name: asset.display_name.to_string(),
                known: true,
            },
            None => ResolvedSymbol {
                symbol: upstream_id.to_uppercase(),
                display_name: fallback_display_name(upstream_id),
                known: false,
            },
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// `shiba-inu` -> `Shiba Inu`.
fn fallback_display_name(upstream_id: &str) -> String {
    upstream_id
        .split(['-', '_'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
