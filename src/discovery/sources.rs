use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

use super::{DiscoveryError, DiscoverySource};
use crate::types::TokenInfo;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetches hosted ERC-20 token-list documents (tokenlists.org schema). Each
/// chain has several candidate URLs; a failing URL is skipped, not fatal.
pub struct TokenListSource {
    client: Client,
}

impl TokenListSource {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }

    fn list_urls(chain_id: u64) -> Vec<&'static str> {
        match chain_id {
            1 => vec![
                "https://tokens.uniswap.org",
                "https://tokens.coingecko.com/uniswap/all.json",
            ],
            10 => vec!["https://static.optimism.io/optimism.tokenlist.json"],
            56 => vec!["https://tokens.pancakeswap.finance/pancakeswap-extended.json"],
            137 => vec![
                "https://unpkg.com/quickswap-default-token-list@1.2.28/build/quickswap-default.tokenlist.json",
            ],
            8453 => vec!["https://static.optimism.io/optimism.tokenlist.json"],
            42161 => vec!["https://bridge.arbitrum.io/token-list-42161.json"],
            _ => vec![],
        }
    }

    async fn fetch_list(&self, url: &str, chain_id: u64) -> Result<Vec<TokenInfo>, DiscoveryError> {
        let text = self
            .client
            .get(url)
            .timeout(HTTP_TIMEOUT)
            .header("Accept", "application/json")
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        // Some hosted lists carry a UTF-8 BOM.
        let cleaned = text.trim().trim_start_matches('\u{feff}');
        let doc: Value = serde_json::from_str(cleaned)?;
        Ok(parse_token_list(&doc, chain_id, "token_lists"))
    }
}

impl Default for TokenListSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiscoverySource for TokenListSource {
    fn name(&self) -> &str {
        "token_lists"
    }

    fn supports(&self, chain_id: u64) -> bool {
        !Self::list_urls(chain_id).is_empty()
    }

    async fn discover_tokens(&self, chain_id: u64) -> Result<Vec<TokenInfo>, DiscoveryError> {
        let urls = Self::list_urls(chain_id);
        if urls.is_empty() {
            return Err(DiscoveryError::UnsupportedChain(chain_id));
        }

        let mut tokens = Vec::new();
        for url in urls {
            match self.fetch_list(url, chain_id).await {
                Ok(mut found) => {
                    info!(url, count = found.len(), "token list fetched");
                    tokens.append(&mut found);
                }
                Err(e) => {
                    warn!(url, error = %e, "token list fetch failed, continuing");
                }
            }
        }
        Ok(tokens)
    }
}

/// Extract tokens for `chain_id` from a tokenlists.org-style document.
/// Entries missing an address or with a mismatched chain id are skipped.
pub(crate) fn parse_token_list(doc: &Value, chain_id: u64, source: &str) -> Vec<TokenInfo> {
    let Some(entries) = doc.get("tokens").and_then(|t| t.as_array()) else {
        return Vec::new();
    };

    let mut tokens = Vec::new();
    for entry in entries {
        let Some(address) = entry.get("address").and_then(|v| v.as_str()) else {
            continue;
        };
        if address.is_empty() {
            continue;
        }
        if entry.get("chainId").and_then(|v| v.as_u64()) != Some(chain_id) {
            continue;
        }
        tokens.push(TokenInfo {
            address: address.to_string(),
            chain_id,
            symbol: entry.get("symbol").and_then(|v| v.as_str()).map(str::to_string),
            name: entry.get("name").and_then(|v| v.as_str()).map(str::to_string),
            decimals: entry
                .get("decimals")
                .and_then(|v| v.as_u64())
                .and_then(|d| u8::try_from(d).ok()),
            source: source.to_string(),
        });
    }
    tokens
}

/// Enumerates tokens through the CoinGecko coins list, mapping chain ids to
/// CoinGecko platform slugs. Decimals are not reported by this endpoint.
pub struct CoinGeckoSource {
    client: Client,
    base_url: String,
}

impl CoinGeckoSource {
    pub fn new() -> Self {
        Self::with_base_url("https://api.coingecko.com")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    fn platform_slug(chain_id: u64) -> Option<&'static str> {
        match chain_id {
            1 => Some("ethereum"),
            10 => Some("optimistic-ethereum"),
            56 => Some("binance-smart-chain"),
            137 => Some("polygon-pos"),
            8453 => Some("base"),
            42161 => Some("arbitrum-one"),
            _ => None,
        }
    }
}

impl Default for CoinGeckoSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiscoverySource for CoinGeckoSource {
    fn name(&self) -> &str {
        "coingecko"
    }

    fn supports(&self, chain_id: u64) -> bool {
        Self::platform_slug(chain_id).is_some()
    }

    async fn discover_tokens(&self, chain_id: u64) -> Result<Vec<TokenInfo>, DiscoveryError> {
        let platform =
            Self::platform_slug(chain_id).ok_or(DiscoveryError::UnsupportedChain(chain_id))?;
        let url = format!("{}/api/v3/coins/list?include_platform=true", self.base_url);

        let doc: Value = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(15))
            .header("Accept", "application/json")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let coins = match doc.as_array() {
            Some(coins) => coins,
            None => {
                if let Some(err) = doc.get("error") {
                    return Err(DiscoveryError::Api(err.to_string()));
                }
                return Err(DiscoveryError::Api("unexpected coins list shape".to_string()));
            }
        };

        let mut tokens = Vec::new();
        for coin in coins {
            let Some(address) = coin
                .get("platforms")
                .and_then(|p| p.get(platform))
                .and_then(|v| v.as_str())
            else {
                continue;
            };
            // The platforms map carries empty strings and "0x" placeholders.
            if address.is_empty() || address == "0x" {
                continue;
            }
            tokens.push(TokenInfo {
                address: address.to_string(),
                chain_id,
                symbol: coin.get("symbol").and_then(|v| v.as_str()).map(str::to_string),
                name: coin.get("name").and_then(|v| v.as_str()).map(str::to_string),
                decimals: None,
                source: self.name().to_string(),
            });
        }
        info!(chain_id, count = tokens.len(), "coingecko enumeration done");
        Ok(tokens)
    }
}
