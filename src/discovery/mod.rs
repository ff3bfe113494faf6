pub mod aggregator;
pub mod factory;
pub mod sources;

pub use aggregator::{DiscoveryAggregator, DiscoveryStats};
pub use factory::FactorySource;
pub use sources::{CoinGeckoSource, TokenListSource};

use crate::types::TokenInfo;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("RPC call failed: {0}")]
    Rpc(String),
    #[error("unsupported chain: {0}")]
    UnsupportedChain(u64),
    #[error("API error: {0}")]
    Api(String),
    #[error("source timed out")]
    Timeout,
}

/// Capability to enumerate candidate tokens for one network. Implementations
/// range from hosted token-list fetches to on-chain factory scans; the
/// aggregator treats them uniformly and isolates their failures.
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    async fn discover_tokens(&self, chain_id: u64) -> Result<Vec<TokenInfo>, DiscoveryError>;

    fn name(&self) -> &str;

    fn supports(&self, chain_id: u64) -> bool;
}
