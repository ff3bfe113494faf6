use alloy::{
    primitives::{Address, U256},
    providers::{Provider, ProviderBuilder, RootProvider},
    sol,
    transports::http::{Client, Http},
};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{DiscoveryError, DiscoverySource};
use crate::types::TokenInfo;

sol! {
    #[sol(rpc)]
    interface IUniswapV2Factory {
        function allPairsLength() external view returns (uint256 length);
        function allPairs(uint256 index) external view returns (address pair);
    }

    #[sol(rpc)]
    interface IUniswapV2Pair {
        function token0() external view returns (address token);
        function token1() external view returns (address token);
    }
}

/// Enumerates tokens by walking a UniswapV2-style factory's pair list
/// on-chain. Pairs are read in fixed-size batches: batches run sequentially
/// to respect RPC rate limits, the calls inside one batch run concurrently,
/// and the scan stops at the factory's pair count or at a hard batch cap,
/// whichever comes first.
pub struct FactorySource {
    batch_size: usize,
    max_batches: usize,
}

impl FactorySource {
    pub fn new(batch_size: usize, max_batches: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            max_batches: max_batches.max(1),
        }
    }

    fn factory_address(chain_id: u64) -> Option<&'static str> {
        match chain_id {
            // UniswapV2 factory and its canonical forks.
            1 => Some("0x5C69bEe701ef814a2B6a3EDD4B1652CB9cc5aA6f"),
            56 => Some("0xcA143Ce32Fe78f1f7019d7d551a6402fC5350c73"),
            137 => Some("0x5757371414417b8C6CAad45bAeF941aBc7d3Ab32"),
            8453 => Some("0x8909Dc15e40173Ff4699343b6eB8132c65e18eC6"),
            42161 => Some("0xf1D7CC64Fb4452F05c498126312eBE29f30Fbcf9"),
            _ => None,
        }
    }

    fn rpc_endpoints(chain_id: u64) -> Vec<&'static str> {
        match chain_id {
            1 => vec!["https://eth.drpc.org", "https://ethereum.publicnode.com"],
            56 => vec!["https://bsc.drpc.org", "https://bsc.publicnode.com"],
            137 => vec!["https://polygon.drpc.org", "https://polygon.publicnode.com"],
            8453 => vec!["https://base.drpc.org", "https://base.publicnode.com"],
            42161 => vec!["https://arbitrum.drpc.org", "https://arbitrum.publicnode.com"],
            _ => vec![],
        }
    }

    /// First endpoint that answers a block-number probe wins.
    async fn connect(&self, chain_id: u64) -> Result<RootProvider<Http<Client>>, DiscoveryError> {
        for rpc_url in Self::rpc_endpoints(chain_id) {
            let parsed = match rpc_url.parse() {
                Ok(url) => url,
                Err(e) => {
                    warn!(rpc_url, error = %e, "bad RPC URL");
                    continue;
                }
            };
            let provider = ProviderBuilder::new().on_http(parsed);
            match tokio::time::timeout(Duration::from_secs(5), provider.get_block_number()).await {
                Ok(Ok(_)) => return Ok(provider),
                Ok(Err(e)) => warn!(rpc_url, error = %e, "RPC probe failed"),
                Err(_) => warn!(rpc_url, "RPC probe timed out"),
            }
        }
        Err(DiscoveryError::Rpc(format!("no usable RPC endpoint for chain {}", chain_id)))
    }

    async fn tokens_of_pair(
        provider: &RootProvider<Http<Client>>,
        factory: Address,
        index: u64,
    ) -> Result<(Address, Address), DiscoveryError> {
        let factory = IUniswapV2Factory::new(factory, provider);
        let pair_addr = factory
            .allPairs(U256::from(index))
            .call()
            .await
            .map_err(|e| DiscoveryError::Rpc(format!("allPairs({}): {}", index, e)))?
            .pair;

        let pair = IUniswapV2Pair::new(pair_addr, provider);
        let token0 = pair
            .token0()
            .call()
            .await
            .map_err(|e| DiscoveryError::Rpc(format!("token0 of {:#x}: {}", pair_addr, e)))?
            .token;
        let token1 = pair
            .token1()
            .call()
            .await
            .map_err(|e| DiscoveryError::Rpc(format!("token1 of {:#x}: {}", pair_addr, e)))?
            .token;
        Ok((token0, token1))
    }
}

#[async_trait]
impl DiscoverySource for FactorySource {
    fn name(&self) -> &str {
        "factory"
    }

    fn supports(&self, chain_id: u64) -> bool {
        Self::factory_address(chain_id).is_some() && !Self::rpc_endpoints(chain_id).is_empty()
    }

    async fn discover_tokens(&self, chain_id: u64) -> Result<Vec<TokenInfo>, DiscoveryError> {
        let factory_addr = Self::factory_address(chain_id)
            .ok_or(DiscoveryError::UnsupportedChain(chain_id))?;
        let factory = Address::from_str(factory_addr)
            .map_err(|e| DiscoveryError::Rpc(format!("bad factory address: {}", e)))?;

        let provider = self.connect(chain_id).await?;
        let total = IUniswapV2Factory::new(factory, &provider)
            .allPairsLength()
            .call()
            .await
            .map_err(|e| DiscoveryError::Rpc(format!("allPairsLength: {}", e)))?
            .length;
        let total: u64 = total.try_into().unwrap_or(u64::MAX);
        debug!(chain_id, total, "factory pair count");

        let mut seen: HashSet<String> = HashSet::new();
        let mut tokens = Vec::new();
        let mut index = 0u64;
        let mut batches = 0usize;

        while index < total && batches < self.max_batches {
            let end = (index + self.batch_size as u64).min(total);
            let calls = (index..end).map(|i| Self::tokens_of_pair(&provider, factory, i));
            let results = join_all(calls).await;
            let requested = (end - index) as usize;
            let mut fetched = 0usize;

            for result in results {
                match result {
                    Ok((token0, token1)) => {
                        fetched += 1;
                        for addr in [token0, token1] {
                            let address = format!("{:#x}", addr);
                            if seen.insert(address.clone()) {
                                tokens.push(TokenInfo {
                                    address,
                                    chain_id,
                                    symbol: None,
                                    name: None,
                                    decimals: None,
                                    source: self.name().to_string(),
                                });
                            }
                        }
                    }
                    Err(e) => warn!(chain_id, error = %e, "pair read failed, skipping"),
                }
            }

            // A short batch means the factory stopped answering past this
            // point; give up rather than hammer it.
            if fetched < requested && end < total {
                warn!(chain_id, index, fetched, requested, "short batch, stopping scan");
                break;
            }

            index = end;
            batches += 1;
        }

        info!(
            chain_id,
            pairs_scanned = index,
            tokens = tokens.len(),
            batches,
            "factory enumeration done"
        );
        Ok(tokens)
    }
}
