use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

use super::{CoinGeckoSource, DiscoveryError, DiscoverySource, FactorySource, TokenListSource};
use crate::chains::ChainRegistry;
use crate::config::{DiscoveryConfig, SourceKind};
use crate::types::TokenInfo;

/// Counters from one discovery pass, for observability logs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryStats {
    pub sources_ok: usize,
    pub sources_failed: usize,
    pub tokens_fetched: usize,
    pub tokens_unique: usize,
    pub duplicates_dropped: usize,
}

/// Fans out one discovery call to every source configured for a chain,
/// isolates per-source failures, and merges the results into a deduplicated
/// token set. Holds no mutable state; each call produces a fresh set.
pub struct DiscoveryAggregator {
    registry: ChainRegistry,
    sources_by_chain: HashMap<u64, Vec<Arc<dyn DiscoverySource>>>,
    overall_timeout: Duration,
}

impl DiscoveryAggregator {
    /// Build the aggregator from configuration, constructing one shared
    /// instance per source kind.
    pub fn new(registry: ChainRegistry, config: &DiscoveryConfig) -> Self {
        let token_lists: Arc<dyn DiscoverySource> = Arc::new(TokenListSource::new());
        let coingecko: Arc<dyn DiscoverySource> = Arc::new(CoinGeckoSource::new());
        let factory: Arc<dyn DiscoverySource> =
            Arc::new(FactorySource::new(config.factory_batch_size, config.factory_max_batches));

        let mut sources_by_chain: HashMap<u64, Vec<Arc<dyn DiscoverySource>>> = HashMap::new();
        for (&chain_id, kinds) in &config.sources_by_chain {
            let sources = kinds
                .iter()
                .map(|kind| match kind {
                    SourceKind::TokenLists => Arc::clone(&token_lists),
                    SourceKind::CoinGecko => Arc::clone(&coingecko),
                    SourceKind::Factory => Arc::clone(&factory),
                })
                .filter(|source| source.supports(chain_id))
                .collect();
            sources_by_chain.insert(chain_id, sources);
        }

        Self::with_sources(registry, sources_by_chain, config.overall_timeout)
    }

    /// Wire an explicit per-chain source table. The order of each list is the
    /// dedup tie-break: earlier sources win.
    pub fn with_sources(
        registry: ChainRegistry,
        sources_by_chain: HashMap<u64, Vec<Arc<dyn DiscoverySource>>>,
        overall_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            sources_by_chain,
            overall_timeout,
        }
    }

    /// Enumerate the candidate token universe for one chain.
    ///
    /// Every configured source runs concurrently under the aggregate
    /// deadline; a source that fails or misses the deadline contributes zero
    /// tokens and is reported at warn level. A chain with no configured
    /// sources yields an empty set, not an error.
    pub async fn discover_tokens(&self, chain_id: u64) -> Result<Vec<TokenInfo>, DiscoveryError> {
        if !self.registry.contains(chain_id) {
            return Err(DiscoveryError::UnsupportedChain(chain_id));
        }

        let sources = match self.sources_by_chain.get(&chain_id) {
            Some(sources) if !sources.is_empty() => sources,
            _ => {
                info!(chain_id, "no discovery sources configured");
                return Ok(Vec::new());
            }
        };

        let deadline = self.overall_timeout;
        let calls = sources.iter().map(|source| {
            let source = Arc::clone(source);
            async move {
                match timeout(deadline, source.discover_tokens(chain_id)).await {
                    Ok(result) => (source.name().to_string(), result),
                    Err(_) => (source.name().to_string(), Err(DiscoveryError::Timeout)),
                }
            }
        });

        // join_all preserves input order, so the merge below follows the
        // configured source order regardless of completion order.
        let results = join_all(calls).await;

        let mut stats = DiscoveryStats::default();
        let mut seen = HashSet::new();
        let mut merged = Vec::new();

        for (source_name, result) in results {
            match result {
                Ok(tokens) => {
                    stats.sources_ok += 1;
                    stats.tokens_fetched += tokens.len();
                    for token in tokens {
                        if token.address.is_empty() {
                            continue;
                        }
                        // First-seen entry wins; later duplicates are dropped
                        // along with their metadata.
                        if seen.insert(token.identity_key()) {
                            merged.push(token);
                        } else {
                            stats.duplicates_dropped += 1;
                        }
                    }
                }
                Err(e) => {
                    stats.sources_failed += 1;
                    warn!(chain_id, source = %source_name, error = %e, "discovery source failed");
                }
            }
        }

        stats.tokens_unique = merged.len();
        info!(
            chain_id,
            sources_ok = stats.sources_ok,
            sources_failed = stats.sources_failed,
            tokens_unique = stats.tokens_unique,
            duplicates_dropped = stats.duplicates_dropped,
            "discovery pass complete"
        );
        Ok(merged)
    }
}
