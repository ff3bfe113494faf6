use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pricesweep::chains::ChainRegistry;
use pricesweep::config::Config;
use pricesweep::discovery::DiscoveryAggregator;
use pricesweep::storage::StorageFacade;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    let registry = ChainRegistry::new();
    info!(
        backend = config.backend.as_str(),
        ttl = config.ttl_seconds,
        chains = registry.all().len(),
        "starting pricesweep"
    );

    let facade = Arc::new(StorageFacade::new(registry.clone()));
    facade.initialize(&config).await?;

    let aggregator = DiscoveryAggregator::new(registry.clone(), &config.discovery);
    for chain in registry.all() {
        match aggregator.discover_tokens(chain.id).await {
            Ok(tokens) => {
                info!(chain = chain.name, chain_id = chain.id, tokens = tokens.len(), "discovery pass done");
            }
            Err(e) => warn!(chain = chain.name, chain_id = chain.id, error = %e, "discovery pass failed"),
        }
    }

    let stats = facade.stats(None).await?;
    info!(backend = stats.backend, keys = stats.cache.keys, "storage ready, waiting for shutdown");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
