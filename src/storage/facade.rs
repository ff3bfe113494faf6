use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use super::{FileBackend, PriceStore, RedisBackend, StorageError};
use crate::cache::{CacheStats, PriceList};
use crate::chains::ChainRegistry;
use crate::config::{BackendKind, Config};
use crate::types::Price;

enum FacadeState {
    Uninitialized,
    Initializing,
    Ready {
        kind: BackendKind,
        store: Arc<dyn PriceStore>,
    },
}

/// Stats as reported through the facade: backend counters plus which backend
/// is actually serving. Logs and this field are the only way callers can
/// tell the backends apart.
#[derive(Debug, Clone, Serialize)]
pub struct FacadeStats {
    pub backend: &'static str,
    #[serde(flatten)]
    pub cache: CacheStats,
}

/// The single storage handle shared by every consumer. Constructed once at
/// process start and passed around by `Arc`; there is no process-global
/// instance.
///
/// Initialization is a small state machine (`Uninitialized -> Initializing
/// -> Ready(kind)`). Re-initializing with the kind already active is a
/// no-op; asking for redis when the endpoint is unreachable downgrades to
/// the file backend with a warning, favoring availability over honoring the
/// exact request.
pub struct StorageFacade {
    registry: ChainRegistry,
    state: RwLock<FacadeState>,
    init_lock: Mutex<()>,
}

impl StorageFacade {
    pub fn new(registry: ChainRegistry) -> Self {
        Self {
            registry,
            state: RwLock::new(FacadeState::Uninitialized),
            init_lock: Mutex::new(()),
        }
    }

    /// Construct (or reuse) the configured backend. Idempotent for the kind
    /// already active; a different kind replaces the active backend.
    pub async fn initialize(&self, config: &Config) -> Result<Arc<dyn PriceStore>, StorageError> {
        // One initializer at a time; later callers see the result.
        let _init = self.init_lock.lock().await;

        if let FacadeState::Ready { kind, store } = &*self.state.read().await {
            if *kind == config.backend {
                info!(backend = kind.as_str(), "storage already initialized");
                return Ok(Arc::clone(store));
            }
        }

        *self.state.write().await = FacadeState::Initializing;

        let (kind, store) = self.build_backend(config).await?;
        let store_out = Arc::clone(&store);
        *self.state.write().await = FacadeState::Ready { kind, store };
        info!(backend = kind.as_str(), ttl = config.ttl_seconds, "storage initialized");
        Ok(store_out)
    }

    async fn build_backend(
        &self,
        config: &Config,
    ) -> Result<(BackendKind, Arc<dyn PriceStore>), StorageError> {
        match config.backend {
            BackendKind::Redis => {
                match RedisBackend::new(&self.registry, &config.redis_url, config.ttl_seconds).await
                {
                    Ok(backend) => Ok((BackendKind::Redis, Arc::new(backend))),
                    Err(e) => {
                        warn!(error = %e, "redis backend unavailable, falling back to file backend");
                        let file =
                            FileBackend::new(&self.registry, config.ttl_seconds, &config.backup_dir)
                                .await?;
                        Ok((BackendKind::File, Arc::new(file)))
                    }
                }
            }
            BackendKind::File => {
                let file =
                    FileBackend::new(&self.registry, config.ttl_seconds, &config.backup_dir).await?;
                Ok((BackendKind::File, Arc::new(file)))
            }
        }
    }

    /// The active store, or `NotInitialized` before the first successful
    /// `initialize`.
    pub async fn store(&self) -> Result<Arc<dyn PriceStore>, StorageError> {
        match &*self.state.read().await {
            FacadeState::Ready { store, .. } => Ok(Arc::clone(store)),
            _ => Err(StorageError::NotInitialized),
        }
    }

    async fn active(&self) -> Result<(BackendKind, Arc<dyn PriceStore>), StorageError> {
        match &*self.state.read().await {
            FacadeState::Ready { kind, store } => Ok((*kind, Arc::clone(store))),
            _ => Err(StorageError::NotInitialized),
        }
    }

    pub async fn store_price(&self, chain_id: u64, price: Price) -> Result<(), StorageError> {
        self.store().await?.store_price(chain_id, price).await
    }

    pub async fn store_prices(
        &self,
        chain_id: u64,
        prices: Vec<Price>,
    ) -> Result<(), StorageError> {
        self.store().await?.store_prices(chain_id, prices).await
    }

    pub async fn get_price(
        &self,
        chain_id: u64,
        address: &str,
    ) -> Result<Option<Price>, StorageError> {
        self.store().await?.get_price(chain_id, address).await
    }

    pub async fn list_prices(&self, chain_id: u64) -> Result<PriceList, StorageError> {
        self.store().await?.list_prices(chain_id).await
    }

    pub async fn get_all_prices(
        &self,
    ) -> Result<HashMap<u64, HashMap<String, Price>>, StorageError> {
        self.store().await?.get_all_prices().await
    }

    pub async fn clear_cache(&self, chain_id: Option<u64>) -> Result<(), StorageError> {
        self.store().await?.clear_cache(chain_id).await
    }

    pub async fn stats(&self, chain_id: Option<u64>) -> Result<FacadeStats, StorageError> {
        let (kind, store) = self.active().await?;
        Ok(FacadeStats {
            backend: kind.as_str(),
            cache: store.stats(chain_id).await,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MicroUsd;
    use tempfile::tempdir;

    fn config(backend: BackendKind, dir: &std::path::Path) -> Config {
        Config {
            backend,
            ttl_seconds: 60,
            backup_dir: dir.to_path_buf(),
            // Nothing listens on port 1; redis construction must fail fast.
            redis_url: "redis://127.0.0.1:1".to_string(),
            ..Config::default()
        }
    }

    fn price(chain_id: u64, address: &str, micros: u64) -> Price {
        Price {
            address: address.to_string(),
            chain_id,
            price: MicroUsd(micros),
            source: "x".to_string(),
        }
    }

    #[tokio::test]
    async fn access_before_initialize_fails_fast() {
        let facade = StorageFacade::new(ChainRegistry::new());
        assert!(matches!(facade.store().await, Err(StorageError::NotInitialized)));
        assert!(matches!(
            facade.get_price(1, "0x11").await,
            Err(StorageError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn initialize_is_idempotent_for_the_same_kind() {
        let dir = tempdir().unwrap();
        let facade = StorageFacade::new(ChainRegistry::new());
        let cfg = config(BackendKind::File, dir.path());

        let first = facade.initialize(&cfg).await.unwrap();
        let second = facade.initialize(&cfg).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn unreachable_redis_falls_back_to_a_working_file_backend() {
        let dir = tempdir().unwrap();
        let facade = StorageFacade::new(ChainRegistry::new());

        // No error surfaces from initialize despite the dead endpoint.
        facade
            .initialize(&config(BackendKind::Redis, dir.path()))
            .await
            .unwrap();

        let stats = facade.stats(None).await.unwrap();
        assert_eq!(stats.backend, "file");

        facade.store_price(1, price(1, "0xAAbb", 1_000_000)).await.unwrap();
        let got = facade.get_price(1, "0xaabb").await.unwrap().unwrap();
        assert_eq!(got.price, MicroUsd(1_000_000));
        // The downgrade produced a real file backend: the snapshot exists.
        assert!(dir.path().join("chain_1.json").exists());
    }

    #[tokio::test]
    async fn facade_serves_the_concrete_price_scenario() {
        let dir = tempdir().unwrap();
        let facade = StorageFacade::new(ChainRegistry::new());
        facade.initialize(&config(BackendKind::File, dir.path())).await.unwrap();

        facade
            .store_price(1, price(1, "0xAAbb", 1_000_000))
            .await
            .unwrap();

        let got = facade.get_price(1, "0xaabb").await.unwrap().unwrap();
        assert_eq!(got.address, "0xaabb");
        assert_eq!(got.price.to_string(), "1000000");
        assert_eq!(got.source, "x");

        let all = facade.get_all_prices().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[&1]["0xaabb"].price, MicroUsd(1_000_000));
    }

    #[tokio::test]
    async fn unsupported_chain_propagates_through_the_facade() {
        let dir = tempdir().unwrap();
        let facade = StorageFacade::new(ChainRegistry::new());
        facade.initialize(&config(BackendKind::File, dir.path())).await.unwrap();

        let err = facade.store_price(424242, price(424242, "0x11", 5)).await.unwrap_err();
        assert!(matches!(err, StorageError::UnsupportedChain(424242)));
    }
}
