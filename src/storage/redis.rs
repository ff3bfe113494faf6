use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

use super::{PriceStore, StorageError};
use crate::cache::{CacheStats, PriceList};
use crate::chains::ChainRegistry;
use crate::types::Price;

const COMMAND_TIMEOUT: Duration = Duration::from_millis(1000);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Price store over a remote redis instance. Durability and expiry are the
/// remote store's job: every key is written with redis' native TTL, so this
/// backend needs none of the file backend's snapshot or reload machinery.
///
/// Read-path command failures degrade to a miss with a warning; only store
/// operations surface hard backend errors.
#[derive(Debug)]
pub struct RedisBackend {
    connection: MultiplexedConnection,
    registry: ChainRegistry,
    ttl_seconds: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RedisBackend {
    /// Connects and verifies the server answers a PING, so an unreachable
    /// endpoint fails here and lets the facade fall back.
    pub async fn new(
        registry: &ChainRegistry,
        redis_url: &str,
        ttl_seconds: u64,
    ) -> Result<Self, StorageError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StorageError::Backend(format!("redis client: {}", e)))?;
        let mut connection = timeout(CONNECT_TIMEOUT, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| StorageError::Backend("redis connect timeout".to_string()))?
            .map_err(|e| StorageError::Backend(format!("redis connect: {}", e)))?;

        let pong: String = timeout(COMMAND_TIMEOUT, redis::cmd("PING").query_async(&mut connection))
            .await
            .map_err(|_| StorageError::Backend("redis ping timeout".to_string()))?
            .map_err(|e| StorageError::Backend(format!("redis ping: {}", e)))?;
        if pong != "PONG" {
            return Err(StorageError::Backend(format!("unexpected ping reply: {}", pong)));
        }

        Ok(Self {
            connection,
            registry: registry.clone(),
            ttl_seconds,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    fn check_chain(&self, chain_id: u64) -> Result<(), StorageError> {
        if self.registry.contains(chain_id) {
            Ok(())
        } else {
            Err(StorageError::UnsupportedChain(chain_id))
        }
    }

    fn price_key(chain_id: u64, address: &str) -> String {
        format!("price:{}:{}", chain_id, address.to_lowercase())
    }

    fn chain_pattern(chain_id: u64) -> String {
        format!("price:{}:*", chain_id)
    }

    async fn write_price(&self, chain_id: u64, mut price: Price) -> Result<(), StorageError> {
        price.address = price.address.to_lowercase();
        price.chain_id = chain_id;
        let key = Self::price_key(chain_id, &price.address);
        let payload = serde_json::to_string(&price)?;

        let mut conn = self.connection.clone();
        let write = async {
            if self.ttl_seconds > 0 {
                conn.set_ex(&key, &payload, self.ttl_seconds as usize).await
            } else {
                conn.set(&key, &payload).await
            }
        };
        let _: () = timeout(COMMAND_TIMEOUT, write)
            .await
            .map_err(|_| StorageError::Backend("redis set timeout".to_string()))?
            .map_err(|e| StorageError::Backend(format!("redis set: {}", e)))?;
        Ok(())
    }

    /// Key snapshot for one chain, then per-key reads happen separately:
    /// same weak snapshot semantics as the in-memory cache.
    async fn scan_keys(&self, chain_id: u64) -> Result<Vec<String>, StorageError> {
        let mut conn = self.connection.clone();
        let pattern = Self::chain_pattern(chain_id);
        let scan = async move {
            let mut keys = Vec::new();
            let mut iter = conn.scan_match::<_, String>(&pattern).await?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            redis::RedisResult::Ok(keys)
        };
        timeout(Duration::from_secs(5), scan)
            .await
            .map_err(|_| StorageError::Backend("redis scan timeout".to_string()))?
            .map_err(|e| StorageError::Backend(format!("redis scan: {}", e)))
    }

    async fn read_key(&self, key: &str) -> Option<Price> {
        let mut conn = self.connection.clone();
        let fetched: Option<String> = match timeout(COMMAND_TIMEOUT, conn.get(key)).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                warn!(key, error = %e, "redis get failed, treating as miss");
                None
            }
            Err(_) => {
                warn!(key, "redis get timed out, treating as miss");
                None
            }
        };
        let raw = fetched?;
        match serde_json::from_str(&raw) {
            Ok(price) => Some(price),
            Err(e) => {
                warn!(key, error = %e, "undecodable price payload, treating as miss");
                None
            }
        }
    }
}

#[async_trait]
impl PriceStore for RedisBackend {
    async fn store_price(&self, chain_id: u64, price: Price) -> Result<(), StorageError> {
        self.check_chain(chain_id)?;
        self.write_price(chain_id, price).await
    }

    async fn store_prices(&self, chain_id: u64, prices: Vec<Price>) -> Result<(), StorageError> {
        self.check_chain(chain_id)?;
        for price in prices {
            self.write_price(chain_id, price).await?;
        }
        Ok(())
    }

    async fn get_price(&self, chain_id: u64, address: &str) -> Result<Option<Price>, StorageError> {
        self.check_chain(chain_id)?;
        let key = Self::price_key(chain_id, address);
        match self.read_key(&key).await {
            Some(price) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(price))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn list_prices(&self, chain_id: u64) -> Result<PriceList, StorageError> {
        self.check_chain(chain_id)?;
        let keys = self.scan_keys(chain_id).await?;

        let mut out = PriceList::default();
        for key in keys {
            if let Some(price) = self.read_key(&key).await {
                out.by_address.insert(price.address.clone(), price.clone());
                out.prices.push(price);
            }
        }
        Ok(out)
    }

    async fn get_all_prices(&self) -> Result<HashMap<u64, HashMap<String, Price>>, StorageError> {
        let mut out = HashMap::new();
        for chain_id in self.registry.ids() {
            let list = self.list_prices(chain_id).await?;
            if !list.by_address.is_empty() {
                out.insert(chain_id, list.by_address);
            }
        }
        Ok(out)
    }

    async fn clear_cache(&self, chain_id: Option<u64>) -> Result<(), StorageError> {
        let chains = match chain_id {
            Some(id) => {
                self.check_chain(id)?;
                vec![id]
            }
            None => self.registry.ids(),
        };

        let mut conn = self.connection.clone();
        for id in chains {
            let keys = self.scan_keys(id).await?;
            if keys.is_empty() {
                continue;
            }
            let _: () = timeout(COMMAND_TIMEOUT, conn.del(keys))
                .await
                .map_err(|_| StorageError::Backend("redis del timeout".to_string()))?
                .map_err(|e| StorageError::Backend(format!("redis del: {}", e)))?;
        }
        Ok(())
    }

    async fn stats(&self, chain_id: Option<u64>) -> CacheStats {
        let chains = match chain_id {
            Some(id) => vec![id],
            None => self.registry.ids(),
        };
        let mut keys = 0;
        for id in chains {
            keys += self.scan_keys(id).await.map(|k| k.len()).unwrap_or(0);
        }
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            keys,
        }
    }
}
