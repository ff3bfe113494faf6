pub mod facade;
pub mod file;
pub mod redis;

pub use facade::StorageFacade;
pub use file::FileBackend;
pub use redis::RedisBackend;

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

use crate::cache::{CacheError, CacheStats, PriceList};
use crate::types::Price;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("unsupported chain: {0}")]
    UnsupportedChain(u64),
    #[error("storage facade not initialized")]
    NotInitialized,
    #[error("backend error: {0}")]
    Backend(String),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<CacheError> for StorageError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::UnsupportedChain(id) => StorageError::UnsupportedChain(id),
        }
    }
}

/// The one contract every storage backend implements, identical to the
/// in-memory cache's: the file backend is a cache plus snapshot persistence,
/// the redis backend delegates expiry to the remote store. Consumers only
/// ever hold this trait through the facade.
#[async_trait]
pub trait PriceStore: Send + Sync {
    async fn store_price(&self, chain_id: u64, price: Price) -> Result<(), StorageError>;

    async fn store_prices(&self, chain_id: u64, prices: Vec<Price>) -> Result<(), StorageError>;

    async fn get_price(&self, chain_id: u64, address: &str) -> Result<Option<Price>, StorageError>;

    async fn list_prices(&self, chain_id: u64) -> Result<PriceList, StorageError>;

    async fn get_all_prices(&self) -> Result<HashMap<u64, HashMap<String, Price>>, StorageError>;

    async fn clear_cache(&self, chain_id: Option<u64>) -> Result<(), StorageError>;

    /// Observability counters; degrades to zeroes rather than failing.
    async fn stats(&self, chain_id: Option<u64>) -> CacheStats;
}
