//! Token discovery aggregation and a durable, TTL-expiring token-price
//! cache for EVM networks.
//!
//! The discovery side fans out to independent sources (hosted token lists,
//! token APIs, on-chain factory scans) and merges their results into one
//! deduplicated token universe per chain. The storage side keeps the latest
//! USD price per token behind a single facade, backed either by a local
//! snapshot-persisted cache or by redis.

pub mod cache;
pub mod chains;
pub mod config;
pub mod discovery;
pub mod storage;
pub mod types;

pub use cache::{CacheStats, PriceCache, PriceList};
pub use chains::{ChainConfig, ChainRegistry};
pub use config::{BackendKind, Config, DiscoveryConfig, SourceKind};
pub use discovery::{DiscoveryAggregator, DiscoveryError, DiscoverySource, DiscoveryStats};
pub use storage::{PriceStore, StorageError, StorageFacade};
pub use types::{MicroUsd, Price, TokenInfo, TokenKey};
