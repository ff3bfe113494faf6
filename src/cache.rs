use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::chains::ChainRegistry;
use crate::types::Price;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("unsupported chain: {0}")]
    UnsupportedChain(u64),
}

/// A price plus its insertion time. Internal to the cache and persistence
/// layer; callers only ever see the `Price`.
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry {
    pub(crate) price: Price,
    pub(crate) timestamp_ms: u64,
}

/// Hit/miss/key counters for one chain or aggregated over all of them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub keys: usize,
}

/// Map and list views over the live entries of one chain, built from a weak
/// key-set snapshot: writes racing the construction may or may not appear,
/// but every entry that does appear is internally consistent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceList {
    pub by_address: HashMap<String, Price>,
    pub prices: Vec<Price>,
}

struct ChainStore {
    entries: DashMap<String, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ChainStore {
    fn new() -> Self {
        Self {
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

/// Per-chain in-memory store of the latest USD price per token address.
///
/// One TTL applies to every entry; `ttl_seconds == 0` means entries never
/// expire. Stores are created for exactly the chains in the registry, so an
/// unknown chain fails fast instead of growing the map. Access is at
/// single-key granularity: readers never wait behind a writer for longer
/// than one key's swap.
pub struct PriceCache {
    stores: HashMap<u64, ChainStore>,
    ttl_ms: u64,
}

impl PriceCache {
    pub fn new(registry: &ChainRegistry, ttl_seconds: u64) -> Self {
        let stores = registry
            .ids()
            .into_iter()
            .map(|id| (id, ChainStore::new()))
            .collect();
        Self {
            stores,
            ttl_ms: ttl_seconds.saturating_mul(1000),
        }
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_ms / 1000
    }

    fn store(&self, chain_id: u64) -> Result<&ChainStore, CacheError> {
        self.stores
            .get(&chain_id)
            .ok_or(CacheError::UnsupportedChain(chain_id))
    }

    fn is_live(&self, entry: &CacheEntry, now: u64) -> bool {
        self.ttl_ms == 0 || now.saturating_sub(entry.timestamp_ms) < self.ttl_ms
    }

    /// Last-write-wins store of one price, stamped with the current time.
    pub fn store_price(&self, chain_id: u64, price: Price) -> Result<(), CacheError> {
        self.insert_raw(chain_id, price, now_ms())
    }

    pub fn store_prices(&self, chain_id: u64, prices: Vec<Price>) -> Result<(), CacheError> {
        let now = now_ms();
        for price in prices {
            self.insert_raw(chain_id, price, now)?;
        }
        Ok(())
    }

    /// Insert with an explicit timestamp. Used by the store path and by
    /// backup reload, where entries keep their original insertion time so
    /// total lifetime stays bounded across restarts.
    pub(crate) fn insert_raw(
        &self,
        chain_id: u64,
        mut price: Price,
        timestamp_ms: u64,
    ) -> Result<(), CacheError> {
        let store = self.store(chain_id)?;
        price.address = price.address.to_lowercase();
        price.chain_id = chain_id;
        let key = price.address.clone();
        store.entries.insert(key, CacheEntry { price, timestamp_ms });
        Ok(())
    }

    /// Returns a copy of the entry if present and still live. Expired
    /// entries are purged on the way out; "expired" and "never stored" are
    /// indistinguishable to the caller.
    pub fn get_price(&self, chain_id: u64, address: &str) -> Result<Option<Price>, CacheError> {
        let store = self.store(chain_id)?;
        let key = address.to_lowercase();
        let now = now_ms();

        let live = match store.entries.get(&key) {
            Some(entry) if self.is_live(&entry, now) => Some(entry.price.clone()),
            Some(_) => None,
            None => {
                store.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };

        match live {
            Some(price) => {
                store.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(price))
            }
            None => {
                // Lazy eviction; re-check liveness under the removal lock so
                // a racing fresh write survives.
                let now = now_ms();
                store.entries.remove_if(&key, |_, entry| !self.is_live(entry, now));
                store.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Map and list views of all live entries for one chain.
    pub fn list_prices(&self, chain_id: u64) -> Result<PriceList, CacheError> {
        let store = self.store(chain_id)?;
        // Snapshot the key set first, then read each key. Entries written
        // during construction may or may not appear.
        let keys: Vec<String> = store.entries.iter().map(|e| e.key().clone()).collect();
        let now = now_ms();

        let mut out = PriceList::default();
        for key in keys {
            if let Some(entry) = store.entries.get(&key) {
                if self.is_live(&entry, now) {
                    out.by_address.insert(key.clone(), entry.price.clone());
                    out.prices.push(entry.price.clone());
                }
            }
        }
        Ok(out)
    }

    /// Live entries across every chain, omitting chains with none.
    pub fn get_all_prices(&self) -> HashMap<u64, HashMap<String, Price>> {
        let mut out = HashMap::new();
        for &chain_id in self.stores.keys() {
            if let Ok(list) = self.list_prices(chain_id) {
                if !list.by_address.is_empty() {
                    out.insert(chain_id, list.by_address);
                }
            }
        }
        out
    }

    /// Flush one chain's store, or every store when `chain_id` is `None`.
    pub fn clear(&self, chain_id: Option<u64>) -> Result<(), CacheError> {
        match chain_id {
            Some(id) => self.store(id)?.entries.clear(),
            None => {
                for store in self.stores.values() {
                    store.entries.clear();
                }
            }
        }
        Ok(())
    }

    /// Observability counters. Unknown chains report zeroes rather than
    /// failing.
    pub fn stats(&self, chain_id: Option<u64>) -> CacheStats {
        let mut stats = CacheStats::default();
        for (&id, store) in &self.stores {
            if chain_id.is_some() && chain_id != Some(id) {
                continue;
            }
            stats.hits += store.hits.load(Ordering::Relaxed);
            stats.misses += store.misses.load(Ordering::Relaxed);
            stats.keys += store.entries.len();
        }
        stats
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        if self.ttl_ms == 0 {
            return 0;
        }
        let now = now_ms();
        let mut removed = 0;
        for store in self.stores.values() {
            let before = store.entries.len();
            store.entries.retain(|_, entry| self.is_live(entry, now));
            removed += before - store.entries.len();
        }
        removed
    }

    /// Periodic sweep bounding memory between reads, run at twice the TTL.
    /// No-op (returns `None`) when entries never expire.
    pub fn spawn_sweeper(self: &Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        if self.ttl_ms == 0 {
            return None;
        }
        let cache = Arc::clone(self);
        let period = Duration::from_millis(cache.ttl_ms * 2);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = cache.purge_expired();
                if removed > 0 {
                    debug!(removed, "cache sweep purged expired entries");
                }
            }
        }))
    }

    /// Live entries with their insertion timestamps, for snapshot
    /// persistence.
    pub(crate) fn snapshot_raw(&self, chain_id: u64) -> Result<Vec<(Price, u64)>, CacheError> {
        let store = self.store(chain_id)?;
        let keys: Vec<String> = store.entries.iter().map(|e| e.key().clone()).collect();
        let now = now_ms();

        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(entry) = store.entries.get(&key) {
                if self.is_live(&entry, now) {
                    out.push((entry.price.clone(), entry.timestamp_ms));
                }
            }
        }
        Ok(out)
    }

    /// Shift an entry's insertion time into the past, standing in for
    /// elapsed wall-clock time in tests.
    #[cfg(test)]
    pub(crate) fn backdate(&self, chain_id: u64, address: &str, by: Duration) {
        let store = self.stores.get(&chain_id).expect("chain registered");
        if let Some(mut entry) = store.entries.get_mut(&address.to_lowercase()) {
            entry.timestamp_ms = entry.timestamp_ms.saturating_sub(by.as_millis() as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MicroUsd;

    fn price(chain_id: u64, address: &str, micros: u64) -> Price {
        Price {
            address: address.to_string(),
            chain_id,
            price: MicroUsd(micros),
            source: "x".to_string(),
        }
    }

    fn cache(ttl_seconds: u64) -> PriceCache {
        PriceCache::new(&ChainRegistry::new(), ttl_seconds)
    }

    #[test]
    fn store_and_get_round_trip_with_case_insensitive_address() {
        let cache = cache(60);
        cache.store_price(1, price(1, "0xAAbbCCdd", 1_000_000)).unwrap();

        let got = cache.get_price(1, "0xaabbccdd").unwrap().unwrap();
        assert_eq!(got.address, "0xaabbccdd");
        assert_eq!(got.price, MicroUsd(1_000_000));
        assert_eq!(got.source, "x");

        let also = cache.get_price(1, "0xAABBCCDD").unwrap().unwrap();
        assert_eq!(also, got);
    }

    #[test]
    fn unknown_chain_is_rejected() {
        let cache = cache(60);
        assert!(matches!(
            cache.store_price(424242, price(424242, "0x11", 5)),
            Err(CacheError::UnsupportedChain(424242))
        ));
        assert!(matches!(
            cache.get_price(424242, "0x11"),
            Err(CacheError::UnsupportedChain(424242))
        ));
    }

    #[test]
    fn last_write_wins_per_key() {
        let cache = cache(60);
        cache.store_price(1, price(1, "0x11", 1)).unwrap();
        cache.store_price(1, price(1, "0x11", 2)).unwrap();
        let got = cache.get_price(1, "0x11").unwrap().unwrap();
        assert_eq!(got.price, MicroUsd(2));
        assert_eq!(cache.stats(Some(1)).keys, 1);
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = cache(5);
        cache.store_price(1, price(1, "0x11", 7)).unwrap();
        assert!(cache.get_price(1, "0x11").unwrap().is_some());

        cache.backdate(1, "0x11", Duration::from_secs(6));
        assert!(cache.get_price(1, "0x11").unwrap().is_none());
        // Lazy eviction removed the dead entry.
        assert_eq!(cache.stats(Some(1)).keys, 0);
    }

    #[test]
    fn zero_ttl_means_never_expire() {
        let cache = cache(0);
        cache.store_price(1, price(1, "0x11", 7)).unwrap();
        cache.backdate(1, "0x11", Duration::from_secs(3_000_000));
        assert!(cache.get_price(1, "0x11").unwrap().is_some());
        assert_eq!(cache.purge_expired(), 0);
    }

    #[test]
    fn list_prices_returns_only_live_entries_in_both_views() {
        let cache = cache(60);
        cache.store_price(1, price(1, "0x11", 1)).unwrap();
        cache.store_price(1, price(1, "0x22", 2)).unwrap();
        cache.backdate(1, "0x22", Duration::from_secs(90));

        let list = cache.list_prices(1).unwrap();
        assert_eq!(list.prices.len(), 1);
        assert_eq!(list.by_address.len(), 1);
        assert!(list.by_address.contains_key("0x11"));
    }

    #[test]
    fn get_all_prices_omits_chains_with_no_live_entries() {
        let cache = cache(60);
        cache.store_price(1, price(1, "0xaabb", 1_000_000)).unwrap();
        cache.store_price(137, price(137, "0x22", 2)).unwrap();
        cache.backdate(137, "0x22", Duration::from_secs(90));

        let all = cache.get_all_prices();
        assert_eq!(all.len(), 1);
        assert_eq!(all[&1]["0xaabb"].price, MicroUsd(1_000_000));
    }

    #[test]
    fn clear_one_chain_leaves_the_others() {
        let cache = cache(60);
        cache.store_price(1, price(1, "0x11", 1)).unwrap();
        cache.store_price(137, price(137, "0x22", 2)).unwrap();

        cache.clear(Some(1)).unwrap();
        assert!(cache.get_price(1, "0x11").unwrap().is_none());
        assert!(cache.get_price(137, "0x22").unwrap().is_some());

        cache.clear(None).unwrap();
        assert!(cache.get_price(137, "0x22").unwrap().is_none());
    }

    #[test]
    fn stats_count_hits_and_misses() {
        let cache = cache(60);
        cache.store_price(1, price(1, "0x11", 1)).unwrap();
        cache.get_price(1, "0x11").unwrap();
        cache.get_price(1, "0x11").unwrap();
        cache.get_price(1, "0x99").unwrap();

        let stats = cache.stats(Some(1));
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.keys, 1);
        // Unknown chain reports zeroes instead of failing.
        let empty = cache.stats(Some(424242));
        assert_eq!(empty.keys, 0);
    }

    #[test]
    fn purge_expired_bounds_memory() {
        let cache = cache(5);
        for i in 0..10 {
            cache.store_price(1, price(1, &format!("0x{:02x}", i), i)).unwrap();
        }
        for i in 0..4 {
            cache.backdate(1, &format!("0x{:02x}", i), Duration::from_secs(10));
        }
        assert_eq!(cache.purge_expired(), 4);
        assert_eq!(cache.stats(Some(1)).keys, 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_and_readers_lose_nothing() {
        let cache = Arc::new(cache(60));
        let writers = 32;
        let readers = 8;

        let mut tasks = Vec::new();
        for i in 0..writers {
            let cache = Arc::clone(&cache);
            tasks.push(tokio::spawn(async move {
                let addr = format!("0x{:040x}", i);
                cache.store_price(1, price(1, &addr, i as u64 + 1)).unwrap();
            }));
        }
        for _ in 0..readers {
            let cache = Arc::clone(&cache);
            tasks.push(tokio::spawn(async move {
                for _ in 0..16 {
                    let _ = cache.list_prices(1).unwrap();
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let list = cache.list_prices(1).unwrap();
        assert_eq!(list.prices.len(), writers);
        for i in 0..writers {
            let addr = format!("0x{:040x}", i);
            let got = cache.get_price(1, &addr).unwrap().unwrap();
            assert_eq!(got.price, MicroUsd(i as u64 + 1));
        }
    }
}
