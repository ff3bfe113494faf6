use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{PriceStore, StorageError};
use crate::cache::{now_ms, CacheStats, PriceCache, PriceList};
use crate::chains::ChainRegistry;
use crate::types::{MicroUsd, Price};

/// One row of a backup file: the price record plus its original insertion
/// time, keyed in the file by lowercase address.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    address: String,
    price: MicroUsd,
    source: String,
    timestamp: u64,
}

/// In-memory price cache backed by one JSON snapshot file per chain.
///
/// Every mutating call rewrites the affected chain's whole snapshot; there
/// is no incremental log and therefore no replay or compaction. Writes to
/// one chain's file are serialized through a per-chain mutex; the backup
/// directory is owned by this process alone.
///
/// A write failure degrades durability only: it is logged and swallowed,
/// and the in-memory cache keeps serving.
pub struct FileBackend {
    cache: Arc<PriceCache>,
    backup_dir: PathBuf,
    write_locks: HashMap<u64, Mutex<()>>,
    sweeper: Option<tokio::task::JoinHandle<()>>,
}

impl FileBackend {
    /// Builds the backend and reloads any per-chain snapshots found in
    /// `backup_dir`. Reloaded entries keep their original insertion time:
    /// anything already past the TTL is discarded, and what survives carries
    /// only its remaining lifetime, never a fresh one.
    pub async fn new(
        registry: &ChainRegistry,
        ttl_seconds: u64,
        backup_dir: impl Into<PathBuf>,
    ) -> Result<Self, StorageError> {
        let backup_dir = backup_dir.into();
        tokio::fs::create_dir_all(&backup_dir)
            .await
            .map_err(|e| StorageError::Backend(format!("create backup dir: {}", e)))?;

        let cache = Arc::new(PriceCache::new(registry, ttl_seconds));
        let backend = Self {
            sweeper: cache.spawn_sweeper(),
            cache,
            write_locks: registry
                .ids()
                .into_iter()
                .map(|id| (id, Mutex::new(())))
                .collect(),
            backup_dir,
        };

        for chain_id in registry.ids() {
            backend.load_chain(chain_id).await;
        }
        Ok(backend)
    }

    pub fn cache(&self) -> &PriceCache {
        &self.cache
    }

    fn chain_file(&self, chain_id: u64) -> PathBuf {
        self.backup_dir.join(format!("chain_{}.json", chain_id))
    }

    async fn load_chain(&self, chain_id: u64) {
        let path = self.chain_file(chain_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!(chain_id, path = %path.display(), error = %e, "backup unreadable, starting empty");
                return;
            }
        };

        // Parse the outer object loosely so one malformed row cannot poison
        // the rest of the file.
        let rows: HashMap<String, serde_json::Value> = match serde_json::from_slice(&bytes) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(chain_id, path = %path.display(), error = %e, "backup corrupt, starting empty");
                return;
            }
        };

        let ttl_ms = self.cache.ttl_seconds().saturating_mul(1000);
        let now = now_ms();
        let mut loaded = 0usize;
        let mut expired = 0usize;
        let mut skipped = 0usize;

        for (key, value) in rows {
            let entry: StoredEntry = match serde_json::from_value(value) {
                Ok(entry) => entry,
                Err(e) => {
                    skipped += 1;
                    warn!(chain_id, key, error = %e, "malformed backup entry skipped");
                    continue;
                }
            };
            if ttl_ms > 0 && now.saturating_sub(entry.timestamp) >= ttl_ms {
                expired += 1;
                continue;
            }
            let price = Price {
                address: entry.address,
                chain_id,
                price: entry.price,
                source: entry.source,
            };
            if self.cache.insert_raw(chain_id, price, entry.timestamp).is_ok() {
                loaded += 1;
            }
        }
        info!(chain_id, loaded, expired, skipped, "backup snapshot reloaded");
    }

    /// Rewrite one chain's snapshot from the live cache content. Temp file
    /// plus rename keeps a crashed write from truncating the old snapshot.
    async fn persist(&self, chain_id: u64) {
        let Some(lock) = self.write_locks.get(&chain_id) else {
            return;
        };
        let _guard = lock.lock().await;

        let entries = match self.cache.snapshot_raw(chain_id) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        let rows: BTreeMap<String, StoredEntry> = entries
            .into_iter()
            .map(|(price, timestamp)| {
                (
                    price.address.clone(),
                    StoredEntry {
                        address: price.address,
                        price: price.price,
                        source: price.source,
                        timestamp,
                    },
                )
            })
            .collect();

        let bytes = match serde_json::to_vec_pretty(&rows) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(chain_id, error = %e, "backup serialization failed, skipping write");
                return;
            }
        };

        let path = self.chain_file(chain_id);
        if let Err(e) = write_atomic(&path, &bytes).await {
            warn!(chain_id, path = %path.display(), error = %e, "backup write failed, cache remains authoritative");
        }
    }
}

impl Drop for FileBackend {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

#[async_trait]
impl PriceStore for FileBackend {
    async fn store_price(&self, chain_id: u64, price: Price) -> Result<(), StorageError> {
        self.cache.store_price(chain_id, price)?;
        self.persist(chain_id).await;
        Ok(())
    }

    async fn store_prices(&self, chain_id: u64, prices: Vec<Price>) -> Result<(), StorageError> {
        self.cache.store_prices(chain_id, prices)?;
        self.persist(chain_id).await;
        Ok(())
    }

    async fn get_price(&self, chain_id: u64, address: &str) -> Result<Option<Price>, StorageError> {
        Ok(self.cache.get_price(chain_id, address)?)
    }

    async fn list_prices(&self, chain_id: u64) -> Result<PriceList, StorageError> {
        Ok(self.cache.list_prices(chain_id)?)
    }

    async fn get_all_prices(&self) -> Result<HashMap<u64, HashMap<String, Price>>, StorageError> {
        Ok(self.cache.get_all_prices())
    }

    async fn clear_cache(&self, chain_id: Option<u64>) -> Result<(), StorageError> {
        self.cache.clear(chain_id)?;
        match chain_id {
            Some(id) => self.persist(id).await,
            None => {
                let ids: Vec<u64> = self.write_locks.keys().copied().collect();
                for id in ids {
                    self.persist(id).await;
                }
            }
        }
        Ok(())
    }

    async fn stats(&self, chain_id: Option<u64>) -> CacheStats {
        self.cache.stats(chain_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;

    fn price(chain_id: u64, address: &str, micros: u64) -> Price {
        Price {
            address: address.to_string(),
            chain_id,
            price: MicroUsd(micros),
            source: "x".to_string(),
        }
    }

    async fn backend(dir: &Path, ttl: u64) -> FileBackend {
        FileBackend::new(&ChainRegistry::new(), ttl, dir).await.unwrap()
    }

    fn write_backup(dir: &Path, chain_id: u64, rows: serde_json::Value) {
        std::fs::write(
            dir.join(format!("chain_{}.json", chain_id)),
            serde_json::to_vec(&rows).unwrap(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn snapshot_is_rewritten_on_store_with_string_prices() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path(), 60).await;

        backend.store_price(1, price(1, "0xAAbb", 1_000_000)).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("chain_1.json")).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["0xaabb"]["price"], json!("1000000"));
        assert_eq!(doc["0xaabb"]["address"], json!("0xaabb"));
        assert!(doc["0xaabb"]["timestamp"].is_u64());
    }

    #[tokio::test]
    async fn reload_preserves_remaining_ttl_instead_of_refreshing() {
        let dir = tempdir().unwrap();
        let stored_at = now_ms() - 40_000;
        write_backup(
            dir.path(),
            1,
            json!({
                "0xaabb": {"address": "0xaabb", "price": "1000000", "source": "x", "timestamp": stored_at}
            }),
        );

        // TTL 60s, stored 40s ago: the entry survives the reload...
        let backend = backend(dir.path(), 60).await;
        let got = backend.get_price(1, "0xaabb").await.unwrap().unwrap();
        assert_eq!(got.price, MicroUsd(1_000_000));

        // ...but with about 20s of life left, not a fresh 60s: another 25
        // simulated seconds kills it.
        backend.cache().backdate(1, "0xaabb", Duration::from_secs(25));
        assert!(backend.get_price(1, "0xaabb").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn entries_past_ttl_are_discarded_at_load() {
        let dir = tempdir().unwrap();
        write_backup(
            dir.path(),
            1,
            json!({
                "0xdead": {"address": "0xdead", "price": "5", "source": "x", "timestamp": now_ms() - 70_000},
                "0xlive": {"address": "0xlive", "price": "9", "source": "x", "timestamp": now_ms() - 10_000}
            }),
        );

        let backend = backend(dir.path(), 60).await;
        assert!(backend.get_price(1, "0xdead").await.unwrap().is_none());
        assert!(backend.get_price(1, "0xlive").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn zero_ttl_reload_keeps_arbitrarily_old_entries() {
        let dir = tempdir().unwrap();
        write_backup(
            dir.path(),
            1,
            json!({
                "0xold": {"address": "0xold", "price": "5", "source": "x", "timestamp": 1_000u64}
            }),
        );

        let backend = backend(dir.path(), 0).await;
        assert!(backend.get_price(1, "0xold").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn malformed_entries_are_skipped_without_losing_the_rest() {
        let dir = tempdir().unwrap();
        write_backup(
            dir.path(),
            1,
            json!({
                "0xbad1": {"address": "0xbad1", "price": 12.5, "source": "x", "timestamp": now_ms()},
                "0xbad2": "not an object",
                "0xgood": {"address": "0xgood", "price": "42", "source": "x", "timestamp": now_ms()}
            }),
        );

        let backend = backend(dir.path(), 60).await;
        assert!(backend.get_price(1, "0xbad1").await.unwrap().is_none());
        let got = backend.get_price(1, "0xgood").await.unwrap().unwrap();
        assert_eq!(got.price, MicroUsd(42));
    }

    #[tokio::test]
    async fn restart_round_trip_through_real_snapshot() {
        let dir = tempdir().unwrap();
        {
            let backend = backend(dir.path(), 60).await;
            backend
                .store_prices(1, vec![price(1, "0x11", 1), price(1, "0x22", 2)])
                .await
                .unwrap();
            backend.store_price(137, price(137, "0x33", 3)).await.unwrap();
        }

        let reloaded = backend(dir.path(), 60).await;
        let all = reloaded.get_all_prices().await.unwrap();
        assert_eq!(all[&1].len(), 2);
        assert_eq!(all[&137]["0x33"].price, MicroUsd(3));
    }

    #[tokio::test]
    async fn clear_cache_empties_the_snapshot_too() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path(), 60).await;
        backend.store_price(1, price(1, "0x11", 1)).await.unwrap();

        backend.clear_cache(Some(1)).await.unwrap();
        let raw = std::fs::read_to_string(dir.path().join("chain_1.json")).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc.as_object().unwrap().len(), 0);

        let reloaded = FileBackend::new(&ChainRegistry::new(), 60, dir.path()).await.unwrap();
        assert!(reloaded.get_price(1, "0x11").await.unwrap().is_none());
    }
}
