use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Which durable backend the storage facade should run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    File,
    Redis,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::File => "file",
            BackendKind::Redis => "redis",
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "file" => Ok(BackendKind::File),
            "redis" => Ok(BackendKind::Redis),
            other => Err(format!("unknown backend kind: {}", other)),
        }
    }
}

/// Discovery source identifiers, used to express the ordered per-chain source
/// list as plain configuration data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    TokenLists,
    CoinGecko,
    Factory,
}

/// Settings for the discovery aggregator.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Ordered source list per chain; order is the dedup tie-break.
    pub sources_by_chain: HashMap<u64, Vec<SourceKind>>,
    /// Budget for one whole discovery call; sources still running at the
    /// deadline contribute nothing.
    pub overall_timeout: Duration,
    /// Fixed batch size for paginated on-chain enumeration.
    pub factory_batch_size: usize,
    /// Hard cap on batches per factory scan, bounding cost against very
    /// large or buggy factories.
    pub factory_max_batches: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        let defaults = vec![SourceKind::TokenLists, SourceKind::CoinGecko, SourceKind::Factory];
        let mut sources_by_chain = HashMap::new();
        for chain_id in [1u64, 10, 56, 137, 8453, 42161] {
            sources_by_chain.insert(chain_id, defaults.clone());
        }
        Self {
            sources_by_chain,
            overall_timeout: Duration::from_secs(30),
            factory_batch_size: 50,
            factory_max_batches: 20,
        }
    }
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: BackendKind,
    /// Seconds before a cached price expires; 0 means never.
    pub ttl_seconds: u64,
    pub backup_dir: PathBuf,
    pub redis_url: String,
    pub discovery: DiscoveryConfig,
}

impl Config {
    pub fn from_env() -> Self {
        let backend = env::var("PRICE_BACKEND")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(BackendKind::File);
        let ttl_seconds = env::var("PRICE_TTL_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300);
        let backup_dir = env::var("PRICE_BACKUP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./price-backups"));
        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        Self {
            backend,
            ttl_seconds,
            backup_dir,
            redis_url,
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::File,
            ttl_seconds: 300,
            backup_dir: PathBuf::from("./price-backups"),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            discovery: DiscoveryConfig::default(),
        }
    }
}
