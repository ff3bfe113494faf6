use serde::Serialize;

/// One supported network. Immutable after process start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainConfig {
    pub id: u64,
    pub name: &'static str,
}

/// Static registry of the networks this service knows about. Everything else
/// (discovery, caching, persistence) is keyed by these ids; operations on an
/// unknown id fail fast with an unsupported-chain error.
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    chains: Vec<ChainConfig>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self {
            chains: vec![
                ChainConfig { id: 1, name: "Ethereum" },
                ChainConfig { id: 10, name: "Optimism" },
                ChainConfig { id: 56, name: "BNB Chain" },
                ChainConfig { id: 137, name: "Polygon" },
                ChainConfig { id: 8453, name: "Base" },
                ChainConfig { id: 42161, name: "Arbitrum" },
            ],
        }
    }

    pub fn contains(&self, chain_id: u64) -> bool {
        self.chains.iter().any(|c| c.id == chain_id)
    }

    pub fn get(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.id == chain_id)
    }

    pub fn all(&self) -> &[ChainConfig] {
        &self.chains
    }

    pub fn ids(&self) -> Vec<u64> {
        self.chains.iter().map(|c| c.id).collect()
    }

    pub fn name(&self, chain_id: u64) -> String {
        match self.get(chain_id) {
            Some(c) => c.name.to_string(),
            None => format!("Chain {}", chain_id),
        }
    }
}

impl Default for ChainRegistry {
    fn default() -> Self {
        Self::new()
    }
}
