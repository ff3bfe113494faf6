use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// USD value as a fixed-point integer scaled by 10^6 (micro-dollars).
///
/// Serialized on the wire and in backup files as the base-10 string of the
/// integer, never as a native number, so large values round-trip exactly
/// through JSON consumers with 53-bit number limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MicroUsd(pub u64);

impl MicroUsd {
    pub const SCALE: u64 = 1_000_000;

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MicroUsd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MicroUsd {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(MicroUsd)
    }
}

impl From<u64> for MicroUsd {
    fn from(v: u64) -> Self {
        MicroUsd(v)
    }
}

impl Serialize for MicroUsd {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

struct MicroUsdVisitor;

impl<'de> Visitor<'de> for MicroUsdVisitor {
    type Value = MicroUsd;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a base-10 string of an unsigned integer")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<MicroUsd, E> {
        v.parse()
            .map_err(|_| E::custom(format!("invalid micro-dollar amount: {v:?}")))
    }
}

impl<'de> Deserialize<'de> for MicroUsd {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(MicroUsdVisitor)
    }
}

/// A candidate token produced by a discovery source. Transient: consumed by
/// downstream price fetchers, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: String,
    pub chain_id: u64,
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub decimals: Option<u8>,
    pub source: String,
}

impl TokenInfo {
    /// Identity key for dedup: `(chain_id, lowercase(address))`. `source` and
    /// metadata are excluded.
    pub fn identity_key(&self) -> TokenKey {
        TokenKey {
            chain_id: self.chain_id,
            address: self.address.to_lowercase(),
        }
    }
}

/// `(chain_id, lowercase address)` pair uniquely identifying a token or
/// price record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenKey {
    pub chain_id: u64,
    pub address: String,
}

/// Latest known USD price for one token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub address: String,
    pub chain_id: u64,
    pub price: MicroUsd,
    pub source: String,
}
