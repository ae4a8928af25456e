//! Chain Types
//!
//! The two monitored chains and the per-chain constants the engine needs:
//! currency code, minor-unit denomination and change-feed channel name.

use serde::{Deserialize, Serialize};

/// A monitored blockchain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainType {
    /// UTXO chain, payments are individual transaction outputs
    Bitcoin,
    /// Account chain, payments are whole transactions
    Ethereum,
}

impl ChainType {
    /// All monitored chains
    pub const ALL: [ChainType; 2] = [ChainType::Bitcoin, ChainType::Ethereum];

    /// Currency code written to the payment log
    pub fn currency(&self) -> &'static str {
        match self {
            Self::Bitcoin => "BTC",
            Self::Ethereum => "ETH",
        }
    }

    /// Number of decimal places between the minor unit and one whole coin
    pub fn minor_unit_scale(&self) -> u32 {
        match self {
            Self::Bitcoin => 8,
            Self::Ethereum => 18,
        }
    }

    /// Name of the change-feed channel carrying new keys for this chain
    pub fn channel(&self) -> &'static str {
        match self {
            Self::Bitcoin => "bitcoin",
            Self::Ethereum => "ether",
        }
    }

    /// Resolve a change-feed channel name
    pub fn from_channel(channel: &str) -> Option<Self> {
        match channel {
            "bitcoin" => Some(Self::Bitcoin),
            "ether" => Some(Self::Ethereum),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChainType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Bitcoin => "bitcoin",
            Self::Ethereum => "ethereum",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for ChainType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bitcoin" | "btc" => Ok(Self::Bitcoin),
            "ethereum" | "ether" | "eth" => Ok(Self::Ethereum),
            _ => Err(format!("unknown chain: {}", s)),
        }
    }
}

/// Key an exchange-rate sample is ordered by
///
/// Bitcoin rates are keyed by block time, Ethereum rates by block height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum RateKey {
    /// Unix timestamp in seconds
    Timestamp(u64),
    /// Block height
    BlockHeight(u64),
}

impl RateKey {
    pub fn value(&self) -> u64 {
        match self {
            Self::Timestamp(v) | Self::BlockHeight(v) => *v,
        }
    }
}

impl std::fmt::Display for RateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timestamp(ts) => write!(f, "time {}", ts),
            Self::BlockHeight(h) => write!(f, "block {}", h),
        }
    }
}
