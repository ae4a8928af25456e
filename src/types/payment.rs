//! Payment and Registration Types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::chain::{ChainType, RateKey};

/// Largest drift of a block header timestamp from network time (two hours)
pub const BLOCK_TIME_SLACK_SECS: u64 = 2 * 60 * 60;

/// Point from which an address is watched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum WatchSince {
    Timestamp(u64),
    BlockHeight(u64),
}

impl WatchSince {
    /// Watch from the current wall-clock time
    pub fn now() -> Self {
        Self::Timestamp(Utc::now().timestamp().max(0) as u64)
    }

    /// Whether a payment confirmed at `block_time` falls inside the watch window
    ///
    /// Block header times may trail wall-clock time, so the window opens
    /// [`BLOCK_TIME_SLACK_SECS`] before the watch-since time.
    pub fn admits_time(&self, block_time: u64) -> bool {
        match self {
            Self::Timestamp(since) => block_time.saturating_add(BLOCK_TIME_SLACK_SECS) >= *since,
            Self::BlockHeight(_) => true,
        }
    }
}

/// A registered pay-in address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredAddress {
    pub chain: ChainType,
    /// Normalized address, unique per chain
    pub canonical_key: String,
    /// Key the investor registered (public key or address as submitted)
    pub origin_key: String,
    pub watch_since: WatchSince,
}

/// Existing pay-in key loaded at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayinAddressRow {
    pub chain: ChainType,
    pub origin_key: String,
    /// Investor creation time, unix seconds
    pub created_at: u64,
}

/// Historical exchange rate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRateSample {
    pub key: RateKey,
    pub usd_per_unit: Decimal,
}

/// A credited payment, append-only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// `txHash[_outputIndex]`, the idempotency key
    pub identifier: String,
    pub currency: String,
    /// Amount in minor units
    pub raw_amount: u128,
    pub fx_rate: Decimal,
    pub usd_amount: Decimal,
    pub recipient_email: Option<String>,
    pub recorded_at: DateTime<Utc>,
}
