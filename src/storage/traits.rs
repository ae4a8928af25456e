//! Storage Trait Definitions
//!
//! Defines the store surface the monitor depends on: the investor table,
//! historical exchange rates, the payment log and the address change feed.
//! Implementations can use SQLite (production) or in-memory (testing).

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::types::{ChainType, ExchangeRateSample, PayinAddressRow, PaymentRecord, RateKey};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Change feed closed")]
    FeedClosed,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Investor registrations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InvestorStore: Send + Sync {
    /// All existing pay-in keys with their creation time
    async fn payin_addresses(&self) -> StorageResult<Vec<PayinAddressRow>>;

    /// Contact email of the investor who registered `origin_key`
    async fn email_for_origin_key(
        &self,
        chain: ChainType,
        origin_key: &str,
    ) -> StorageResult<Option<String>>;
}

/// Historical exchange rates, filled by an external collector
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Sample with the greatest key `<= key`, earliest created on ties
    async fn nearest_rate(
        &self,
        chain: ChainType,
        key: RateKey,
    ) -> StorageResult<Option<ExchangeRateSample>>;
}

/// Append-only log of credited payments
///
/// The log enforces no uniqueness; the dedup ledger owns idempotency.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentRecorder: Send + Sync {
    /// Append a credited payment
    async fn append(&self, record: &PaymentRecord) -> StorageResult<()>;

    /// Identifiers already present in the log
    async fn recorded_identifiers(&self) -> StorageResult<Vec<String>>;
}

/// Notification on a named change channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    pub channel: String,
    pub payload: String,
}

/// Pub/sub feed announcing newly registered pay-in keys
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Notifications that arrived, waiting at most `wait` for the first one
    async fn poll(&self, wait: Duration) -> StorageResult<Vec<ChangeNotification>>;
}
