//! Pay-in Monitor
//!
//! Watches Bitcoin and Ethereum for payments to token-sale investors'
//! pay-in addresses, values each payment in USD at the historical exchange
//! rate, records it exactly once and keeps the running total raised.
//!
//! ## Modules
//!
//! - **monitor** - Address registry, dedup ledger, confirmation tracking,
//!   valuation, totals, change notifier and status endpoint
//! - **storage** - Investor, rate and payment-log stores (SQLite, in-memory)
//! - **client** - Esplora and Ethereum JSON-RPC pollers feeding the watchers
//! - **common** - Configuration, logging and error handling
//! - **types** - Chain, candidate and payment types

pub mod client;
pub mod common;
pub mod monitor;
pub mod storage;
pub mod types;

// Re-exports: common infrastructure
pub use common::{ErrorPolicy, MonitorConfig, MonitorError, Result};

// Re-exports: engine
pub use monitor::{
    AddressChangeNotifier, AddressRegistry, CreditOutcome, DedupLedger, MonitorStats,
    MonitorStores, NotifierHandle, PayinMonitor, TotalsAccumulator, ValuationService,
};

// Re-exports: storage
pub use storage::{MemoryStore, SqliteStore};

// Re-exports: client adapters
pub use client::{ClientError, EsploraSource, EthereumSource};

// Re-exports: types
pub use types::{
    CandidateTransaction, ChainType, Confidence, ConfidenceChange, CreditId, PaymentRecord,
    RateKey, TxOutput, UtxoEvent, UtxoTransaction, WatchSince,
};
