//! Storage Layer Module
//!
//! Provides persistence for investors, exchange rates and the payment log,
//! plus the change feed announcing new pay-in keys.
//!
//! This module contains:
//! - Storage trait definitions for abstraction
//! - SQLite implementation for production
//! - In-memory implementation for testing

pub mod memory;
pub mod sqlite;
pub mod traits;

// Re-exports for convenience
pub use memory::{MemoryChangeFeed, MemoryStore};
pub use sqlite::{SqliteChangeFeed, SqliteStore};
pub use traits::{
    ChangeFeed, ChangeNotification, InvestorStore, PaymentRecorder, RateStore, StorageError,
    StorageResult,
};

#[cfg(test)]
pub use traits::{MockInvestorStore, MockPaymentRecorder, MockRateStore};
