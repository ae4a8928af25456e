//! Shared Types Module
//!
//! Data types shared across the monitor.

pub mod candidate;
pub mod chain;
pub mod payment;
pub mod units;

// Re-exports for convenience
pub use candidate::{
    CandidateOutput, CandidateTransaction, Confidence, ConfidenceChange, CreditId, TxOutput,
    UtxoEvent, UtxoTransaction,
};
pub use chain::{ChainType, RateKey};
pub use payment::{
    ExchangeRateSample, MonitoredAddress, PayinAddressRow, PaymentRecord, WatchSince,
    BLOCK_TIME_SLACK_SECS,
};
pub use units::{
    minor_units_to_display, round_up_whole, to_major_unit, truncate_usd, SATS_PER_BTC, USD_SCALE,
};
