//! Common Error Types for the Pay-in Monitor
//!
//! Provides the root error type and the per-kind handling policy.

use thiserror::Error;

use crate::client::ClientError;
use crate::monitor::registry::AddressParsingError;
use crate::monitor::valuation::ValuationError;
use crate::storage::StorageError;

/// How a failure is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Abort startup
    Fatal,
    /// Log and drop the single item (registration or credit)
    SkipItem,
    /// Log and keep going with the in-memory update
    LogAndContinue,
}

/// Root error type for the monitor
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Missing or malformed startup parameter
    #[error("configuration error: {0}")]
    Config(#[from] super::config::ConfigError),

    /// Logging errors
    #[error("logging error: {0}")]
    Logging(#[from] super::logging::LoggingError),

    /// Blockchain client unreachable
    #[error("connectivity error: {0}")]
    Connectivity(#[from] ClientError),

    /// Malformed registration payload
    #[error("address parsing error: {0}")]
    AddressParsing(#[from] AddressParsingError),

    /// Payment could not be valued
    #[error("valuation error: {0}")]
    Valuation(ValuationError),

    /// Store read/write failure
    #[error("persistence error: {0}")]
    Persistence(#[from] StorageError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MonitorError {
    /// Handling policy for this kind
    pub fn policy(&self) -> ErrorPolicy {
        match self {
            MonitorError::Config(_)
            | MonitorError::Logging(_)
            | MonitorError::Connectivity(_)
            | MonitorError::Io(_) => ErrorPolicy::Fatal,
            MonitorError::AddressParsing(_) | MonitorError::Valuation(_) => ErrorPolicy::SkipItem,
            MonitorError::Persistence(_) => ErrorPolicy::LogAndContinue,
        }
    }

    /// Get error code for logs and API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            MonitorError::Config(_) => "CONFIG_ERROR",
            MonitorError::Logging(_) => "LOGGING_ERROR",
            MonitorError::Connectivity(_) => "CONNECTIVITY_ERROR",
            MonitorError::AddressParsing(_) => "ADDRESS_PARSING_ERROR",
            MonitorError::Valuation(e) => match e {
                ValuationError::RateUnavailable { .. } => "RATE_UNAVAILABLE",
                ValuationError::MissingBlockTime(_) => "MISSING_BLOCK_TIME",
                ValuationError::AmountOutOfRange(_) => "AMOUNT_OUT_OF_RANGE",
                ValuationError::Lookup(_) => "PERSISTENCE_ERROR",
            },
            MonitorError::Persistence(_) => "PERSISTENCE_ERROR",
            MonitorError::Io(_) => "IO_ERROR",
        }
    }
}

impl From<ValuationError> for MonitorError {
    /// A store failure during the rate lookup is a persistence error
    fn from(e: ValuationError) -> Self {
        match e {
            ValuationError::Lookup(source) => MonitorError::Persistence(source),
            other => MonitorError::Valuation(other),
        }
    }
}

/// Result type alias using MonitorError
pub type Result<T> = std::result::Result<T, MonitorError>;
