//! Common Infrastructure Module
//!
//! Shared utilities and configuration for the monitor.
//!
//! This module contains:
//! - Configuration loading from environment variables
//! - Structured logging setup
//! - Common error types and their handling policy

pub mod config;
pub mod error;
pub mod logging;

// Re-exports for convenience
pub use config::{BitcoinNet, ConfigError, MonitorConfig};
pub use error::{ErrorPolicy, MonitorError, Result};
pub use logging::{
    init_from_config, init_logging, log_payin_alert, log_payment_event, log_registry_event,
    EventCategory, LogEvent, LogLevel, LoggingError,
};
