//! Structured Logging for the Pay-in Monitor
//!
//! Provides structured logging with:
//! - JSON output for log aggregation services
//! - Pretty output for development
//! - Structured payment, registry and alert events
//!
//! # Usage
//!
//! ```rust,ignore
//! use payin_monitor::common::logging::{init_logging, LogLevel};
//!
//! init_logging(LogLevel::Info, true)?;
//! tracing::info!(target: "payin_monitor::payment", identifier = %id, "credited");
//! ```

use serde::Serialize;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::types::{minor_units_to_display, ChainType};

// ============================================================================
// Log Levels
// ============================================================================

/// Application log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl From<&str> for LogLevel {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

// ============================================================================
// Structured Event Types
// ============================================================================

/// Event categories for structured logging
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Credit decisions
    Payment,
    /// Address registrations
    Registry,
    /// Funds leaving a pay-in address
    Alert,
    /// Startup and shutdown
    System,
}

/// Structured log event
#[derive(Debug, Serialize)]
pub struct LogEvent {
    /// Event timestamp (ISO 8601)
    pub timestamp: String,
    /// Log level
    pub level: String,
    /// Event category
    pub category: EventCategory,
    /// Human-readable message
    pub message: String,
    /// Payment identifier or address the event is about
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Additional structured data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

/// Error details for error events
#[derive(Debug, Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

impl LogEvent {
    /// Create a new log event
    pub fn new(level: LogLevel, category: EventCategory, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: format!("{:?}", level).to_uppercase(),
            category,
            message: message.into(),
            subject: None,
            data: None,
            error: None,
        }
    }

    /// Add the subject (identifier, address)
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Add structured data
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Add error details
    pub fn with_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error = Some(ErrorDetails {
            code: code.into(),
            message: message.into(),
        });
        self
    }

    /// Log this event to JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"error\": \"failed to serialize log\", \"message\": \"{}\"}}",
                self.message
            )
        })
    }

    /// Emit at the event's level
    pub fn emit(&self, level: LogLevel) {
        let json = self.to_json();
        match (level, self.category) {
            (LogLevel::Error, EventCategory::Alert) => {
                tracing::error!(target: "payin_monitor::alert", "{}", json)
            }
            (LogLevel::Error, _) => tracing::error!(target: "payin_monitor::payment", "{}", json),
            (LogLevel::Warn, EventCategory::Registry) => {
                tracing::warn!(target: "payin_monitor::registry", "{}", json)
            }
            (LogLevel::Warn, _) => tracing::warn!(target: "payin_monitor::payment", "{}", json),
            (LogLevel::Info, EventCategory::Registry) => {
                tracing::info!(target: "payin_monitor::registry", "{}", json)
            }
            (LogLevel::Info, EventCategory::System) => {
                tracing::info!(target: "payin_monitor::system", "{}", json)
            }
            (LogLevel::Info, _) => tracing::info!(target: "payin_monitor::payment", "{}", json),
            _ => tracing::debug!(target: "payin_monitor::payment", "{}", json),
        }
    }
}

// ============================================================================
// Event Helpers
// ============================================================================

/// Log a credit decision
pub fn log_payment_event(
    level: LogLevel,
    event_type: &str,
    identifier: &str,
    data: serde_json::Value,
    error: Option<(&str, &str)>,
) {
    let mut event = LogEvent::new(level, EventCategory::Payment, event_type)
        .with_subject(identifier)
        .with_data(data);

    if let Some((code, message)) = error {
        event = event.with_error(code, message);
    }

    event.emit(level);
}

/// Log an address registration attempt
pub fn log_registry_event(chain: &str, raw_key: &str, accepted: bool, detail: Option<&str>) {
    let level = if accepted { LogLevel::Info } else { LogLevel::Warn };
    let message = if accepted {
        "pay-in address registered"
    } else {
        "pay-in address rejected"
    };

    let mut event = LogEvent::new(level, EventCategory::Registry, message)
        .with_subject(raw_key)
        .with_data(serde_json::json!({ "chain": chain }));

    if let (false, Some(detail)) = (accepted, detail) {
        event = event.with_error("ADDRESS_PARSING_ERROR", detail);
    }

    event.emit(level);
}

/// Log funds leaving a watched pay-in address
pub fn log_payin_alert(tx_hash: &str, from: &str, raw_amount: u128) {
    LogEvent::new(
        LogLevel::Error,
        EventCategory::Alert,
        "funds removed from pay-in address",
    )
    .with_subject(from)
    .with_data(serde_json::json!({
        "tx_hash": tx_hash,
        "raw_amount": raw_amount.to_string(),
        "amount": minor_units_to_display(ChainType::Ethereum, raw_amount),
    }))
    .emit(LogLevel::Error);
}

// ============================================================================
// Initialization
// ============================================================================

/// Initialize the logging system
///
/// # Arguments
/// * `level` - Minimum log level to output
/// * `json_format` - Use JSON format (recommended for production)
pub fn init_logging(level: LogLevel, json_format: bool) -> Result<(), LoggingError> {
    let level_name = format!("{:?}", level).to_lowercase();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "payin_monitor={},tower_http={},axum={}",
            level_name, level_name, level_name
        ))
    });

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty().with_target(true).with_file(true))
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    }

    Ok(())
}

/// Initialize logging from MonitorConfig
pub fn init_from_config(config: &super::config::MonitorConfig) -> Result<(), LoggingError> {
    init_logging(LogLevel::from(config.log_level.as_str()), config.log_json)
}

/// Logging errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to initialize logging: {0}")]
    InitFailed(String),
}

// ============================================================================
// Tests
// ============================================================================
