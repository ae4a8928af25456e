//! Blockchain Client Adapters
//!
//! Pollers standing in for the external blockchain clients. They only
//! deliver events to the monitor's handlers; every credit decision is made
//! by the watchers.
//!
//! - `esplora`: Bitcoin via the Esplora REST API
//! - `ethereum`: Ethereum via node JSON-RPC

pub mod esplora;
pub mod ethereum;

use thiserror::Error;

pub use esplora::EsploraSource;
pub use ethereum::EthereumSource;

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
}

impl ClientError {
    /// Wrap a failure on the startup reachability check
    pub fn unreachable(endpoint: &str, source: ClientError) -> Self {
        ClientError::Unreachable(format!("{}: {}", endpoint, source))
    }
}
