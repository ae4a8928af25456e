//! Environment-based Configuration
//!
//! Loads the monitor configuration from environment variables (a `.env` file
//! is honoured). Missing required variables abort startup.
//!
//! # Required Environment Variables
//! - `ETHER_FULLNODE_URL` - Ethereum JSON-RPC endpoint
//! - `DATABASE_PATH` - SQLite database file (`:memory:` for a throwaway store)
//!
//! # Optional Settings
//! - `BITCOIN_NETWORK` - "regtest", "testnet" or "mainnet" (default: "mainnet")
//! - `ESPLORA_URL` - Esplora REST endpoint (default depends on network)
//! - `START_BLOCK_ETHER` - First Ethereum block to scan (default: 1)
//! - `CREATE_SCHEMA` - Install the address change triggers (default: false)
//! - `ENABLE_CORS` - Permissive CORS on the status endpoint (default: false)
//! - `API_PORT` - Status endpoint port (default: 4567)
//! - `NOTIFY_POLL_MS` - Change feed wait per poll (default: 1000)
//! - `CHAIN_POLL_SECS` - Chain adapters' poll interval (default: 15)
//! - `LOG_LEVEL` - Logging level (default: "info")
//! - `LOG_JSON` - JSON log output (default: false)

use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::client::esplora;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Bitcoin network the registry derives addresses for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitcoinNet {
    Regtest,
    Testnet,
    Mainnet,
}

impl FromStr for BitcoinNet {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "regtest" => Ok(BitcoinNet::Regtest),
            "testnet" | "test" => Ok(BitcoinNet::Testnet),
            "mainnet" | "main" => Ok(BitcoinNet::Mainnet),
            _ => Err(ConfigError::InvalidValue(
                "BITCOIN_NETWORK".to_string(),
                format!("unknown network: {} (use regtest|testnet|mainnet)", s),
            )),
        }
    }
}

impl BitcoinNet {
    /// Get default Esplora API for this network
    pub fn default_esplora_url(&self) -> &'static str {
        match self {
            BitcoinNet::Mainnet => esplora::MAINNET_URL,
            BitcoinNet::Testnet => esplora::TESTNET_URL,
            BitcoinNet::Regtest => "http://127.0.0.1:3002",
        }
    }

    /// Get bitcoin network enum
    pub fn bitcoin_network(&self) -> bitcoin::Network {
        match self {
            BitcoinNet::Mainnet => bitcoin::Network::Bitcoin,
            BitcoinNet::Testnet => bitcoin::Network::Testnet,
            BitcoinNet::Regtest => bitcoin::Network::Regtest,
        }
    }
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Ethereum JSON-RPC endpoint
    pub ether_fullnode_url: String,

    /// SQLite database path
    pub database_path: String,

    /// Bitcoin network
    pub bitcoin_network: BitcoinNet,

    /// Esplora API endpoint
    pub esplora_url: String,

    /// First Ethereum block to scan
    pub start_block_ether: u64,

    /// Install change-feed triggers on startup
    pub create_schema: bool,

    /// Permissive CORS on the status endpoint
    pub enable_cors: bool,

    /// Status endpoint port
    pub api_port: u16,

    /// Bounded wait per change-feed poll
    pub notify_poll_interval: Duration,

    /// Chain adapters' poll interval
    pub chain_poll_interval: Duration,

    /// Log level
    pub log_level: String,

    /// JSON log output
    pub log_json: bool,
}

impl MonitorConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let ether_fullnode_url = required("ETHER_FULLNODE_URL")?;
        let database_path = required("DATABASE_PATH")?;

        let bitcoin_network: BitcoinNet = env::var("BITCOIN_NETWORK")
            .unwrap_or_else(|_| "mainnet".to_string())
            .parse()?;

        let esplora_url = env::var("ESPLORA_URL")
            .unwrap_or_else(|_| bitcoin_network.default_esplora_url().to_string());

        let start_block_ether = parsed_or("START_BLOCK_ETHER", 1u64)?;
        let create_schema = flag("CREATE_SCHEMA")?;
        let enable_cors = flag("ENABLE_CORS")?;
        let api_port = parsed_or("API_PORT", 4567u16)?;
        let notify_poll_interval = Duration::from_millis(parsed_or("NOTIFY_POLL_MS", 1000u64)?);
        let chain_poll_interval = Duration::from_secs(parsed_or("CHAIN_POLL_SECS", 15u64)?);

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_json = flag("LOG_JSON")?;

        Ok(Self {
            ether_fullnode_url,
            database_path,
            bitcoin_network,
            esplora_url,
            start_block_ether,
            create_schema,
            enable_cors,
            api_port,
            notify_poll_interval,
            chain_poll_interval,
            log_level,
            log_json,
        })
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        tracing::info!(
            bitcoin_network = ?self.bitcoin_network,
            esplora = %self.esplora_url,
            ether_node = %self.ether_fullnode_url,
            start_block_ether = self.start_block_ether,
            database = %self.database_path,
            api_port = self.api_port,
            create_schema = self.create_schema,
            enable_cors = self.enable_cors,
            "configuration loaded"
        );
    }
}

fn required(var_name: &str) -> Result<String, ConfigError> {
    match env::var(var_name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingEnvVar(var_name.to_string())),
    }
}

fn parsed_or<T: FromStr>(var_name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(var_name) {
        Ok(value) => value.trim().parse().map_err(|_| {
            ConfigError::InvalidValue(var_name.to_string(), format!("cannot parse {:?}", value))
        }),
        Err(_) => Ok(default),
    }
}

fn flag(var_name: &str) -> Result<bool, ConfigError> {
    match env::var(var_name) {
        Ok(value) => match value.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" | "" => Ok(false),
            _ => Err(ConfigError::InvalidValue(
                var_name.to_string(),
                format!("expected a boolean, got {:?}", value),
            )),
        },
        Err(_) => Ok(false),
    }
}
