//! Address Registry
//!
//! Canonical set of watched pay-in addresses, keyed by chain and canonical
//! address form. Written by the startup bulk load and by the change
//! notifier, read concurrently by both watchers.
//!
//! Canonical forms:
//! - Bitcoin: the network's address string. A hex public key is converted
//!   to its P2PKH address, a plain address is validated against the network.
//! - Ethereum: `0x` followed by 40 lowercase hex digits.

use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, Network, PublicKey};
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::common::logging::log_registry_event;
use crate::types::{ChainType, MonitoredAddress, WatchSince};

/// Malformed registration payload
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressParsingError {
    #[error("empty {0} key")]
    Empty(ChainType),

    #[error("invalid bitcoin key {key}: {reason}")]
    InvalidBitcoinKey { key: String, reason: String },

    #[error("address {key} is not valid on {network}")]
    WrongNetwork { key: String, network: Network },

    #[error("invalid ethereum address {0}")]
    InvalidEthereumAddress(String),
}

/// Result of a registration attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Added(MonitoredAddress),
    AlreadyPresent(MonitoredAddress),
}

impl Registration {
    pub fn address(&self) -> &MonitoredAddress {
        match self {
            Self::Added(address) | Self::AlreadyPresent(address) => address,
        }
    }
}

/// Registry of watched addresses
pub struct AddressRegistry {
    network: Network,
    entries: RwLock<HashMap<(ChainType, String), MonitoredAddress>>,
}

impl AddressRegistry {
    /// Create an empty registry for the given Bitcoin network
    pub fn new(network: Network) -> Self {
        Self {
            network,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Normalize a registration payload or observed address
    pub fn canonical_key(&self, chain: ChainType, raw: &str) -> Result<String, AddressParsingError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AddressParsingError::Empty(chain));
        }

        match chain {
            ChainType::Bitcoin => self.canonical_bitcoin(raw),
            ChainType::Ethereum => canonical_ethereum(raw),
        }
    }

    fn canonical_bitcoin(&self, raw: &str) -> Result<String, AddressParsingError> {
        if let Ok(pubkey) = PublicKey::from_str(raw) {
            return Ok(Address::p2pkh(pubkey, self.network).to_string());
        }

        let unchecked = Address::<NetworkUnchecked>::from_str(raw).map_err(|e| {
            AddressParsingError::InvalidBitcoinKey {
                key: raw.to_string(),
                reason: e.to_string(),
            }
        })?;

        let address = unchecked
            .require_network(self.network)
            .map_err(|_| AddressParsingError::WrongNetwork {
                key: raw.to_string(),
                network: self.network,
            })?;

        Ok(address.to_string())
    }

    /// Register an address, idempotent per canonical key
    ///
    /// Malformed payloads are logged and returned as errors without any
    /// other side effect.
    pub async fn register(
        &self,
        chain: ChainType,
        raw: &str,
        watch_since: WatchSince,
    ) -> Result<Registration, AddressParsingError> {
        let canonical_key = match self.canonical_key(chain, raw) {
            Ok(key) => key,
            Err(e) => {
                log_registry_event(&chain.to_string(), raw, false, Some(&e.to_string()));
                return Err(e);
            }
        };

        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(&(chain, canonical_key.clone())) {
            return Ok(Registration::AlreadyPresent(existing.clone()));
        }

        let address = MonitoredAddress {
            chain,
            canonical_key: canonical_key.clone(),
            origin_key: raw.trim().to_string(),
            watch_since,
        };
        entries.insert((chain, canonical_key), address.clone());
        drop(entries);

        log_registry_event(&chain.to_string(), &address.canonical_key, true, None);
        Ok(Registration::Added(address))
    }

    /// Whether a canonical key is registered
    pub async fn is_watched(&self, chain: ChainType, canonical_key: &str) -> bool {
        self.entries
            .read()
            .await
            .contains_key(&(chain, canonical_key.to_string()))
    }

    /// Registration for an observed address in any accepted form
    pub async fn lookup(&self, chain: ChainType, raw: &str) -> Option<MonitoredAddress> {
        let canonical_key = self.canonical_key(chain, raw).ok()?;
        self.entries
            .read()
            .await
            .get(&(chain, canonical_key))
            .cloned()
    }

    /// Origin key the investor registered for a canonical address
    pub async fn origin_key_for(&self, chain: ChainType, canonical_key: &str) -> Option<String> {
        self.entries
            .read()
            .await
            .get(&(chain, canonical_key.to_string()))
            .map(|address| address.origin_key.clone())
    }

    /// Snapshot of the addresses watched on one chain
    pub async fn watched(&self, chain: ChainType) -> Vec<MonitoredAddress> {
        let entries = self.entries.read().await;
        let mut addresses: Vec<MonitoredAddress> = entries
            .values()
            .filter(|address| address.chain == chain)
            .cloned()
            .collect();
        addresses.sort_by(|a, b| a.canonical_key.cmp(&b.canonical_key));
        addresses
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

fn canonical_ethereum(raw: &str) -> Result<String, AddressParsingError> {
    let hex_part = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);

    let bytes = hex::decode(hex_part)
        .map_err(|_| AddressParsingError::InvalidEthereumAddress(raw.to_string()))?;
    if bytes.len() != 20 {
        return Err(AddressParsingError::InvalidEthereumAddress(raw.to_string()));
    }

    Ok(format!("0x{}", hex::encode(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GENERATOR_PUBKEY: &str =
        "0279BE667EF9DCBBAC55A06295CE870B07029BFCDB2DCE28D959F2815B16F81798";
    const GENERATOR_P2PKH: &str = "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH";
    const ETH_ADDRESS: &str = "0x52908400098527886E0F7030069857D2E4169EE7";

    #[test]
    fn test_bitcoin_pubkey_to_p2pkh() {
        let registry = AddressRegistry::new(Network::Bitcoin);
        let key = registry
            .canonical_key(ChainType::Bitcoin, GENERATOR_PUBKEY)
            .unwrap();
        assert_eq!(key, GENERATOR_P2PKH);

        let lower = registry
            .canonical_key(ChainType::Bitcoin, &GENERATOR_PUBKEY.to_lowercase())
            .unwrap();
        assert_eq!(lower, GENERATOR_P2PKH);
    }

    #[test]
    fn test_bitcoin_address_network_check() {
        let mainnet = AddressRegistry::new(Network::Bitcoin);
        assert_eq!(
            mainnet
                .canonical_key(ChainType::Bitcoin, GENERATOR_P2PKH)
                .unwrap(),
            GENERATOR_P2PKH
        );

        let testnet = AddressRegistry::new(Network::Testnet);
        let err = testnet
            .canonical_key(ChainType::Bitcoin, GENERATOR_P2PKH)
            .unwrap_err();
        assert!(matches!(err, AddressParsingError::WrongNetwork { .. }));
    }

    #[test]
    fn test_malformed_keys() {
        let registry = AddressRegistry::new(Network::Bitcoin);
        assert!(matches!(
            registry.canonical_key(ChainType::Bitcoin, "not-a-key"),
            Err(AddressParsingError::InvalidBitcoinKey { .. })
        ));
        assert_eq!(
            registry.canonical_key(ChainType::Ethereum, "  "),
            Err(AddressParsingError::Empty(ChainType::Ethereum))
        );
        assert!(matches!(
            registry.canonical_key(ChainType::Ethereum, "0x1234"),
            Err(AddressParsingError::InvalidEthereumAddress(_))
        ));
        assert!(matches!(
            registry.canonical_key(
                ChainType::Ethereum,
                "0xZZ908400098527886E0F7030069857D2E4169EE7"
            ),
            Err(AddressParsingError::InvalidEthereumAddress(_))
        ));
    }

    #[test]
    fn test_ethereum_canonical_form() {
        let registry = AddressRegistry::new(Network::Bitcoin);
        let expected = "0x52908400098527886e0f7030069857d2e4169ee7";

        assert_eq!(
            registry.canonical_key(ChainType::Ethereum, ETH_ADDRESS).unwrap(),
            expected
        );
        assert_eq!(
            registry
                .canonical_key(ChainType::Ethereum, &ETH_ADDRESS[2..])
                .unwrap(),
            expected
        );
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let registry = AddressRegistry::new(Network::Bitcoin);

        let first = registry
            .register(ChainType::Ethereum, ETH_ADDRESS, WatchSince::BlockHeight(1))
            .await
            .unwrap();
        assert!(matches!(first, Registration::Added(_)));

        let second = registry
            .register(
                ChainType::Ethereum,
                &ETH_ADDRESS.to_lowercase(),
                WatchSince::BlockHeight(5),
            )
            .await
            .unwrap();
        assert!(matches!(second, Registration::AlreadyPresent(_)));
        assert_eq!(second.address().watch_since, WatchSince::BlockHeight(1));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_lookup_and_origin_key() {
        let registry = AddressRegistry::new(Network::Bitcoin);
        registry
            .register(ChainType::Bitcoin, GENERATOR_PUBKEY, WatchSince::Timestamp(0))
            .await
            .unwrap();

        assert!(registry.is_watched(ChainType::Bitcoin, GENERATOR_P2PKH).await);
        assert!(!registry.is_watched(ChainType::Ethereum, GENERATOR_P2PKH).await);

        let found = registry
            .lookup(ChainType::Bitcoin, GENERATOR_P2PKH)
            .await
            .unwrap();
        assert_eq!(found.origin_key, GENERATOR_PUBKEY);

        assert_eq!(
            registry
                .origin_key_for(ChainType::Bitcoin, GENERATOR_P2PKH)
                .await,
            Some(GENERATOR_PUBKEY.to_string())
        );
        assert!(registry.lookup(ChainType::Bitcoin, "garbage").await.is_none());
    }

    #[tokio::test]
    async fn test_rejected_registration_has_no_effect() {
        let registry = AddressRegistry::new(Network::Bitcoin);
        let result = registry
            .register(ChainType::Bitcoin, "zz", WatchSince::now())
            .await;
        assert!(result.is_err());
        assert!(registry.is_empty().await);
    }
}
