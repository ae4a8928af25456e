//! In-Memory Storage Implementations
//!
//! Provides in-memory storage for testing and development.
//! Data is lost when the service restarts.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};

use super::traits::{
    ChangeFeed, ChangeNotification, InvestorStore, PaymentRecorder, RateStore, StorageError,
    StorageResult,
};
use crate::types::{ChainType, ExchangeRateSample, PayinAddressRow, PaymentRecord, RateKey};

#[derive(Debug, Clone)]
struct InvestorRow {
    email: Option<String>,
    bitcoin_key: Option<String>,
    ether_key: Option<String>,
    created_at: u64,
}

impl InvestorRow {
    fn key(&self, chain: ChainType) -> Option<&str> {
        match chain {
            ChainType::Bitcoin => self.bitcoin_key.as_deref(),
            ChainType::Ethereum => self.ether_key.as_deref(),
        }
    }
}

#[derive(Debug, Clone)]
struct RateRow {
    creation_date: u64,
    block_nr_eth: Option<u64>,
    rate_btc: Option<Decimal>,
    rate_eth: Option<Decimal>,
}

impl RateRow {
    /// Ordering key and rate for `chain`, if this row carries one
    fn sample(&self, chain: ChainType) -> Option<(u64, Decimal)> {
        match chain {
            ChainType::Bitcoin => self.rate_btc.map(|r| (self.creation_date, r)),
            ChainType::Ethereum => match (self.block_nr_eth, self.rate_eth) {
                (Some(block), Some(rate)) => Some((block, rate)),
                _ => None,
            },
        }
    }
}

/// In-memory store
///
/// Thread-safe storage for investors, rates and payments.
/// Uses Arc<RwLock<>> for concurrent access.
#[derive(Clone)]
pub struct MemoryStore {
    investors: Arc<RwLock<Vec<InvestorRow>>>,
    rates: Arc<RwLock<Vec<RateRow>>>,
    payments: Arc<RwLock<Vec<PaymentRecord>>>,
    /// Sender of the change feed, once one is opened
    feed_tx: Arc<RwLock<Option<mpsc::UnboundedSender<ChangeNotification>>>>,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            investors: Arc::new(RwLock::new(Vec::new())),
            rates: Arc::new(RwLock::new(Vec::new())),
            payments: Arc::new(RwLock::new(Vec::new())),
            feed_tx: Arc::new(RwLock::new(None)),
        }
    }

    /// Open the change feed
    ///
    /// Key assignments made after this call are published to the returned
    /// feed. Opening a new feed closes the previous one.
    pub async fn change_feed(&self) -> MemoryChangeFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.feed_tx.write().await = Some(tx);
        MemoryChangeFeed { rx: Mutex::new(rx) }
    }

    /// Close the change feed, the next poll reports `FeedClosed`
    pub async fn close_change_feed(&self) {
        self.feed_tx.write().await.take();
    }

    /// Insert an investor, returns its id
    pub async fn insert_investor(
        &self,
        email: Option<&str>,
        bitcoin_key: Option<&str>,
        ether_key: Option<&str>,
        created_at: u64,
    ) -> usize {
        let mut investors = self.investors.write().await;
        investors.push(InvestorRow {
            email: email.map(str::to_string),
            bitcoin_key: bitcoin_key.map(str::to_string),
            ether_key: ether_key.map(str::to_string),
            created_at,
        });

        if let Some(key) = bitcoin_key {
            self.publish_change(ChainType::Bitcoin.channel(), key).await;
        }
        if let Some(key) = ether_key {
            self.publish_change(ChainType::Ethereum.channel(), key).await;
        }

        investors.len() - 1
    }

    /// Assign a pay-in key to an existing investor and publish it
    pub async fn set_payin_key(
        &self,
        investor_id: usize,
        chain: ChainType,
        key: &str,
    ) -> StorageResult<()> {
        let mut investors = self.investors.write().await;
        let investor = investors
            .get_mut(investor_id)
            .ok_or_else(|| StorageError::InvalidData(format!("no investor with id {}", investor_id)))?;

        let slot = match chain {
            ChainType::Bitcoin => &mut investor.bitcoin_key,
            ChainType::Ethereum => &mut investor.ether_key,
        };
        if slot.as_deref() == Some(key) {
            return Ok(());
        }
        *slot = Some(key.to_string());
        drop(investors);

        self.publish_change(chain.channel(), key).await;
        Ok(())
    }

    /// Insert an exchange-rate sample
    pub async fn insert_rate(
        &self,
        creation_date: u64,
        block_nr_eth: Option<u64>,
        rate_btc: Option<Decimal>,
        rate_eth: Option<Decimal>,
    ) {
        self.rates.write().await.push(RateRow {
            creation_date,
            block_nr_eth,
            rate_btc,
            rate_eth,
        });
    }

    /// Publish a raw notification, dropped when no feed is open
    pub async fn publish_change(&self, channel: &str, payload: &str) {
        if let Some(tx) = self.feed_tx.read().await.as_ref() {
            let _ = tx.send(ChangeNotification {
                channel: channel.to_string(),
                payload: payload.to_string(),
            });
        }
    }

    /// All payment log records in insertion order
    pub async fn payments(&self) -> Vec<PaymentRecord> {
        self.payments.read().await.clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InvestorStore for MemoryStore {
    async fn payin_addresses(&self) -> StorageResult<Vec<PayinAddressRow>> {
        let investors = self.investors.read().await;

        let mut ordered: Vec<&InvestorRow> = investors.iter().collect();
        ordered.sort_by_key(|row| row.created_at);

        let mut addresses = Vec::new();
        for row in ordered {
            for chain in ChainType::ALL {
                if let Some(key) = row.key(chain) {
                    addresses.push(PayinAddressRow {
                        chain,
                        origin_key: key.to_string(),
                        created_at: row.created_at,
                    });
                }
            }
        }

        Ok(addresses)
    }

    async fn email_for_origin_key(
        &self,
        chain: ChainType,
        origin_key: &str,
    ) -> StorageResult<Option<String>> {
        let investors = self.investors.read().await;
        Ok(investors
            .iter()
            .find(|row| row.key(chain) == Some(origin_key))
            .and_then(|row| row.email.clone()))
    }
}

#[async_trait]
impl RateStore for MemoryStore {
    async fn nearest_rate(
        &self,
        chain: ChainType,
        key: RateKey,
    ) -> StorageResult<Option<ExchangeRateSample>> {
        match (chain, key) {
            (ChainType::Bitcoin, RateKey::Timestamp(_))
            | (ChainType::Ethereum, RateKey::BlockHeight(_)) => {}
            _ => {
                return Err(StorageError::InvalidData(format!(
                    "{} rates are not keyed by {}",
                    chain, key
                )))
            }
        }

        let rates = self.rates.read().await;

        // Greatest key not after the query, earliest creation on ties
        let mut best: Option<(u64, u64, Decimal)> = None;
        for row in rates.iter() {
            let Some((sample_key, rate)) = row.sample(chain) else {
                continue;
            };
            if sample_key > key.value() {
                continue;
            }
            let better = match best {
                None => true,
                Some((best_key, best_created, _)) => {
                    sample_key > best_key
                        || (sample_key == best_key && row.creation_date < best_created)
                }
            };
            if better {
                best = Some((sample_key, row.creation_date, rate));
            }
        }

        Ok(best.map(|(sample_key, _, rate)| ExchangeRateSample {
            key: match key {
                RateKey::Timestamp(_) => RateKey::Timestamp(sample_key),
                RateKey::BlockHeight(_) => RateKey::BlockHeight(sample_key),
            },
            usd_per_unit: rate,
        }))
    }
}

#[async_trait]
impl PaymentRecorder for MemoryStore {
    async fn append(&self, record: &PaymentRecord) -> StorageResult<()> {
        self.payments.write().await.push(record.clone());
        Ok(())
    }

    async fn recorded_identifiers(&self) -> StorageResult<Vec<String>> {
        let payments = self.payments.read().await;
        let mut identifiers: Vec<String> = payments.iter().map(|p| p.identifier.clone()).collect();
        identifiers.sort();
        identifiers.dedup();
        Ok(identifiers)
    }
}

/// Change feed backed by an unbounded channel
pub struct MemoryChangeFeed {
    rx: Mutex<mpsc::UnboundedReceiver<ChangeNotification>>,
}

#[async_trait]
impl ChangeFeed for MemoryChangeFeed {
    async fn poll(&self, wait: Duration) -> StorageResult<Vec<ChangeNotification>> {
        let mut rx = self.rx.lock().await;

        match tokio::time::timeout(wait, rx.recv()).await {
            Ok(Some(first)) => {
                let mut changes = vec![first];
                while let Ok(next) = rx.try_recv() {
                    changes.push(next);
                }
                Ok(changes)
            }
            Ok(None) => Err(StorageError::FeedClosed),
            Err(_) => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[tokio::test]
    async fn test_payin_addresses_ordered_by_creation() {
        let store = MemoryStore::new();
        store.insert_investor(Some("late@example.com"), Some("02bb"), None, 200).await;
        store
            .insert_investor(Some("early@example.com"), Some("02aa"), Some("0xaa"), 100)
            .await;

        let rows = store.payin_addresses().await.unwrap();
        let keys: Vec<&str> = rows.iter().map(|r| r.origin_key.as_str()).collect();
        assert_eq!(keys, vec!["02aa", "0xaa", "02bb"]);
    }

    #[tokio::test]
    async fn test_nearest_rate() {
        let store = MemoryStore::new();
        store.insert_rate(1_000, Some(90), None, Some(dec("200"))).await;
        store.insert_rate(1_100, Some(110), None, Some(dec("210"))).await;
        store.insert_rate(900, Some(90), None, Some(dec("199"))).await;

        let sample = store
            .nearest_rate(ChainType::Ethereum, RateKey::BlockHeight(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sample.key, RateKey::BlockHeight(90));
        assert_eq!(sample.usd_per_unit, dec("199"));

        let none = store
            .nearest_rate(ChainType::Bitcoin, RateKey::Timestamp(5_000))
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_feed_delivers_key_assignments() {
        let store = MemoryStore::new();
        let id = store.insert_investor(Some("a@example.com"), None, None, 100).await;
        let feed = store.change_feed().await;

        store.set_payin_key(id, ChainType::Ethereum, "0xbb").await.unwrap();
        store.set_payin_key(id, ChainType::Ethereum, "0xbb").await.unwrap();

        let changes = feed.poll(Duration::from_millis(100)).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].channel, "ether");
        assert_eq!(changes[0].payload, "0xbb");

        let empty = feed.poll(Duration::from_millis(10)).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_closed_feed() {
        let store = MemoryStore::new();
        let feed = store.change_feed().await;
        store.close_change_feed().await;

        let result = feed.poll(Duration::from_millis(10)).await;
        assert!(matches!(result, Err(StorageError::FeedClosed)));
    }

    #[tokio::test]
    async fn test_recorded_identifiers_deduplicated() {
        let store = MemoryStore::new();
        let record = PaymentRecord {
            identifier: "0xabc".to_string(),
            currency: "ETH".to_string(),
            raw_amount: 1,
            fx_rate: dec("200"),
            usd_amount: dec("0.00"),
            recipient_email: None,
            recorded_at: Utc::now(),
        };
        store.append(&record).await.unwrap();
        store.append(&record).await.unwrap();

        assert_eq!(store.payments().await.len(), 2);
        assert_eq!(store.recorded_identifiers().await.unwrap(), vec!["0xabc".to_string()]);
    }
}
