//! Esplora Source
//!
//! Polls the Esplora API for transactions touching watched Bitcoin
//! addresses and turns what it sees into UTXO events:
//! - a transaction seen for the first time is `Observed`, as `Building`
//!   when confirmed and `Pending` otherwise
//! - a pending transaction that confirms produces a `Building` change
//! - a pending transaction the endpoint no longer knows produces `Dead`
//!
//! An address's full chain history is paged through the first time it is
//! scanned. Later scans read only the newest page.

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::interval;

use super::ClientError;
use crate::monitor::PayinMonitor;
use crate::types::{ChainType, Confidence, ConfidenceChange, TxOutput, UtxoEvent, UtxoTransaction};

/// Esplora API endpoints
pub const MAINNET_URL: &str = "https://blockstream.info/api";
pub const TESTNET_URL: &str = "https://blockstream.info/testnet/api";

/// Confirmed transactions per page of an address's chain history
pub const CHAIN_PAGE_SIZE: usize = 25;

/// Bitcoin event source backed by Esplora
pub struct EsploraSource {
    client: Client,
    base_url: String,
    monitor: Arc<PayinMonitor>,
    poll_interval: Duration,
    /// Last confidence delivered per transaction
    delivered: Mutex<HashMap<String, Confidence>>,
    /// Addresses whose full history has been read
    fully_scanned: Mutex<HashSet<String>>,
}

impl EsploraSource {
    /// Create with custom URL
    pub fn new(base_url: &str, monitor: Arc<PayinMonitor>, poll_interval: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            monitor,
            poll_interval,
            delivered: Mutex::new(HashMap::new()),
            fully_scanned: Mutex::new(HashSet::new()),
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get current blockchain tip height
    pub async fn get_tip_height(&self) -> Result<u64, ClientError> {
        let url = format!("{}/blocks/tip/height", self.base_url);
        let resp = self.client.get(&url).send().await?;

        let height: u64 = resp
            .text()
            .await?
            .trim()
            .parse()
            .map_err(|e| ClientError::Parse(format!("invalid height: {}", e)))?;

        Ok(height)
    }

    /// Recent transactions touching an address: the mempool plus the newest
    /// [`CHAIN_PAGE_SIZE`] confirmed ones
    pub async fn address_transactions(&self, address: &str) -> Result<Vec<EsploraTx>, ClientError> {
        self.fetch_txs(&format!("{}/address/{}/txs", self.base_url, address), address)
            .await
    }

    /// Every transaction touching an address, paging through its chain history
    pub async fn address_history(&self, address: &str) -> Result<Vec<EsploraTx>, ClientError> {
        let mut txs = self.address_transactions(address).await?;
        let mut page_len = txs.iter().filter(|tx| tx.status.confirmed).count();
        let mut last_seen = txs
            .iter()
            .rev()
            .find(|tx| tx.status.confirmed)
            .map(|tx| tx.txid.clone());

        while page_len >= CHAIN_PAGE_SIZE {
            let Some(last) = last_seen.take() else {
                break;
            };
            let url = format!("{}/address/{}/txs/chain/{}", self.base_url, address, last);
            let page = self.fetch_txs(&url, address).await?;

            page_len = page.len();
            last_seen = page.last().map(|tx| tx.txid.clone());
            txs.extend(page);
        }

        Ok(txs)
    }

    async fn fetch_txs(&self, url: &str, address: &str) -> Result<Vec<EsploraTx>, ClientError> {
        let resp = self.client.get(url).send().await?;

        if !resp.status().is_success() {
            return Err(ClientError::Parse(format!(
                "address {} rejected with status {}",
                address,
                resp.status()
            )));
        }

        Ok(resp.json().await?)
    }

    /// Confirmation status of a transaction, `None` if the endpoint dropped it
    pub async fn tx_status(&self, txid: &str) -> Result<Option<EsploraTxStatus>, ClientError> {
        let url = format!("{}/tx/{}/status", self.base_url, txid);
        let resp = self.client.get(&url).send().await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(ClientError::Parse(format!(
                "status of {} rejected with {}",
                txid,
                resp.status()
            )));
        }

        Ok(Some(resp.json().await?))
    }

    /// Initial sync over every watched address
    ///
    /// Blocks until done. An unreachable endpoint is fatal.
    pub async fn catch_up(&self) -> Result<(), ClientError> {
        let height = self
            .get_tip_height()
            .await
            .map_err(|e| ClientError::unreachable(&self.base_url, e))?;

        tracing::info!(
            target: "payin_monitor::system",
            endpoint = %self.base_url,
            height,
            "bitcoin catch-up started"
        );
        self.poll_once().await;
        tracing::info!(target: "payin_monitor::system", "bitcoin catch-up finished");

        Ok(())
    }

    /// Follow the chain until the process stops
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.poll_interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            self.poll_once().await;
        }
    }

    /// One scan over all watched addresses
    pub async fn poll_once(&self) {
        let addresses = self.monitor.registry().watched(ChainType::Bitcoin).await;
        let mut seen = HashSet::new();
        let mut complete = true;

        for address in addresses {
            let key = &address.canonical_key;
            let first_scan = !self.fully_scanned.lock().await.contains(key);
            let result = if first_scan {
                self.address_history(key).await
            } else {
                self.address_transactions(key).await
            };

            let txs = match result {
                Ok(txs) => txs,
                Err(e) => {
                    tracing::warn!(address = %key, error = %e, "address scan failed");
                    complete = false;
                    continue;
                }
            };
            if first_scan {
                self.fully_scanned.lock().await.insert(key.clone());
            }

            for tx in txs {
                seen.insert(tx.txid.clone());
                let previous = self.delivered.lock().await.get(&tx.txid).copied();

                if let Some(event) = classify(&tx, previous) {
                    self.delivered
                        .lock()
                        .await
                        .insert(tx.txid.clone(), event_confidence(&event));
                    self.monitor.on_utxo_event(event).await;
                }
            }
        }

        self.check_vanished(&seen).await;

        // A failed scan leaves `seen` partial, keep everything until a full pass
        if complete {
            prune_settled(&mut *self.delivered.lock().await, &seen);
        }
    }

    /// Pending transactions missing from every listing may have been dropped
    async fn check_vanished(&self, seen: &HashSet<String>) {
        let pending: Vec<String> = self
            .delivered
            .lock()
            .await
            .iter()
            .filter(|(txid, confidence)| {
                !confidence.is_terminal() && !seen.contains(txid.as_str())
            })
            .map(|(txid, _)| txid.clone())
            .collect();

        for txid in pending {
            let event = match self.tx_status(&txid).await {
                Ok(None) => UtxoEvent::ConfidenceChanged(ConfidenceChange {
                    tx_hash: txid.clone(),
                    confidence: Confidence::Dead,
                    block_time: None,
                }),
                Ok(Some(status)) if status.confirmed => {
                    UtxoEvent::ConfidenceChanged(ConfidenceChange {
                        tx_hash: txid.clone(),
                        confidence: Confidence::Building,
                        block_time: status.block_time,
                    })
                }
                Ok(Some(_)) => continue,
                Err(e) => {
                    tracing::warn!(txid = %txid, error = %e, "status check failed");
                    continue;
                }
            };

            self.delivered
                .lock()
                .await
                .insert(txid, event_confidence(&event));
            self.monitor.on_utxo_event(event).await;
        }
    }
}

/// Event for a listed transaction given the confidence last delivered for it
pub fn classify(tx: &EsploraTx, previous: Option<Confidence>) -> Option<UtxoEvent> {
    let confidence = if tx.status.confirmed {
        Confidence::Building
    } else {
        Confidence::Pending
    };

    match previous {
        None => Some(UtxoEvent::Observed(UtxoTransaction {
            tx_hash: tx.txid.clone(),
            outputs: tx
                .vout
                .iter()
                .enumerate()
                .map(|(index, output)| TxOutput {
                    index: index as u32,
                    value: output.value,
                    address: output.scriptpubkey_address.clone(),
                })
                .collect(),
            confidence,
            block_time: tx.status.block_time,
        })),
        Some(prev) if prev.is_terminal() || prev == confidence => None,
        Some(_) => Some(UtxoEvent::ConfidenceChanged(ConfidenceChange {
            tx_hash: tx.txid.clone(),
            confidence,
            block_time: tx.status.block_time,
        })),
    }
}

/// Forget transactions in a terminal state that left every listing
fn prune_settled(delivered: &mut HashMap<String, Confidence>, seen: &HashSet<String>) {
    delivered.retain(|txid, confidence| !confidence.is_terminal() || seen.contains(txid));
}

fn event_confidence(event: &UtxoEvent) -> Confidence {
    match event {
        UtxoEvent::Observed(tx) => tx.confidence,
        UtxoEvent::ConfidenceChanged(change) => change.confidence,
    }
}

// =============================================================================
// Esplora API Response Types
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct EsploraTx {
    pub txid: String,
    pub vout: Vec<EsploraTxOutput>,
    pub status: EsploraTxStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EsploraTxStatus {
    pub confirmed: bool,
    pub block_height: Option<u64>,
    pub block_hash: Option<String>,
    pub block_time: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EsploraTxOutput {
    pub scriptpubkey_address: Option<String>,
    pub value: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::MonitorStores;
    use crate::storage::MemoryStore;
    use crate::types::WatchSince;
    use axum::extract::{Path, State};
    use axum::routing::get;
    use axum::{Json, Router};
    use bitcoin::Network;
    use rust_decimal::Decimal;
    use serde_json::Value;
    use std::ops::Range;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const BTC_ADDRESS: &str = "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH";

    const TX_JSON: &str = r#"{
        "txid": "a1b2",
        "version": 2,
        "vin": [],
        "vout": [
            {"scriptpubkey": "76a914", "scriptpubkey_type": "p2pkh",
             "scriptpubkey_address": "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH", "value": 1000000},
            {"scriptpubkey": "6a", "scriptpubkey_type": "op_return", "value": 0}
        ],
        "status": {"confirmed": false}
    }"#;

    fn tx(confirmed: bool) -> EsploraTx {
        let mut tx: EsploraTx = serde_json::from_str(TX_JSON).unwrap();
        if confirmed {
            tx.status = EsploraTxStatus {
                confirmed: true,
                block_height: Some(800_000),
                block_hash: Some("00ff".to_string()),
                block_time: Some(1_700_000_000),
            };
        }
        tx
    }

    #[test]
    fn test_parse_esplora_tx() {
        let tx = tx(false);
        assert_eq!(tx.vout.len(), 2);
        assert_eq!(tx.vout[1].scriptpubkey_address, None);
        assert!(!tx.status.confirmed);
    }

    #[test]
    fn test_first_sighting_is_observation() {
        match classify(&tx(false), None) {
            Some(UtxoEvent::Observed(observed)) => {
                assert_eq!(observed.confidence, Confidence::Pending);
                assert_eq!(observed.outputs[0].index, 0);
                assert_eq!(observed.outputs[0].value, 1_000_000);
                assert_eq!(observed.outputs[1].index, 1);
                assert_eq!(observed.block_time, None);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        match classify(&tx(true), None) {
            Some(UtxoEvent::Observed(observed)) => {
                assert_eq!(observed.confidence, Confidence::Building);
                assert_eq!(observed.block_time, Some(1_700_000_000));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_confirmation_becomes_change() {
        match classify(&tx(true), Some(Confidence::Pending)) {
            Some(UtxoEvent::ConfidenceChanged(change)) => {
                assert_eq!(change.confidence, Confidence::Building);
                assert_eq!(change.block_time, Some(1_700_000_000));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_no_repeat_events() {
        assert!(classify(&tx(false), Some(Confidence::Pending)).is_none());
        assert!(classify(&tx(true), Some(Confidence::Building)).is_none());
        assert!(classify(&tx(false), Some(Confidence::Dead)).is_none());
    }

    fn listed_tx(txid: &str, confirmed: bool) -> Value {
        let status = if confirmed {
            serde_json::json!({"confirmed": true, "block_height": 800_000, "block_time": 1_700_000_000})
        } else {
            serde_json::json!({"confirmed": false})
        };
        serde_json::json!({
            "txid": txid,
            "vout": [{"scriptpubkey_address": BTC_ADDRESS, "value": 1_000_000}],
            "status": status
        })
    }

    fn confirmed_txs(range: Range<usize>) -> Vec<Value> {
        range.map(|i| listed_tx(&format!("c{:02}", i), true)).collect()
    }

    /// Newest page: one mempool transaction and a full page of confirmed ones
    async fn newest_page() -> Json<Value> {
        let mut txs = vec![listed_tx("m0", false)];
        txs.extend(confirmed_txs(0..CHAIN_PAGE_SIZE));
        Json(Value::Array(txs))
    }

    async fn chain_page(
        State(chain_requests): State<Arc<AtomicUsize>>,
        Path((_address, last_seen)): Path<(String, String)>,
    ) -> Json<Value> {
        chain_requests.fetch_add(1, Ordering::SeqCst);
        let txs = match last_seen.as_str() {
            "c24" => confirmed_txs(25..50),
            "c49" => confirmed_txs(50..53),
            _ => Vec::new(),
        };
        Json(Value::Array(txs))
    }

    async fn spawn_esplora(chain_requests: Arc<AtomicUsize>) -> String {
        let app = Router::new()
            .route("/address/:address/txs", get(newest_page))
            .route("/address/:address/txs/chain/:last_seen", get(chain_page))
            .with_state(chain_requests);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_first_scan_reads_whole_history_then_newest_page() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_rate(0, None, Some(Decimal::from(2500)), None)
            .await;
        let monitor = Arc::new(PayinMonitor::new(
            Network::Bitcoin,
            1,
            MonitorStores::single(store.clone()),
        ));
        monitor
            .registry()
            .register(ChainType::Bitcoin, BTC_ADDRESS, WatchSince::Timestamp(0))
            .await
            .unwrap();

        let chain_requests = Arc::new(AtomicUsize::new(0));
        let url = spawn_esplora(Arc::clone(&chain_requests)).await;
        let source = EsploraSource::new(&url, Arc::clone(&monitor), Duration::from_secs(60));

        source.poll_once().await;
        assert_eq!(chain_requests.load(Ordering::SeqCst), 2);
        assert_eq!(store.payments().await.len(), 53);
        assert_eq!(monitor.total_raised_usd(), 53 * 25);
        assert_eq!(monitor.pending_transactions(), 1);

        // Settled transactions past the newest page are forgotten
        source.poll_once().await;
        assert_eq!(chain_requests.load(Ordering::SeqCst), 2);
        assert_eq!(source.delivered.lock().await.len(), 1 + CHAIN_PAGE_SIZE);
        assert_eq!(store.payments().await.len(), 53);
    }

    #[test]
    fn test_prune_keeps_listed_and_unsettled() {
        let mut delivered = HashMap::from([
            ("listed".to_string(), Confidence::Building),
            ("gone".to_string(), Confidence::Building),
            ("dropped".to_string(), Confidence::Dead),
            ("waiting".to_string(), Confidence::Pending),
        ]);
        let seen = HashSet::from(["listed".to_string()]);

        prune_settled(&mut delivered, &seen);

        let mut kept: Vec<_> = delivered.into_keys().collect();
        kept.sort();
        assert_eq!(kept, vec!["listed".to_string(), "waiting".to_string()]);
    }
}
