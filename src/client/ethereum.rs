//! Ethereum Source
//!
//! Walks blocks over node JSON-RPC (`eth_blockNumber`,
//! `eth_getBlockByNumber` with full transactions) from the configured start
//! block and hands every transaction to the account watcher.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use super::ClientError;
use crate::monitor::PayinMonitor;
use crate::types::CandidateTransaction;

/// Ethereum event source backed by a full node
pub struct EthereumSource {
    client: Client,
    rpc_url: String,
    monitor: Arc<PayinMonitor>,
    poll_interval: Duration,
    /// Next block to process
    next_block: AtomicU64,
    request_id: AtomicU64,
}

impl EthereumSource {
    pub fn new(rpc_url: &str, monitor: Arc<PayinMonitor>, poll_interval: Duration) -> Self {
        let start_block = monitor.start_block_ether();
        Self {
            client: Client::new(),
            rpc_url: rpc_url.to_string(),
            monitor,
            poll_interval,
            next_block: AtomicU64::new(start_block),
            request_id: AtomicU64::new(1),
        }
    }

    pub fn next_block(&self) -> u64 {
        self.next_block.load(Ordering::Acquire)
    }

    /// Issue a JSON-RPC call, `None` for a null result
    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<T>, ClientError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.request_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let resp: RpcResponse<T> = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await?
            .json()
            .await?;

        match resp.error {
            Some(error) => Err(ClientError::Rpc {
                code: error.code,
                message: error.message,
            }),
            None => Ok(resp.result),
        }
    }

    /// Latest block number
    pub async fn block_number(&self) -> Result<u64, ClientError> {
        let hex: String = self
            .call("eth_blockNumber", serde_json::json!([]))
            .await?
            .ok_or_else(|| ClientError::Parse("eth_blockNumber returned no result".to_string()))?;
        parse_quantity_u64(&hex)
    }

    /// Transactions of one block, `None` if the node cannot serve it yet
    pub async fn block_transactions(
        &self,
        number: u64,
    ) -> Result<Option<Vec<CandidateTransaction>>, ClientError> {
        let block: Option<RpcBlock> = self
            .call(
                "eth_getBlockByNumber",
                serde_json::json!([format!("0x{:x}", number), true]),
            )
            .await?;

        block.map(RpcBlock::into_candidates).transpose()
    }

    /// Process blocks from the start block up to the current head
    ///
    /// Blocks until done. An unreachable node is fatal.
    pub async fn catch_up(&self) -> Result<(), ClientError> {
        let latest = self
            .block_number()
            .await
            .map_err(|e| ClientError::unreachable(&self.rpc_url, e))?;

        tracing::info!(
            target: "payin_monitor::system",
            from = self.next_block(),
            to = latest,
            "ethereum catch-up started"
        );
        self.process_until(latest).await?;
        tracing::info!(target: "payin_monitor::system", "ethereum catch-up finished");

        Ok(())
    }

    /// Follow new blocks until the process stops
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.poll_interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let result = match self.block_number().await {
                Ok(latest) => self.process_until(latest).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, next_block = self.next_block(), "ethereum poll failed");
            }
        }
    }

    /// Process blocks up to `latest`, stopping at the first one the node
    /// does not have yet so it is retried on the next poll
    async fn process_until(&self, latest: u64) -> Result<(), ClientError> {
        while self.next_block() <= latest {
            let number = self.next_block();
            let Some(txs) = self.block_transactions(number).await? else {
                tracing::debug!(block = number, latest, "block not available yet");
                break;
            };
            for tx in txs {
                self.monitor.on_account_transaction(tx).await;
            }
            self.next_block.store(number + 1, Ordering::Release);
        }
        Ok(())
    }
}

/// Parse a JSON-RPC hex quantity
pub fn parse_quantity(hex: &str) -> Result<u128, ClientError> {
    let digits = hex
        .strip_prefix("0x")
        .ok_or_else(|| ClientError::Parse(format!("quantity without 0x prefix: {}", hex)))?;
    if digits.is_empty() {
        return Err(ClientError::Parse("empty quantity".to_string()));
    }
    u128::from_str_radix(digits, 16).map_err(|e| ClientError::Parse(format!("{}: {}", hex, e)))
}

pub fn parse_quantity_u64(hex: &str) -> Result<u64, ClientError> {
    u64::try_from(parse_quantity(hex)?)
        .map_err(|_| ClientError::Parse(format!("quantity too large: {}", hex)))
}

// =============================================================================
// JSON-RPC Types
// =============================================================================

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
pub struct RpcBlock {
    pub number: String,
    pub transactions: Vec<RpcTransaction>,
}

#[derive(Debug, Deserialize)]
pub struct RpcTransaction {
    pub hash: String,
    pub from: String,
    pub to: Option<String>,
    pub value: String,
}

impl RpcBlock {
    pub fn into_candidates(self) -> Result<Vec<CandidateTransaction>, ClientError> {
        let height = parse_quantity_u64(&self.number)?;

        self.transactions
            .into_iter()
            .map(|tx| {
                Ok(CandidateTransaction {
                    tx_hash: tx.hash,
                    from: tx.from,
                    to: tx.to,
                    value: parse_quantity(&tx.value)?,
                    block_height: height,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::MonitorStores;
    use crate::storage::MemoryStore;
    use crate::types::{ChainType, WatchSince};
    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use bitcoin::Network;
    use rust_decimal::Decimal;
    use std::sync::atomic::AtomicBool;

    const ETH_ADDRESS: &str = "0x52908400098527886e0f7030069857d2e4169ee7";

    /// Node whose head is block 2 but which lags on serving block 1
    #[derive(Default)]
    struct LaggingNode {
        block_one_ready: AtomicBool,
    }

    async fn handle_rpc(
        State(node): State<Arc<LaggingNode>>,
        Json(request): Json<Value>,
    ) -> Json<Value> {
        let result = match request["method"].as_str() {
            Some("eth_blockNumber") => serde_json::json!("0x2"),
            Some("eth_getBlockByNumber") => match request["params"][0].as_str() {
                Some("0x1") if !node.block_one_ready.load(Ordering::Acquire) => Value::Null,
                Some("0x1") => serde_json::json!({
                    "number": "0x1",
                    "transactions": [{
                        "hash": "0xa1",
                        "from": "0x00000000000000000000000000000000000000aa",
                        "to": ETH_ADDRESS,
                        "value": "0xde0b6b3a7640000"
                    }]
                }),
                Some(number) => serde_json::json!({ "number": number, "transactions": [] }),
                None => Value::Null,
            },
            _ => Value::Null,
        };

        Json(serde_json::json!({ "jsonrpc": "2.0", "id": request["id"], "result": result }))
    }

    async fn spawn_node(node: Arc<LaggingNode>) -> String {
        let app = Router::new().route("/", post(handle_rpc)).with_state(node);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_unavailable_block_is_retried_not_skipped() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_rate(0, Some(1), None, Some(Decimal::from(100)))
            .await;
        let monitor = Arc::new(PayinMonitor::new(
            Network::Bitcoin,
            1,
            MonitorStores::single(store.clone()),
        ));
        monitor
            .registry()
            .register(ChainType::Ethereum, ETH_ADDRESS, WatchSince::BlockHeight(1))
            .await
            .unwrap();

        let node = Arc::new(LaggingNode::default());
        let url = spawn_node(Arc::clone(&node)).await;
        let source = EthereumSource::new(&url, Arc::clone(&monitor), Duration::from_secs(1));

        source.catch_up().await.unwrap();
        assert_eq!(source.next_block(), 1);
        assert_eq!(monitor.total_raised_usd(), 0);

        node.block_one_ready.store(true, Ordering::Release);
        let latest = source.block_number().await.unwrap();
        source.process_until(latest).await.unwrap();

        assert_eq!(source.next_block(), 3);
        assert_eq!(monitor.total_raised_usd(), 100);
        assert_eq!(store.payments().await[0].identifier, "0xa1");
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x64").unwrap(), 100);
        assert_eq!(
            parse_quantity("0x1bc16d674ec80000").unwrap(),
            2_000_000_000_000_000_000
        );
        assert!(parse_quantity("64").is_err());
        assert!(parse_quantity("0x").is_err());
        assert!(parse_quantity_u64("0x1bc16d674ec8000000000000000").is_err());
    }

    #[test]
    fn test_block_to_candidates() {
        let json = r#"{
            "number": "0x64",
            "hash": "0xblock",
            "transactions": [
                {"hash": "0xaa", "from": "0x01", "to": "0x02", "value": "0x1bc16d674ec80000", "gas": "0x5208"},
                {"hash": "0xbb", "from": "0x01", "to": null, "value": "0x0"}
            ]
        }"#;
        let block: RpcBlock = serde_json::from_str(json).unwrap();
        let candidates = block.into_candidates().unwrap();

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].block_height, 100);
        assert_eq!(candidates[0].value, 2_000_000_000_000_000_000);
        assert_eq!(candidates[1].to, None);
    }

    #[test]
    fn test_rpc_error_response() {
        let json = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"method not found"}}"#;
        let resp: RpcResponse<String> = serde_json::from_str(json).unwrap();
        assert!(resp.result.is_none());
        assert_eq!(resp.error.unwrap().code, -32601);
    }
}
