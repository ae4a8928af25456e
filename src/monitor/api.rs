//! Status Endpoints
//!
//! - GET / - Total raised in USD, rounded up to a whole dollar (plain text)
//! - GET /stats - Exact per-chain totals and monitor statistics

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use super::service::PayinMonitor;
use super::supervisor::MonitorStats;
use super::totals::TotalsSnapshot;

/// GET /stats response
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_raised_usd: i64,
    pub totals: TotalsSnapshot,
    pub stats: MonitorStats,
    pub watched_addresses: usize,
    pub pending_transactions: usize,
}

/// Create the status router
pub fn create_status_router(monitor: Arc<PayinMonitor>, enable_cors: bool) -> Router {
    let router = Router::new()
        .route("/", get(handle_total_raised))
        .route("/stats", get(handle_stats))
        .with_state(monitor);

    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router.layer(cors)
    } else {
        router
    }
}

/// GET /
async fn handle_total_raised(State(monitor): State<Arc<PayinMonitor>>) -> impl IntoResponse {
    (StatusCode::OK, monitor.total_raised_usd().to_string())
}

/// GET /stats
async fn handle_stats(State(monitor): State<Arc<PayinMonitor>>) -> impl IntoResponse {
    let response = StatsResponse {
        total_raised_usd: monitor.total_raised_usd(),
        totals: monitor.totals(),
        stats: monitor.stats(),
        watched_addresses: monitor.registry().len().await,
        pending_transactions: monitor.pending_transactions(),
    };

    Json(response)
}

/// Serve the status endpoints until the process stops
pub async fn run_status_server(
    monitor: Arc<PayinMonitor>,
    port: u16,
    enable_cors: bool,
) -> Result<(), std::io::Error> {
    let app = create_status_router(monitor, enable_cors);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(target: "payin_monitor::system", %addr, cors = enable_cors, "status endpoint listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::service::MonitorStores;
    use crate::storage::MemoryStore;
    use crate::types::{CandidateTransaction, ChainType, WatchSince};
    use axum::{body::Body, http::Request};
    use bitcoin::Network;
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use tower::ServiceExt;

    const ETH_ADDRESS: &str = "0x52908400098527886e0f7030069857d2e4169ee7";

    async fn funded_monitor() -> Arc<PayinMonitor> {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_rate(0, Some(1), None, Some(Decimal::from_str("200.005").unwrap()))
            .await;

        let monitor = Arc::new(PayinMonitor::new(
            Network::Bitcoin,
            1,
            MonitorStores::single(store),
        ));
        monitor
            .registry()
            .register(ChainType::Ethereum, ETH_ADDRESS, WatchSince::BlockHeight(1))
            .await
            .unwrap();
        monitor
            .on_account_transaction(CandidateTransaction {
                tx_hash: "0x01".to_string(),
                from: "0xde0b295669a9fd93d5f28d9ec85e40f4cb697bae".to_string(),
                to: Some(ETH_ADDRESS.to_string()),
                value: 1_000_000_000_000_000_000,
                block_height: 5,
            })
            .await;
        monitor
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_total_raised_rounds_up() {
        let app = create_status_router(funded_monitor().await, false);

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        // 200.00 after truncation to cents
        assert_eq!(body_string(response).await, "200");
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let app = create_status_router(funded_monitor().await, true);

        let response = app
            .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["total_raised_usd"], 200);
        assert_eq!(json["stats"]["credited"], 1);
        assert_eq!(json["watched_addresses"], 1);
        assert_eq!(json["totals"]["per_chain"]["ethereum"], "200.00");
    }

    #[tokio::test]
    async fn test_empty_monitor_reports_zero() {
        let monitor = Arc::new(PayinMonitor::new(
            Network::Bitcoin,
            1,
            MonitorStores::single(Arc::new(MemoryStore::new())),
        ));
        let app = create_status_router(monitor, false);

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_string(response).await, "0");
    }
}
