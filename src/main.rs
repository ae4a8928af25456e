//! Pay-in Monitor Launcher
//!
//! Run modes:
//!   cargo run                    - Start the monitor
//!   cargo run -- run [--port N]  - Start the monitor
//!   cargo run -- check-config    - Validate configuration and exit

use payin_monitor::client::{EsploraSource, EthereumSource};
use payin_monitor::common::{init_from_config, MonitorConfig, MonitorError, Result};
use payin_monitor::monitor::{run_status_server, MonitorStores, PayinMonitor};
use payin_monitor::storage::SqliteStore;
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("run");

    let result = match command {
        "run" => run_monitor(&args[args.len().min(2)..]).await,
        "check-config" => check_config(),
        _ => {
            print_usage();
            return;
        }
    };

    if let Err(e) = result {
        tracing::error!(
            target: "payin_monitor::system",
            code = e.error_code(),
            error = %e,
            "monitor stopped"
        );
        eprintln!("Error [{}]: {}", e.error_code(), e);
        std::process::exit(1);
    }
}

fn print_usage() {
    println!("Pay-in Monitor");
    println!();
    println!("Usage:");
    println!("  payin-monitor [run] [--port <port>]   Start the monitor (default)");
    println!("  payin-monitor check-config            Validate configuration");
    println!();
    println!("Environment Variables:");
    println!("  ETHER_FULLNODE_URL   Ethereum JSON-RPC endpoint (required)");
    println!("  DATABASE_PATH        SQLite database file (required)");
    println!("  BITCOIN_NETWORK      regtest | testnet | mainnet (default: mainnet)");
    println!("  ESPLORA_URL          Esplora API base URL (default: per network)");
    println!("  START_BLOCK_ETHER    First Ethereum block to scan (default: 1)");
    println!("  CREATE_SCHEMA        Install address change triggers");
    println!("  ENABLE_CORS          Permissive CORS on the status endpoint");
    println!("  API_PORT             Status endpoint port (default: 4567)");
    println!("  NOTIFY_POLL_MS       Change feed wait per poll (default: 1000)");
    println!("  CHAIN_POLL_SECS      Chain poll interval (default: 15)");
    println!("  LOG_LEVEL, LOG_JSON  Logging");
}

fn check_config() -> Result<()> {
    let config = MonitorConfig::from_env()?;
    init_from_config(&config)?;
    config.log_summary();
    println!("Configuration OK");
    Ok(())
}

async fn run_monitor(args: &[String]) -> Result<()> {
    let mut config = MonitorConfig::from_env()?;

    // Parse arguments
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--port" if i + 1 < args.len() => {
                config.api_port = args[i + 1].parse().map_err(|_| {
                    payin_monitor::common::ConfigError::InvalidValue(
                        "--port".to_string(),
                        args[i + 1].clone(),
                    )
                })?;
                i += 2;
            }
            _ => i += 1,
        }
    }

    init_from_config(&config)?;
    config.log_summary();

    let store = Arc::new(SqliteStore::open(&config.database_path)?);
    if config.create_schema {
        store.install_change_triggers()?;
    }
    // Opened before the bulk load so no registration falls in between
    let feed = store.change_feed()?;

    let monitor = Arc::new(PayinMonitor::new(
        config.bitcoin_network.bitcoin_network(),
        config.start_block_ether,
        MonitorStores::single(Arc::clone(&store)),
    ));

    monitor.seed_persisted_identifiers().await?;
    monitor.load_addresses().await?;
    let notifier = monitor.spawn_notifier(Arc::new(feed), config.notify_poll_interval);

    let bitcoin = Arc::new(EsploraSource::new(
        &config.esplora_url,
        Arc::clone(&monitor),
        config.chain_poll_interval,
    ));
    let ethereum = Arc::new(EthereumSource::new(
        &config.ether_fullnode_url,
        Arc::clone(&monitor),
        config.chain_poll_interval,
    ));

    bitcoin.catch_up().await?;
    ethereum.catch_up().await?;
    tracing::info!(
        target: "payin_monitor::system",
        total_raised_usd = monitor.total_raised_usd(),
        "catch-up complete"
    );

    tokio::spawn(Arc::clone(&bitcoin).run());
    tokio::spawn(Arc::clone(&ethereum).run());

    let served = tokio::select! {
        result = run_status_server(Arc::clone(&monitor), config.api_port, config.enable_cors) => {
            result.map_err(MonitorError::from)
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(target: "payin_monitor::system", "shutdown requested");
            Ok(())
        }
    };

    if !notifier.stop_and_join(config.notify_poll_interval * 2).await {
        tracing::warn!(target: "payin_monitor::system", "notifier did not stop in time");
    }

    tracing::info!(
        target: "payin_monitor::system",
        total_raised_usd = monitor.total_raised_usd(),
        "{}",
        monitor.stats()
    );

    served
}
