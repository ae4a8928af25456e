//! Pay-in Monitor Service
//!
//! Wires the registry, ledger, totals, valuation and both watchers into one
//! engine and exposes the handlers the chain adapters deliver events to.
//! Every outcome goes through the supervisor.

use bitcoin::Network;
use std::sync::Arc;
use std::time::Duration;

use super::account_watcher::AccountWatcher;
use super::credit::{CreditEngine, CreditOutcome};
use super::ledger::DedupLedger;
use super::notifier::{AddressChangeNotifier, NotifierHandle};
use super::registry::AddressRegistry;
use super::supervisor::{MonitorStats, OutcomeSupervisor};
use super::totals::{TotalsAccumulator, TotalsSnapshot};
use super::utxo_watcher::UtxoWatcher;
use super::valuation::ValuationService;
use crate::common::error::Result;
use crate::storage::{ChangeFeed, InvestorStore, PaymentRecorder, RateStore};
use crate::types::{CandidateTransaction, ChainType, UtxoEvent, WatchSince};

/// Stores the monitor reads from and writes to
#[derive(Clone)]
pub struct MonitorStores {
    pub investors: Arc<dyn InvestorStore>,
    pub rates: Arc<dyn RateStore>,
    pub recorder: Arc<dyn PaymentRecorder>,
}

impl MonitorStores {
    /// Use one store for every role
    pub fn single<S>(store: Arc<S>) -> Self
    where
        S: InvestorStore + RateStore + PaymentRecorder + 'static,
    {
        Self {
            investors: store.clone(),
            rates: store.clone(),
            recorder: store,
        }
    }
}

/// Counts from the startup address load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub added: usize,
    pub already_present: usize,
    pub rejected: usize,
}

pub struct PayinMonitor {
    registry: Arc<AddressRegistry>,
    ledger: Arc<DedupLedger>,
    totals: Arc<TotalsAccumulator>,
    supervisor: OutcomeSupervisor,
    utxo: UtxoWatcher,
    account: AccountWatcher,
    stores: MonitorStores,
    start_block_ether: u64,
}

impl PayinMonitor {
    pub fn new(network: Network, start_block_ether: u64, stores: MonitorStores) -> Self {
        let registry = Arc::new(AddressRegistry::new(network));
        let ledger = Arc::new(DedupLedger::new());
        let totals = Arc::new(TotalsAccumulator::new());

        let engine = Arc::new(CreditEngine::new(
            Arc::clone(&registry),
            Arc::clone(&ledger),
            Arc::clone(&totals),
            ValuationService::new(Arc::clone(&stores.rates)),
            Arc::clone(&stores.investors),
            Arc::clone(&stores.recorder),
        ));

        Self {
            registry,
            ledger,
            totals,
            supervisor: OutcomeSupervisor::new(),
            utxo: UtxoWatcher::new(Arc::clone(&engine)),
            account: AccountWatcher::new(engine),
            stores,
            start_block_ether,
        }
    }

    pub fn registry(&self) -> &Arc<AddressRegistry> {
        &self.registry
    }

    pub fn ledger(&self) -> &Arc<DedupLedger> {
        &self.ledger
    }

    pub fn start_block_ether(&self) -> u64 {
        self.start_block_ether
    }

    /// Seed the ledger with identifiers already in the payment log
    pub async fn seed_persisted_identifiers(&self) -> Result<usize> {
        let identifiers = self.stores.recorder.recorded_identifiers().await?;
        let count = self.ledger.seed_persisted(identifiers);
        tracing::info!(target: "payin_monitor::system", count, "payment log identifiers loaded");
        Ok(count)
    }

    /// Register every existing pay-in key
    ///
    /// Bitcoin keys are watched from the investor's creation time, Ethereum
    /// keys from the configured start block. Malformed keys are skipped.
    pub async fn load_addresses(&self) -> Result<LoadSummary> {
        let rows = self.stores.investors.payin_addresses().await?;
        let mut summary = LoadSummary::default();

        for row in rows {
            let watch_since = match row.chain {
                ChainType::Bitcoin => WatchSince::Timestamp(row.created_at),
                ChainType::Ethereum => WatchSince::BlockHeight(self.start_block_ether),
            };

            match self.registry.register(row.chain, &row.origin_key, watch_since).await {
                Ok(super::registry::Registration::Added(_)) => summary.added += 1,
                Ok(super::registry::Registration::AlreadyPresent(_)) => {
                    summary.already_present += 1
                }
                Err(_) => summary.rejected += 1,
            }
        }

        tracing::info!(
            target: "payin_monitor::system",
            added = summary.added,
            already_present = summary.already_present,
            rejected = summary.rejected,
            "pay-in addresses loaded"
        );
        Ok(summary)
    }

    /// Start admitting keys registered at runtime
    pub fn spawn_notifier(&self, feed: Arc<dyn ChangeFeed>, poll_wait: Duration) -> NotifierHandle {
        AddressChangeNotifier::new(Arc::clone(&self.registry), feed, poll_wait).start()
    }

    /// Handler for Bitcoin client events
    pub async fn on_utxo_event(&self, event: UtxoEvent) -> Vec<CreditOutcome> {
        let outcomes = self.utxo.handle(event).await;
        self.supervisor.observe_all(&outcomes);
        outcomes
    }

    /// Handler for Ethereum transactions
    pub async fn on_account_transaction(&self, tx: CandidateTransaction) -> Vec<CreditOutcome> {
        let outcomes = self.account.handle(tx).await;
        self.supervisor.observe_all(&outcomes);
        outcomes
    }

    /// Sum of all chains' totals, rounded up to a whole dollar
    pub fn total_raised_usd(&self) -> i64 {
        self.totals.total_raised_usd()
    }

    pub fn totals(&self) -> TotalsSnapshot {
        self.totals.snapshot()
    }

    pub fn stats(&self) -> MonitorStats {
        self.supervisor.stats()
    }

    /// Transactions waiting for confirmation
    pub fn pending_transactions(&self) -> usize {
        self.utxo.tracker().len()
    }
}
