//! Payment Detection & Valuation Engine
//!
//! Watches Bitcoin and Ethereum for payments to registered pay-in addresses,
//! values each payment at its historical USD rate, credits it at most once
//! and keeps the running total raised.
//!
//! Flow:
//! ```text
//! chain client ──▶ watcher ──▶ registry lookup ──▶ confirmation (UTXO only)
//!                                 │
//!                                 ▼
//!                 dedup ledger ──▶ valuation ──▶ payment log + totals
//!
//! change feed ──▶ notifier ──▶ registry
//! ```

pub mod account_watcher;
pub mod api;
pub mod confirmation;
pub mod credit;
pub mod ledger;
pub mod notifier;
pub mod registry;
pub mod service;
pub mod supervisor;
pub mod totals;
pub mod utxo_watcher;
pub mod valuation;

// Re-exports for convenience
pub use account_watcher::AccountWatcher;
pub use api::{create_status_router, run_status_server, StatsResponse};
pub use confirmation::{transition, ConfirmationTracker, Resolution, Transition};
pub use credit::{CreditEngine, CreditOutcome, CreditRequest, Persistence};
pub use ledger::{CreditClaim, DedupLedger};
pub use notifier::{AddressChangeNotifier, NotifierHandle};
pub use registry::{AddressParsingError, AddressRegistry, Registration};
pub use service::{LoadSummary, MonitorStores, PayinMonitor};
pub use supervisor::{MonitorStats, OutcomeSupervisor};
pub use totals::{TotalsAccumulator, TotalsSnapshot};
pub use utxo_watcher::UtxoWatcher;
pub use valuation::{Valuation, ValuationError, ValuationService};
