//! Account Chain Watcher
//!
//! Handles Ethereum transactions. A transaction to a watched address is
//! credited on observation, valued at its block height. A transaction from
//! a watched address is only raised as an alert.

use std::sync::Arc;

use super::credit::{CreditEngine, CreditOutcome, CreditRequest};
use crate::types::{CandidateTransaction, ChainType, RateKey};

pub struct AccountWatcher {
    engine: Arc<CreditEngine>,
}

impl AccountWatcher {
    pub fn new(engine: Arc<CreditEngine>) -> Self {
        Self { engine }
    }

    /// Handle one observed transaction, safe under concurrent invocation
    pub async fn handle(&self, tx: CandidateTransaction) -> Vec<CreditOutcome> {
        let registry = self.engine.registry();
        let mut outcomes = Vec::new();

        if registry.lookup(ChainType::Ethereum, &tx.from).await.is_some() {
            outcomes.push(CreditOutcome::OutboundTransfer {
                tx_hash: tx.tx_hash.clone(),
                from: tx.from.clone(),
                raw_amount: tx.value,
            });
        }

        let watched = match tx.to.as_deref() {
            Some(to) => registry.lookup(ChainType::Ethereum, to).await,
            None => None,
        };

        if let Some(watched) = watched {
            let outcome = self
                .engine
                .credit(CreditRequest {
                    id: tx.credit_id(),
                    raw_amount: tx.value,
                    rate_key: RateKey::BlockHeight(tx.block_height),
                    destination: watched.canonical_key,
                })
                .await;
            outcomes.push(outcome);
        }

        outcomes
    }
}
