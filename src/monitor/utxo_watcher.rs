//! UTXO Chain Watcher
//!
//! Handles Bitcoin client events. Each output paying a watched address is
//! a candidate: credited at once when observed already `Building`, handed
//! to the confirmation tracker while `Pending`/`Unknown`, and resolved by
//! later confidence changes. The watch window is checked when an output
//! is about to be credited, whichever way it got there.

use std::sync::Arc;

use super::confirmation::{transition, ConfirmationTracker, Resolution, Transition};
use super::credit::{CreditEngine, CreditOutcome, CreditRequest};
use super::valuation::ValuationError;
use crate::types::{
    CandidateOutput, ChainType, ConfidenceChange, RateKey, UtxoEvent, UtxoTransaction,
};

pub struct UtxoWatcher {
    engine: Arc<CreditEngine>,
    tracker: ConfirmationTracker,
}

impl UtxoWatcher {
    pub fn new(engine: Arc<CreditEngine>) -> Self {
        Self {
            engine,
            tracker: ConfirmationTracker::new(),
        }
    }

    pub fn tracker(&self) -> &ConfirmationTracker {
        &self.tracker
    }

    /// Handle one client event, safe under concurrent invocation
    pub async fn handle(&self, event: UtxoEvent) -> Vec<CreditOutcome> {
        match event {
            UtxoEvent::Observed(tx) => self.on_observed(tx).await,
            UtxoEvent::ConfidenceChanged(change) => self.on_confidence_changed(change).await,
        }
    }

    async fn on_observed(&self, tx: UtxoTransaction) -> Vec<CreditOutcome> {
        let mut outcomes = Vec::new();
        let mut candidates = Vec::new();

        for output in &tx.outputs {
            let Some(address) = output.address.as_deref() else {
                continue;
            };
            let Some(watched) = self.engine.registry().lookup(ChainType::Bitcoin, address).await
            else {
                continue;
            };

            candidates.push(CandidateOutput {
                tx_hash: tx.tx_hash.clone(),
                output_index: output.index,
                value: output.value,
                destination: watched.canonical_key,
                confidence: tx.confidence,
                block_time: tx.block_time,
            });
        }

        if candidates.is_empty() {
            return Vec::new();
        }

        match transition(tx.confidence) {
            Transition::Credit => {
                self.tracker.retire(&tx.tx_hash);
                for candidate in candidates {
                    outcomes.push(self.credit_output(candidate).await);
                }
            }
            Transition::Discard => {
                self.tracker.retire(&tx.tx_hash);
                outcomes.extend(candidates.into_iter().map(|candidate| {
                    CreditOutcome::Discarded {
                        id: candidate.credit_id(),
                        confidence: candidate.confidence,
                    }
                }));
            }
            Transition::Stay => {
                outcomes.extend(
                    self.tracker
                        .track(candidates)
                        .into_iter()
                        .map(|candidate| CreditOutcome::Pending {
                            id: candidate.credit_id(),
                        }),
                );
            }
        }

        outcomes
    }

    async fn on_confidence_changed(&self, change: ConfidenceChange) -> Vec<CreditOutcome> {
        match self.tracker.apply(&change) {
            None => Vec::new(),
            Some(Resolution::Discard(outputs)) => outputs
                .into_iter()
                .map(|output| CreditOutcome::Discarded {
                    id: output.credit_id(),
                    confidence: output.confidence,
                })
                .collect(),
            Some(Resolution::Credit(outputs)) => {
                let mut outcomes = Vec::with_capacity(outputs.len());
                for output in outputs {
                    outcomes.push(self.credit_output(output).await);
                }
                outcomes
            }
        }
    }

    async fn credit_output(&self, output: CandidateOutput) -> CreditOutcome {
        let id = output.credit_id();

        let Some(block_time) = output.block_time else {
            return CreditOutcome::Abandoned {
                error: ValuationError::MissingBlockTime(id.identifier.clone()).into(),
                id,
            };
        };

        // Same window on every path to a credit
        let watched = self
            .engine
            .registry()
            .lookup(ChainType::Bitcoin, &output.destination)
            .await;
        if let Some(watched) = watched {
            if !watched.watch_since.admits_time(block_time) {
                return CreditOutcome::Ignored {
                    id,
                    reason: format!("confirmed at {} before watch window", block_time),
                };
            }
        }

        self.engine
            .credit(CreditRequest {
                id,
                raw_amount: u128::from(output.value),
                rate_key: RateKey::Timestamp(block_time),
                destination: output.destination,
            })
            .await
    }
}
