//! Credit Path
//!
//! The credit algorithm shared by both watchers:
//!
//! 1. Claim the identifier in the dedup ledger, skip if already credited
//! 2. Value the payment at the historical rate
//! 3. Resolve the recipient's email (best effort)
//! 4. Append the payment record
//! 5. Mark the identifier credited and
//! 6. add the USD value to the chain's total, atomically with step 5
//!
//! Every call yields a [`CreditOutcome`] for the supervisor.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;

use super::ledger::DedupLedger;
use super::registry::AddressRegistry;
use super::totals::TotalsAccumulator;
use super::valuation::ValuationService;
use crate::common::error::MonitorError;
use crate::storage::{InvestorStore, PaymentRecorder, StorageError};
use crate::types::{ChainType, Confidence, CreditId, PaymentRecord, RateKey};

/// Fate of the payment log write for a credit
#[derive(Debug)]
pub enum Persistence {
    Written,
    /// Logged by an earlier run, not written again
    AlreadyLogged,
    /// Write failed, in-memory state still advanced
    Failed(StorageError),
}

/// Result of handling one candidate
#[derive(Debug)]
pub enum CreditOutcome {
    /// Credited and added to the total
    Credited {
        record: PaymentRecord,
        persistence: Persistence,
    },
    /// Already credited or being credited
    Duplicate { id: CreditId },
    /// Waiting for the confirmation state machine
    Pending { id: CreditId },
    /// Reached a terminal failure state, never credited
    Discarded { id: CreditId, confidence: Confidence },
    /// Paid a watched address outside its watch window
    Ignored { id: CreditId, reason: String },
    /// Credit given up, ledger and totals untouched
    Abandoned { id: CreditId, error: MonitorError },
    /// Funds left a watched address
    OutboundTransfer {
        tx_hash: String,
        from: String,
        raw_amount: u128,
    },
}

/// A payment to credit
#[derive(Debug, Clone)]
pub struct CreditRequest {
    pub id: CreditId,
    pub raw_amount: u128,
    pub rate_key: RateKey,
    /// Canonical address that was paid
    pub destination: String,
}

impl CreditRequest {
    pub fn chain(&self) -> ChainType {
        self.id.chain
    }
}

/// Shared credit path
pub struct CreditEngine {
    registry: Arc<AddressRegistry>,
    ledger: Arc<DedupLedger>,
    totals: Arc<TotalsAccumulator>,
    valuation: ValuationService,
    investors: Arc<dyn InvestorStore>,
    recorder: Arc<dyn PaymentRecorder>,
}

impl CreditEngine {
    pub fn new(
        registry: Arc<AddressRegistry>,
        ledger: Arc<DedupLedger>,
        totals: Arc<TotalsAccumulator>,
        valuation: ValuationService,
        investors: Arc<dyn InvestorStore>,
        recorder: Arc<dyn PaymentRecorder>,
    ) -> Self {
        Self {
            registry,
            ledger,
            totals,
            valuation,
            investors,
            recorder,
        }
    }

    pub fn registry(&self) -> &Arc<AddressRegistry> {
        &self.registry
    }

    pub fn ledger(&self) -> &Arc<DedupLedger> {
        &self.ledger
    }

    /// Run the credit algorithm for one payment
    pub async fn credit(&self, request: CreditRequest) -> CreditOutcome {
        let chain = request.chain();

        let Some(claim) = self.ledger.try_claim(&request.id) else {
            return CreditOutcome::Duplicate { id: request.id };
        };

        let valuation = match self
            .valuation
            .value_in_usd(chain, request.raw_amount, request.rate_key)
            .await
        {
            Ok(valuation) => valuation,
            Err(e) => {
                return CreditOutcome::Abandoned {
                    id: request.id,
                    error: e.into(),
                }
            }
        };

        let recipient_email = self.recipient_email(chain, &request.destination).await;

        let record = PaymentRecord {
            identifier: request.id.identifier.clone(),
            currency: chain.currency().to_string(),
            raw_amount: request.raw_amount,
            fx_rate: valuation.sample.usd_per_unit,
            usd_amount: valuation.usd,
            recipient_email,
            recorded_at: Utc::now(),
        };

        let persistence = if self.ledger.is_persisted(&request.id) {
            Persistence::AlreadyLogged
        } else {
            match self.recorder.append(&record).await {
                Ok(()) => {
                    self.ledger.mark_persisted(&request.id);
                    Persistence::Written
                }
                Err(e) => Persistence::Failed(e),
            }
        };

        let usd: Decimal = record.usd_amount;
        claim.commit_with(|| self.totals.add(chain, usd));

        CreditOutcome::Credited {
            record,
            persistence,
        }
    }

    async fn recipient_email(&self, chain: ChainType, destination: &str) -> Option<String> {
        let origin_key = self.registry.origin_key_for(chain, destination).await?;

        match self.investors.email_for_origin_key(chain, &origin_key).await {
            Ok(email) => email,
            Err(e) => {
                tracing::debug!(
                    chain = %chain,
                    origin_key = %origin_key,
                    error = %e,
                    "recipient email lookup failed"
                );
                None
            }
        }
    }
}
