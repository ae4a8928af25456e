//! Outcome Supervisor
//!
//! Receives every outcome produced by the watchers, logs it at the level
//! its error policy calls for and keeps running counters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;

use super::credit::{CreditOutcome, Persistence};
use crate::common::error::ErrorPolicy;
use crate::common::logging::{log_payin_alert, log_payment_event, LogLevel};
use crate::types::{minor_units_to_display, ChainType, PaymentRecord};

/// Monitor statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStats {
    pub credited: u64,
    pub duplicates: u64,
    pub ignored: u64,
    pub pending: u64,
    pub discarded: u64,
    pub abandoned: u64,
    pub persistence_failures: u64,
    pub outbound_alerts: u64,
    /// Abandoned credits per error code
    pub abandoned_by_code: BTreeMap<String, u64>,
}

impl std::fmt::Display for MonitorStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Payments: {} credited | {} duplicate | {} pending | {} discarded | {} abandoned | {} unpersisted | {} alerts",
            self.credited,
            self.duplicates,
            self.pending,
            self.discarded,
            self.abandoned,
            self.persistence_failures,
            self.outbound_alerts
        )
    }
}

#[derive(Debug, Default)]
pub struct OutcomeSupervisor {
    stats: RwLock<MonitorStats>,
}

impl OutcomeSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn observe_all(&self, outcomes: &[CreditOutcome]) {
        for outcome in outcomes {
            self.observe(outcome);
        }
    }

    /// Log one outcome and count it
    pub fn observe(&self, outcome: &CreditOutcome) {
        let mut stats = self.stats.write().unwrap_or_else(|p| p.into_inner());

        match outcome {
            CreditOutcome::Credited {
                record,
                persistence,
            } => {
                stats.credited += 1;
                let data = credited_event_data(record);

                match persistence {
                    Persistence::Written | Persistence::AlreadyLogged => log_payment_event(
                        LogLevel::Info,
                        "payment credited",
                        &record.identifier,
                        data,
                        None,
                    ),
                    Persistence::Failed(e) => {
                        // Ledger and totals already advanced, the record is
                        // logged in full for reconciliation
                        stats.persistence_failures += 1;
                        let record_json =
                            serde_json::to_value(record).unwrap_or(serde_json::Value::Null);
                        log_payment_event(
                            LogLevel::Error,
                            "payment credited but not persisted",
                            &record.identifier,
                            serde_json::json!({ "record": record_json }),
                            Some(("PERSISTENCE_ERROR", &e.to_string())),
                        );
                    }
                }
            }
            CreditOutcome::Duplicate { id } => {
                stats.duplicates += 1;
                tracing::debug!(target: "payin_monitor::payment", identifier = %id, "already credited");
            }
            CreditOutcome::Pending { id } => {
                stats.pending += 1;
                tracing::info!(target: "payin_monitor::payment", identifier = %id, "awaiting confirmation");
            }
            CreditOutcome::Discarded { id, confidence } => {
                stats.discarded += 1;
                log_payment_event(
                    LogLevel::Warn,
                    "payment discarded",
                    &id.identifier,
                    serde_json::json!({ "confidence": confidence.to_string() }),
                    None,
                );
            }
            CreditOutcome::Ignored { id, reason } => {
                stats.ignored += 1;
                tracing::debug!(target: "payin_monitor::payment", identifier = %id, reason = %reason, "payment ignored");
            }
            CreditOutcome::Abandoned { id, error } => {
                stats.abandoned += 1;
                *stats
                    .abandoned_by_code
                    .entry(error.error_code().to_string())
                    .or_default() += 1;
                let level = match error.policy() {
                    ErrorPolicy::Fatal => LogLevel::Error,
                    ErrorPolicy::SkipItem | ErrorPolicy::LogAndContinue => LogLevel::Warn,
                };
                log_payment_event(
                    level,
                    "payment abandoned",
                    &id.identifier,
                    serde_json::json!({ "chain": id.chain.to_string() }),
                    Some((error.error_code(), &error.to_string())),
                );
            }
            CreditOutcome::OutboundTransfer {
                tx_hash,
                from,
                raw_amount,
            } => {
                stats.outbound_alerts += 1;
                log_payin_alert(tx_hash, from, *raw_amount);
            }
        }
    }
}

/// Payment log body for a credited record
fn credited_event_data(record: &PaymentRecord) -> serde_json::Value {
    let amount = match record.currency.parse::<ChainType>() {
        Ok(chain) => minor_units_to_display(chain, record.raw_amount),
        Err(_) => record.raw_amount.to_string(),
    };

    serde_json::json!({
        "currency": record.currency,
        "raw_amount": record.raw_amount.to_string(),
        "amount": amount,
        "fx_rate": record.fx_rate.to_string(),
        "usd": record.usd_amount.to_string(),
        "email": record.recipient_email,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::valuation::ValuationError;
    use crate::storage::StorageError;
    use crate::types::{ChainType, Confidence, CreditId, PaymentRecord, RateKey};
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn record() -> PaymentRecord {
        PaymentRecord {
            identifier: "aa_0".to_string(),
            currency: "BTC".to_string(),
            raw_amount: 1_000_000,
            fx_rate: Decimal::from(2500),
            usd_amount: Decimal::from(25),
            recipient_email: None,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_counts_every_outcome_kind() {
        let supervisor = OutcomeSupervisor::new();
        let id = CreditId::output("aa", 0);

        supervisor.observe_all(&[
            CreditOutcome::Credited {
                record: record(),
                persistence: Persistence::Written,
            },
            CreditOutcome::Credited {
                record: record(),
                persistence: Persistence::Failed(StorageError::Database("locked".to_string())),
            },
            CreditOutcome::Duplicate { id: id.clone() },
            CreditOutcome::Pending { id: id.clone() },
            CreditOutcome::Discarded {
                id: id.clone(),
                confidence: Confidence::Dead,
            },
            CreditOutcome::Ignored {
                id: id.clone(),
                reason: "before watch window".to_string(),
            },
            CreditOutcome::Abandoned {
                id,
                error: ValuationError::RateUnavailable {
                    chain: ChainType::Bitcoin,
                    key: RateKey::Timestamp(1),
                }
                .into(),
            },
            CreditOutcome::OutboundTransfer {
                tx_hash: "0xbb".to_string(),
                from: "0xcc".to_string(),
                raw_amount: 1,
            },
        ]);

        let stats = supervisor.stats();
        assert_eq!(
            stats,
            MonitorStats {
                credited: 2,
                duplicates: 1,
                ignored: 1,
                pending: 1,
                discarded: 1,
                abandoned: 1,
                persistence_failures: 1,
                outbound_alerts: 1,
                abandoned_by_code: BTreeMap::from([("RATE_UNAVAILABLE".to_string(), 1)]),
            }
        );
        assert!(stats.to_string().contains("2 credited"));
    }

    #[test]
    fn test_credited_event_shows_readable_amount() {
        let data = credited_event_data(&record());
        assert_eq!(data["raw_amount"], "1000000");
        assert_eq!(data["amount"], "1,000,000 sats (0.01000000 BTC)");
        assert_eq!(data["usd"], "25");
    }

    #[test]
    fn test_abandoned_outcomes_keep_their_codes() {
        let supervisor = OutcomeSupervisor::new();
        let abandoned = |index: u32, error: ValuationError| CreditOutcome::Abandoned {
            id: CreditId::output("dd", index),
            error: error.into(),
        };

        supervisor.observe_all(&[
            abandoned(
                0,
                ValuationError::RateUnavailable {
                    chain: ChainType::Ethereum,
                    key: RateKey::BlockHeight(7),
                },
            ),
            abandoned(1, ValuationError::MissingBlockTime("dd_1".to_string())),
            abandoned(2, ValuationError::AmountOutOfRange(u128::MAX)),
            abandoned(
                3,
                ValuationError::Lookup(StorageError::Database("disk I/O error".to_string())),
            ),
        ]);

        let stats = supervisor.stats();
        assert_eq!(stats.abandoned, 4);
        for code in [
            "RATE_UNAVAILABLE",
            "MISSING_BLOCK_TIME",
            "AMOUNT_OUT_OF_RANGE",
            "PERSISTENCE_ERROR",
        ] {
            assert_eq!(stats.abandoned_by_code.get(code), Some(&1), "{}", code);
        }
    }
}
