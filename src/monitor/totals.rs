//! Totals Accumulator
//!
//! Per-chain running USD totals, summed exactly. Only the externally
//! reported aggregate is rounded, up to the next whole dollar.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::types::{round_up_whole, ChainType};

/// Exact per-chain totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TotalsSnapshot {
    pub per_chain: BTreeMap<ChainType, Decimal>,
    pub total_exact: Decimal,
}

#[derive(Debug, Default)]
pub struct TotalsAccumulator {
    totals: Mutex<BTreeMap<ChainType, Decimal>>,
}

impl TotalsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a credited USD amount to a chain's total
    pub fn add(&self, chain: ChainType, usd: Decimal) {
        let mut totals = self.totals.lock().unwrap_or_else(|p| p.into_inner());
        let total = totals.entry(chain).or_insert(Decimal::ZERO);
        *total = total.checked_add(usd).unwrap_or(Decimal::MAX);
    }

    pub fn total(&self, chain: ChainType) -> Decimal {
        let totals = self.totals.lock().unwrap_or_else(|p| p.into_inner());
        totals.get(&chain).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn snapshot(&self) -> TotalsSnapshot {
        let totals = self.totals.lock().unwrap_or_else(|p| p.into_inner());
        let per_chain: BTreeMap<ChainType, Decimal> = ChainType::ALL
            .iter()
            .map(|chain| (*chain, totals.get(chain).copied().unwrap_or(Decimal::ZERO)))
            .collect();
        let total_exact = per_chain
            .values()
            .fold(Decimal::ZERO, |acc, v| acc.checked_add(*v).unwrap_or(Decimal::MAX));

        TotalsSnapshot {
            per_chain,
            total_exact,
        }
    }

    /// Sum over all chains, rounded up to a whole dollar
    pub fn total_raised_usd(&self) -> i64 {
        round_up_whole(self.snapshot().total_exact)
    }
}
