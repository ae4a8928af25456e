//! Dedup Ledger
//!
//! Set of credited identifiers enforcing at-most-once crediting. A credit
//! first claims its identifier; the claim excludes concurrent credits of
//! the same identifier until it is committed or dropped.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::types::CreditId;

#[derive(Debug, Default)]
struct LedgerState {
    /// Identifiers credited during this process lifetime
    credited: HashSet<CreditId>,
    /// Identifiers with a credit in progress
    in_flight: HashSet<CreditId>,
    /// Identifiers already present in the durable payment log
    persisted: HashSet<String>,
}

/// At-most-once credit ledger
#[derive(Debug, Default)]
pub struct DedupLedger {
    state: Mutex<LedgerState>,
}

impl DedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim an identifier for crediting
    ///
    /// Returns `None` when the identifier is already credited or another
    /// credit for it is in progress.
    pub fn try_claim(self: &Arc<Self>, id: &CreditId) -> Option<CreditClaim> {
        let mut state = self.state();
        if state.credited.contains(id) || !state.in_flight.insert(id.clone()) {
            return None;
        }

        Some(CreditClaim {
            ledger: Arc::clone(self),
            id: id.clone(),
        })
    }

    pub fn is_credited(&self, id: &CreditId) -> bool {
        self.state().credited.contains(id)
    }

    pub fn credited_count(&self) -> usize {
        self.state().credited.len()
    }

    /// Seed identifiers found in the payment log at startup
    pub fn seed_persisted<I>(&self, identifiers: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut state = self.state();
        state.persisted.extend(identifiers);
        state.persisted.len()
    }

    /// Whether the payment log already holds a record for this identifier
    pub fn is_persisted(&self, id: &CreditId) -> bool {
        self.state().persisted.contains(&id.identifier)
    }

    pub fn mark_persisted(&self, id: &CreditId) {
        self.state().persisted.insert(id.identifier.clone());
    }
}

/// Exclusive right to credit one identifier
///
/// Dropping the claim without committing releases the identifier.
#[derive(Debug)]
pub struct CreditClaim {
    ledger: Arc<DedupLedger>,
    id: CreditId,
}

impl CreditClaim {
    pub fn id(&self) -> &CreditId {
        &self.id
    }

    /// Mark the identifier credited, running `apply` under the ledger lock
    ///
    /// Ledger insert and `apply` (the totals update) form one atomic unit.
    pub fn commit_with<F, T>(self, apply: F) -> T
    where
        F: FnOnce() -> T,
    {
        let mut state = self.ledger.state();
        state.credited.insert(self.id.clone());
        state.in_flight.remove(&self.id);
        let result = apply();
        drop(state);
        result
    }
}

impl Drop for CreditClaim {
    fn drop(&mut self) {
        self.ledger.state().in_flight.remove(&self.id);
    }
}
