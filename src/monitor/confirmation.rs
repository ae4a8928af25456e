//! Confirmation State Machine
//!
//! Tracks UTXO-chain transactions that pay a watched address but are not
//! final yet. Each tracked transaction holds its candidate outputs and the
//! last confidence reported for it.
//!
//! ```text
//! Unknown ─┐
//!          ├──▶ Building        credit each output
//! Pending ─┤
//!          └──▶ Dead/InConflict discard each output
//! ```
//!
//! A terminal transition removes the entry, so no later confidence event
//! for that transaction is handled.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::types::{CandidateOutput, Confidence, ConfidenceChange};

/// Effect of entering a confidence state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Not final, keep waiting
    Stay,
    /// Final on the best chain
    Credit,
    /// Will never confirm
    Discard,
}

/// Transition taken when a candidate enters `next`
pub fn transition(next: Confidence) -> Transition {
    match next {
        Confidence::Building => Transition::Credit,
        Confidence::Dead | Confidence::InConflict => Transition::Discard,
        Confidence::Unknown | Confidence::Pending => Transition::Stay,
    }
}

/// Outputs released by a terminal transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Credit(Vec<CandidateOutput>),
    Discard(Vec<CandidateOutput>),
}

#[derive(Debug)]
struct TrackedTransaction {
    state: Confidence,
    outputs: Vec<CandidateOutput>,
}

/// Per-transaction finality tracker
#[derive(Debug, Default)]
pub struct ConfirmationTracker {
    tracked: Mutex<HashMap<String, TrackedTransaction>>,
}

impl ConfirmationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn tracked(&self) -> MutexGuard<'_, HashMap<String, TrackedTransaction>> {
        self.tracked.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Start tracking non-final outputs
    ///
    /// Returns the outputs that were not tracked before.
    pub fn track(&self, outputs: Vec<CandidateOutput>) -> Vec<CandidateOutput> {
        let mut tracked = self.tracked();
        let mut added = Vec::new();

        for output in outputs {
            let entry = tracked
                .entry(output.tx_hash.to_lowercase())
                .or_insert_with(|| TrackedTransaction {
                    state: output.confidence,
                    outputs: Vec::new(),
                });

            if entry
                .outputs
                .iter()
                .all(|existing| existing.output_index != output.output_index)
            {
                entry.outputs.push(output.clone());
                added.push(output);
            }
        }

        added
    }

    /// Apply a confidence change
    ///
    /// Returns `None` for untracked transactions and non-terminal changes.
    pub fn apply(&self, change: &ConfidenceChange) -> Option<Resolution> {
        let key = change.tx_hash.to_lowercase();
        let mut tracked = self.tracked();

        match transition(change.confidence) {
            Transition::Stay => {
                if let Some(entry) = tracked.get_mut(&key) {
                    entry.state = change.confidence;
                }
                None
            }
            Transition::Credit => {
                let entry = tracked.remove(&key)?;
                let outputs = entry
                    .outputs
                    .into_iter()
                    .map(|mut output| {
                        output.confidence = change.confidence;
                        if change.block_time.is_some() {
                            output.block_time = change.block_time;
                        }
                        output
                    })
                    .collect();
                Some(Resolution::Credit(outputs))
            }
            Transition::Discard => {
                let entry = tracked.remove(&key)?;
                let outputs = entry
                    .outputs
                    .into_iter()
                    .map(|mut output| {
                        output.confidence = change.confidence;
                        output
                    })
                    .collect();
                Some(Resolution::Discard(outputs))
            }
        }
    }

    /// Stop tracking a transaction observed directly in a terminal state
    pub fn retire(&self, tx_hash: &str) -> bool {
        self.tracked().remove(&tx_hash.to_lowercase()).is_some()
    }

    pub fn state_of(&self, tx_hash: &str) -> Option<Confidence> {
        self.tracked()
            .get(&tx_hash.to_lowercase())
            .map(|entry| entry.state)
    }

    pub fn is_tracked(&self, tx_hash: &str) -> bool {
        self.tracked().contains_key(&tx_hash.to_lowercase())
    }

    /// Number of tracked transactions
    pub fn len(&self) -> usize {
        self.tracked().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked().is_empty()
    }
}
