//! Candidate Payment Types
//!
//! What the external blockchain clients deliver to the watchers:
//! - UTXO chain: observed transactions (one candidate per output) and
//!   confidence changes keyed by transaction hash
//! - Account chain: whole transactions, one candidate each

use serde::{Deserialize, Serialize};

use super::chain::ChainType;

/// Client's belief about whether a UTXO-chain transaction is final
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Nothing known yet
    Unknown,
    /// Seen in the mempool, not in a block
    Pending,
    /// In a block on the best chain
    Building,
    /// Replaced or dropped, will never confirm
    Dead,
    /// Double-spend competing with another transaction
    InConflict,
}

impl Confidence {
    /// Terminal states end tracking of an output
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Building | Self::Dead | Self::InConflict)
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Pending => "pending",
            Self::Building => "building",
            Self::Dead => "dead",
            Self::InConflict => "in_conflict",
        };
        write!(f, "{}", s)
    }
}

/// Single output of an observed UTXO-chain transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Output index in the transaction
    pub index: u32,
    /// Value in satoshis
    pub value: u64,
    /// Destination address, if the script pays to one
    pub address: Option<String>,
}

/// UTXO-chain transaction as delivered by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoTransaction {
    pub tx_hash: String,
    pub outputs: Vec<TxOutput>,
    pub confidence: Confidence,
    /// Time of the earliest block the transaction appears in
    pub block_time: Option<u64>,
}

/// Confidence-change event for a UTXO-chain transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceChange {
    pub tx_hash: String,
    pub confidence: Confidence,
    /// Block time, known once the transaction is in a block
    pub block_time: Option<u64>,
}

/// Events delivered by the UTXO-chain client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtxoEvent {
    Observed(UtxoTransaction),
    ConfidenceChanged(ConfidenceChange),
}

/// Output paying a watched address, pending a credit decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateOutput {
    pub tx_hash: String,
    pub output_index: u32,
    pub value: u64,
    /// Canonical destination address
    pub destination: String,
    pub confidence: Confidence,
    pub block_time: Option<u64>,
}

impl CandidateOutput {
    pub fn credit_id(&self) -> CreditId {
        CreditId::output(&self.tx_hash, self.output_index)
    }
}

/// Account-chain transaction as delivered by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTransaction {
    pub tx_hash: String,
    pub from: String,
    /// None for contract creations
    pub to: Option<String>,
    /// Value in wei
    pub value: u128,
    pub block_height: u64,
}

impl CandidateTransaction {
    pub fn credit_id(&self) -> CreditId {
        CreditId::transaction(&self.tx_hash)
    }
}

/// Identifier of a creditable payment
///
/// `txHash_outputIndex` on the UTXO chain, `txHash` on the account chain.
/// Doubles as the payment log's idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CreditId {
    pub chain: ChainType,
    pub identifier: String,
}

impl CreditId {
    pub fn output(tx_hash: &str, index: u32) -> Self {
        Self {
            chain: ChainType::Bitcoin,
            identifier: format!("{}_{}", tx_hash.to_lowercase(), index),
        }
    }

    pub fn transaction(tx_hash: &str) -> Self {
        Self {
            chain: ChainType::Ethereum,
            identifier: tx_hash.to_lowercase(),
        }
    }
}

impl std::fmt::Display for CreditId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(Confidence::Building.is_terminal());
        assert!(Confidence::Dead.is_terminal());
        assert!(Confidence::InConflict.is_terminal());
        assert!(!Confidence::Pending.is_terminal());
        assert!(!Confidence::Unknown.is_terminal());
    }

    #[test]
    fn test_credit_id_format() {
        let id = CreditId::output("ABCDEF", 3);
        assert_eq!(id.to_string(), "abcdef_3");
        assert_eq!(id.chain, ChainType::Bitcoin);

        let id = CreditId::transaction("0xABC");
        assert_eq!(id.to_string(), "0xabc");
        assert_eq!(id.chain, ChainType::Ethereum);
    }
}
