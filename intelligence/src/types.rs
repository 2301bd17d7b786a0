//! Core types for the strike engine

use std::fmt;
use std::time::Duration;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Eip1559TransactionRequest, H256, U256};
use serde::{Deserialize, Serialize};
use vesper_dataplane::Chain;

/// Confidence score in `[-1.0, 1.0]`
pub type Confidence = f64;

/// Score used whenever the intelligence feed cannot answer
pub const NEUTRAL_CONFIDENCE: Confidence = 0.0;

/// Result of one cycle search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Margin cleared the configured minimum
    pub profitable: bool,

    /// Product of edge weights minus one
    pub margin: f64,

    /// `margin` times the configured notional
    pub estimated_profit: f64,

    /// Node sequence, origin repeated at the end; empty when nothing was found
    pub path: Vec<String>,

    /// Venue of each hop, same length as the hop count
    pub venues: Vec<Option<String>>,

    /// Encoded executor call; empty when not profitable
    pub payload: Bytes,

    /// The deadline or step budget cut the search short
    pub partial: bool,

    /// Nodes expanded
    pub steps: u64,
}

impl Signal {
    /// A signal that found nothing
    pub fn unprofitable(partial: bool, steps: u64) -> Self {
        Self {
            profitable: false,
            margin: 0.0,
            estimated_profit: 0.0,
            path: Vec::new(),
            venues: Vec::new(),
            payload: Bytes::new(),
            partial,
            steps,
        }
    }

    /// Number of edges in the cycle
    pub fn hops(&self) -> usize {
        self.path.len().saturating_sub(1)
    }
}

/// How a strike leaves the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrikeChannel {
    /// Single-transaction bundle for a private relay
    PrivateRelay { target_block: u64 },

    /// Broadcast through the chain client
    Public,
}

impl fmt::Display for StrikeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrikeChannel::PrivateRelay { target_block } => write!(f, "relay@{}", target_block),
            StrikeChannel::Public => write!(f, "public"),
        }
    }
}

/// Everything needed to build and sign one strike transaction
#[derive(Debug, Clone)]
pub struct StrikeRecord {
    pub chain: Chain,
    pub from: Address,
    pub executor: Address,
    pub payload: Bytes,
    pub gas_limit: u64,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub fee_tier: String,
    pub nonce: U256,
    pub channel: StrikeChannel,
}

impl StrikeRecord {
    /// EIP-1559 transaction template
    pub fn to_transaction(&self) -> TypedTransaction {
        Eip1559TransactionRequest::new()
            .chain_id(self.chain.chain_id())
            .from(self.from)
            .to(self.executor)
            .data(self.payload.clone())
            .gas(self.gas_limit)
            .max_fee_per_gas(self.max_fee_per_gas)
            .max_priority_fee_per_gas(self.max_priority_fee_per_gas)
            .nonce(self.nonce)
            .value(U256::zero())
            .into()
    }
}

/// Acknowledgement of a submitted strike
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrikeReceipt {
    pub chain: Chain,
    pub channel: StrikeChannel,
    pub fee_tier: String,
    pub nonce: U256,

    /// Hash returned by a public submission
    pub tx_hash: Option<H256>,

    /// Hash returned by the relay, when it returns one
    pub bundle_hash: Option<H256>,
}

/// Why a trigger was not dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// Confidence at or below the gate threshold
    LowConfidence,

    /// No cycle cleared the minimum margin
    Unprofitable,

    /// Dry-run mode
    DryRun,
}

/// Per-trigger state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerState {
    Received,
    Scoring,
    Gated,
    Dispatching,
    Submitted,
    Failed,
    Skipped(SkipReason),
}

impl TriggerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TriggerState::Submitted | TriggerState::Failed | TriggerState::Skipped(_))
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_advance_to(&self, next: TriggerState) -> bool {
        use TriggerState::*;
        matches!(
            (self, next),
            (Received, Scoring)
                | (Scoring, Gated)
                | (Gated, Dispatching)
                | (Gated, Skipped(_))
                | (Dispatching, Submitted)
                | (Dispatching, Failed)
                | (Dispatching, Skipped(SkipReason::DryRun))
        )
    }
}

impl fmt::Display for TriggerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerState::Received => write!(f, "RECEIVED"),
            TriggerState::Scoring => write!(f, "SCORING"),
            TriggerState::Gated => write!(f, "GATED"),
            TriggerState::Dispatching => write!(f, "DISPATCHING"),
            TriggerState::Submitted => write!(f, "SUBMITTED"),
            TriggerState::Failed => write!(f, "FAILED"),
            TriggerState::Skipped(reason) => write!(f, "SKIPPED({:?})", reason),
        }
    }
}

/// Terminal record of one trigger
#[derive(Debug, Clone)]
pub struct TriggerOutcome {
    pub tx_hash: H256,
    pub state: TriggerState,
    pub confidence: Confidence,
    pub latency: Duration,
    pub signal: Option<Signal>,
    pub receipt: Option<StrikeReceipt>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        use TriggerState::*;
        assert!(Received.can_advance_to(Scoring));
        assert!(Gated.can_advance_to(Skipped(SkipReason::LowConfidence)));
        assert!(!Failed.can_advance_to(Dispatching));
        assert!(!Submitted.can_advance_to(Dispatching));
        assert!(!Received.can_advance_to(Dispatching));
        assert!(Skipped(SkipReason::Unprofitable).is_terminal());
        assert!(!Dispatching.is_terminal());
    }

    #[test]
    fn test_strike_transaction_template() {
        let record = StrikeRecord {
            chain: Chain::Base,
            from: Address::repeat_byte(1),
            executor: Address::repeat_byte(2),
            payload: Bytes::from(vec![0xde, 0xad]),
            gas_limit: 1_200_000,
            max_fee_per_gas: U256::from(55u64),
            max_priority_fee_per_gas: U256::from(15u64),
            fee_tier: "conservative".to_string(),
            nonce: U256::from(7u64),
            channel: StrikeChannel::Public,
        };
        let tx = record.to_transaction();
        assert_eq!(tx.gas(), Some(&U256::from(1_200_000u64)));
        assert_eq!(tx.nonce(), Some(&U256::from(7u64)));
        assert_eq!(tx.chain_id().map(|id| id.as_u64()), Some(8453));
        assert!(matches!(tx, TypedTransaction::Eip1559(_)));
    }
}
