//! Capability traits consumed by the strike engine
//!
//! The engine never talks to a node, relay or key directly; it holds these
//! traits behind `Arc<dyn ...>` so each chain context can be wired with real
//! adapters in production and in-memory fakes in tests.

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TxHash, U256};
use futures::stream::BoxStream;

use crate::{BundleAck, Result, TriggerEvent};

/// Stream of pending transaction identifiers for one chain.
///
/// Reconnecting after a dropped connection is the adapter's job; the stream
/// only ends when the adapter is shut down.
pub trait PendingTxFeed: Send + Sync {
    /// Subscribe to pending transactions
    fn subscribe(&self) -> BoxStream<'static, TriggerEvent>;
}

/// Read/write access to one chain
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Latest block number
    async fn current_block_number(&self) -> Result<u64>;

    /// Base fee of the latest block, zero on chains without EIP-1559
    async fn base_fee_per_gas(&self) -> Result<U256>;

    /// Pending transaction count (next nonce) for an account
    async fn transaction_count(&self, address: Address) -> Result<U256>;

    /// Read-only contract call against the latest block
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes>;

    /// Broadcast a signed raw transaction; returns once an endpoint accepted it
    async fn submit_transaction(&self, raw_tx: Bytes) -> Result<TxHash>;
}

/// Private bundle relay
#[async_trait]
pub trait BundleRelay: Send + Sync {
    /// Submit an ordered bundle of signed transactions for `target_block`
    async fn submit_bundle(&self, signed_txs: Vec<Bytes>, target_block: u64) -> Result<BundleAck>;
}

/// Signing capability bound to one key
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Address of the signing key
    fn address(&self) -> Address;

    /// Sign a transaction template and return the RLP-encoded raw transaction
    async fn sign(&self, tx: &TypedTransaction) -> Result<Bytes>;
}
