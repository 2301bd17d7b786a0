//! Strike dispatcher
//!
//! Turns a profitable [`Signal`] into exactly one submission: picks the fee
//! tier from the confidence score, prices the transaction off the current
//! base fee, signs it and hands it to either the private relay or the public
//! chain client. There is no retry; a failure is reported to the caller.

use std::sync::Arc;
use ethers::types::{Address, U256};
use ethers::utils::parse_units;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use vesper_dataplane::{BundleRelay, Chain, ChainClient, DataplaneError, TransactionSigner};

use crate::config::FeeConfig;
use crate::error::{DispatchError, IntelligenceError, Result};
use crate::types::{Confidence, Signal, StrikeChannel, StrikeReceipt, StrikeRecord};

/// One bidding tier
#[derive(Debug, Clone, PartialEq)]
pub struct FeeTier {
    pub name: String,
    pub min_confidence: f64,
    /// Priority fee in wei
    pub priority_fee: U256,
}

/// Step function from confidence to fee tier
#[derive(Debug, Clone)]
pub struct FeeSchedule {
    tiers: Vec<FeeTier>,
}

impl FeeSchedule {
    pub fn from_config(config: &FeeConfig) -> Result<Self> {
        let tiers = config
            .tiers
            .iter()
            .map(|tier| {
                let priority_fee = parse_units(format!("{:.9}", tier.priority_fee_gwei), "gwei")
                    .map_err(|e| IntelligenceError::config(format!("fee tier {}: {}", tier.name, e)))?;
                Ok(FeeTier {
                    name: tier.name.clone(),
                    min_confidence: tier.min_confidence,
                    priority_fee: priority_fee.into(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if tiers.is_empty() {
            return Err(IntelligenceError::config("fee schedule has no tiers"));
        }
        Ok(Self { tiers })
    }

    /// Highest tier whose `min_confidence` the score strictly exceeds; the
    /// first tier covers everything below.
    pub fn select(&self, confidence: Confidence) -> Option<&FeeTier> {
        self.tiers
            .iter()
            .rev()
            .find(|tier| confidence > tier.min_confidence)
            .or_else(|| self.tiers.first())
    }

    pub fn tiers(&self) -> &[FeeTier] {
        &self.tiers
    }
}

/// `2 × base_fee + priority`, leaving room for one full base fee increase
pub fn max_fee_per_gas(base_fee: U256, priority_fee: U256) -> U256 {
    base_fee.saturating_mul(U256::from(2u8)).saturating_add(priority_fee)
}

/// Hands out account nonces without a round trip per strike.
///
/// Seeded from the pending transaction count on first use. After a failed
/// submission the cached value may be wrong, so [`NonceManager::resync`]
/// drops it and the next call re-reads it from the chain.
pub struct NonceManager {
    client: Arc<dyn ChainClient>,
    address: Address,
    next: Mutex<Option<U256>>,
}

impl NonceManager {
    pub fn new(client: Arc<dyn ChainClient>, address: Address) -> Self {
        Self {
            client,
            address,
            next: Mutex::new(None),
        }
    }

    /// Reserve the next nonce
    pub async fn next(&self) -> std::result::Result<U256, DataplaneError> {
        let mut next = self.next.lock().await;
        let nonce = match *next {
            Some(nonce) => nonce,
            None => self.client.transaction_count(self.address).await?,
        };
        *next = Some(nonce + U256::one());
        Ok(nonce)
    }

    /// Forget the cached nonce
    pub async fn resync(&self) {
        *self.next.lock().await = None;
    }
}

/// Builds, signs and submits strikes for one chain
pub struct StrikeDispatcher {
    chain: Chain,
    client: Arc<dyn ChainClient>,
    signer: Arc<dyn TransactionSigner>,
    relay: Option<Arc<dyn BundleRelay>>,
    executor: Address,
    gas_limit: u64,
    fees: FeeSchedule,
}

impl StrikeDispatcher {
    pub fn new(
        chain: Chain,
        client: Arc<dyn ChainClient>,
        signer: Arc<dyn TransactionSigner>,
        relay: Option<Arc<dyn BundleRelay>>,
        executor: Address,
        gas_limit: u64,
        fees: FeeSchedule,
    ) -> Self {
        if relay.is_some() && !chain.supports_private_relay() {
            warn!(chain = %chain, "Relay configured on a chain without private ordering, using public submission");
        }
        Self {
            chain,
            client,
            signer,
            relay,
            executor,
            gas_limit,
            fees,
        }
    }

    pub fn fee_schedule(&self) -> &FeeSchedule {
        &self.fees
    }

    fn private_relay(&self) -> Option<&Arc<dyn BundleRelay>> {
        self.relay.as_ref().filter(|_| self.chain.supports_private_relay())
    }

    /// Whether strikes on this chain go through the relay
    pub fn uses_private_relay(&self) -> bool {
        self.private_relay().is_some()
    }

    /// Price and route a strike without signing or sending it
    pub async fn prepare(
        &self,
        signal: &Signal,
        confidence: Confidence,
        nonce: U256,
    ) -> std::result::Result<StrikeRecord, DispatchError> {
        if signal.payload.is_empty() {
            return Err(DispatchError::EmptyPayload);
        }
        let tier = self.fees.select(confidence).ok_or(DispatchError::NoFeeTier(confidence))?;

        let (base_fee, channel) = if self.uses_private_relay() {
            let (base_fee, block) = tokio::try_join!(self.client.base_fee_per_gas(), self.client.current_block_number())
                .map_err(DispatchError::ChainRead)?;
            (base_fee, StrikeChannel::PrivateRelay { target_block: block + 1 })
        } else {
            let base_fee = self.client.base_fee_per_gas().await.map_err(DispatchError::ChainRead)?;
            (base_fee, StrikeChannel::Public)
        };

        Ok(StrikeRecord {
            chain: self.chain,
            from: self.signer.address(),
            executor: self.executor,
            payload: signal.payload.clone(),
            gas_limit: self.gas_limit,
            max_fee_per_gas: max_fee_per_gas(base_fee, tier.priority_fee),
            max_priority_fee_per_gas: tier.priority_fee,
            fee_tier: tier.name.clone(),
            nonce,
            channel,
        })
    }

    /// Submit exactly once
    pub async fn dispatch(
        &self,
        signal: &Signal,
        confidence: Confidence,
        nonce: U256,
    ) -> std::result::Result<StrikeReceipt, DispatchError> {
        let record = self.prepare(signal, confidence, nonce).await?;

        let raw = self
            .signer
            .sign(&record.to_transaction())
            .await
            .map_err(DispatchError::Signing)?;

        debug!(
            chain = %self.chain,
            channel = %record.channel,
            fee_tier = record.fee_tier,
            nonce = %record.nonce,
            "Submitting strike"
        );

        let mut receipt = StrikeReceipt {
            chain: self.chain,
            channel: record.channel,
            fee_tier: record.fee_tier,
            nonce: record.nonce,
            tx_hash: None,
            bundle_hash: None,
        };

        match (record.channel, self.private_relay()) {
            (StrikeChannel::PrivateRelay { target_block }, Some(relay)) => {
                let ack = relay
                    .submit_bundle(vec![raw], target_block)
                    .await
                    .map_err(DispatchError::Relay)?;
                receipt.bundle_hash = ack.bundle_hash;
            }
            _ => {
                let tx_hash = self.client.submit_transaction(raw).await.map_err(DispatchError::Public)?;
                receipt.tx_hash = Some(tx_hash);
            }
        }

        info!(chain = %self.chain, channel = %receipt.channel, fee_tier = receipt.fee_tier, "Strike accepted");
        Ok(receipt)
    }
}
