//! In-memory fakes for every capability the engine consumes

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use chrono::Utc;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TxHash, H256, U256};
use ethers::utils::keccak256;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;

use vesper_dataplane::{BundleAck, BundleRelay, Chain, ChainClient, DataplaneError, PendingTxFeed, TransactionSigner, TriggerEvent};
use vesper_intelligence::config::{ChainConfig, RelayConfig};
use vesper_intelligence::gate::StaticIntelFeed;
use vesper_intelligence::search::{Cycle, PayloadEncoder};
use vesper_intelligence::{Adapters, ChainContext, EdgeUpdate, IntelFeed, IntelligenceError, MarketGraph, TimeWindow, VesperConfig};

/// Intelligence text scoring 0.8 with the base lexicon
pub const BULLISH_TEXT: &str = "win the next big block";

/// Intelligence text scoring -0.5 with the base lexicon
pub const BEARISH_TEXT: &str = "price drop";

pub fn gwei(n: u64) -> U256 {
    U256::from(n) * U256::exp10(9)
}

/// Chain client that records submissions
pub struct FakeChain {
    pub base_fee: U256,
    pub block: u64,
    pub nonce: U256,
    pub fail_submit: AtomicBool,
    pub nonce_reads: AtomicUsize,
    pub submitted: Mutex<Vec<Bytes>>,
}

impl Default for FakeChain {
    fn default() -> Self {
        Self {
            base_fee: gwei(20),
            block: 19_000_000,
            nonce: U256::from(7u64),
            fail_submit: AtomicBool::new(false),
            nonce_reads: AtomicUsize::new(0),
            submitted: Mutex::new(Vec::new()),
        }
    }
}

impl FakeChain {
    pub fn submissions(&self) -> usize {
        self.submitted.lock().len()
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn current_block_number(&self) -> vesper_dataplane::Result<u64> {
        Ok(self.block)
    }

    async fn base_fee_per_gas(&self) -> vesper_dataplane::Result<U256> {
        Ok(self.base_fee)
    }

    async fn transaction_count(&self, _address: Address) -> vesper_dataplane::Result<U256> {
        self.nonce_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.nonce)
    }

    async fn call(&self, _to: Address, _data: Bytes) -> vesper_dataplane::Result<Bytes> {
        Err(DataplaneError::internal("no contracts on the fake chain"))
    }

    async fn submit_transaction(&self, raw_tx: Bytes) -> vesper_dataplane::Result<TxHash> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(DataplaneError::provider("fake", "transaction rejected"));
        }
        let hash = H256::from(keccak256(&raw_tx));
        self.submitted.lock().push(raw_tx);
        Ok(hash)
    }
}

/// Relay that records bundles
#[derive(Default)]
pub struct FakeRelay {
    pub bundles: Mutex<Vec<(Vec<Bytes>, u64)>>,
}

impl FakeRelay {
    pub fn submissions(&self) -> usize {
        self.bundles.lock().len()
    }
}

#[async_trait]
impl BundleRelay for FakeRelay {
    async fn submit_bundle(&self, signed_txs: Vec<Bytes>, target_block: u64) -> vesper_dataplane::Result<BundleAck> {
        self.bundles.lock().push((signed_txs, target_block));
        Ok(BundleAck {
            bundle_hash: Some(H256::repeat_byte(0xbb)),
            target_block,
        })
    }
}

/// Signer that keeps every template it was asked to sign
#[derive(Default)]
pub struct FakeSigner {
    pub signed: Mutex<Vec<TypedTransaction>>,
}

#[async_trait]
impl TransactionSigner for FakeSigner {
    fn address(&self) -> Address {
        Address::repeat_byte(0x5e)
    }

    async fn sign(&self, tx: &TypedTransaction) -> vesper_dataplane::Result<Bytes> {
        self.signed.lock().push(tx.clone());
        Ok(tx.rlp())
    }
}

/// Feed that replays fixed hashes, then either ends or stays open
pub struct ScriptedFeed {
    hashes: Vec<H256>,
    end: bool,
}

impl ScriptedFeed {
    pub fn open(hashes: Vec<H256>) -> Self {
        Self { hashes, end: false }
    }

    pub fn ending(hashes: Vec<H256>) -> Self {
        Self { hashes, end: true }
    }
}

impl PendingTxFeed for ScriptedFeed {
    fn subscribe(&self) -> BoxStream<'static, TriggerEvent> {
        let events = stream::iter(
            self.hashes
                .clone()
                .into_iter()
                .map(|hash| TriggerEvent::new(hash, "scripted"))
                .collect::<Vec<_>>(),
        );
        if self.end {
            events.boxed()
        } else {
            events.chain(stream::pending()).boxed()
        }
    }
}

/// Intelligence feed that answers after a delay
pub struct SlowIntelFeed {
    pub delay: Duration,
}

#[async_trait]
impl IntelFeed for SlowIntelFeed {
    async fn fetch_text(&self, _window: TimeWindow) -> vesper_intelligence::Result<String> {
        tokio::time::sleep(self.delay).await;
        Ok(BULLISH_TEXT.to_string())
    }
}

/// Intelligence feed that always errors
pub struct FailingIntelFeed;

#[async_trait]
impl IntelFeed for FailingIntelFeed {
    async fn fetch_text(&self, _window: TimeWindow) -> vesper_intelligence::Result<String> {
        Err(IntelligenceError::feed("upstream unavailable"))
    }
}

/// Encodes the node path as bytes, so the graph can use plain names
pub struct JoinEncoder;

impl PayloadEncoder for JoinEncoder {
    fn encode(&self, cycle: &Cycle) -> vesper_intelligence::Result<Bytes> {
        Ok(Bytes::from(cycle.nodes.join("-").into_bytes()))
    }
}

/// Fakes shared between a context and the test body
#[derive(Clone)]
pub struct Harness {
    pub chain: Arc<FakeChain>,
    pub relay: Arc<FakeRelay>,
    pub signer: Arc<FakeSigner>,
}

impl Default for Harness {
    fn default() -> Self {
        Self {
            chain: Arc::new(FakeChain::default()),
            relay: Arc::new(FakeRelay::default()),
            signer: Arc::new(FakeSigner::default()),
        }
    }
}

impl Harness {
    pub fn adapters(&self, feed: Arc<dyn PendingTxFeed>, intel: Arc<dyn IntelFeed>, with_relay: bool) -> Adapters {
        Adapters {
            client: self.chain.clone(),
            feed,
            signer: self.signer.clone(),
            relay: if with_relay {
                Some(self.relay.clone() as Arc<dyn BundleRelay>)
            } else {
                None
            },
            intel,
            encoder: Arc::new(JoinEncoder),
            feed_stats: None,
        }
    }

    /// Context with an idle feed and a static intelligence text
    pub fn context(&self, chain: Chain, config: &VesperConfig, text: &str, with_relay: bool) -> ChainContext {
        let adapters = self.adapters(
            Arc::new(ScriptedFeed::open(Vec::new())),
            Arc::new(StaticIntelFeed::new(text)),
            with_relay,
        );
        ChainContext::assemble(chain, config, adapters).unwrap()
    }
}

/// Defaults plus one enabled chain searching from node `a`
pub fn test_config(chain: Chain) -> VesperConfig {
    let mut config = VesperConfig::default();
    config.global.stats_interval_secs = 3600;
    config.global.shutdown_grace_secs = 1;
    config.chains.insert(
        chain,
        ChainConfig {
            enabled: true,
            executor: format!("{:?}", Address::repeat_byte(0xee)),
            search_origins: vec!["a".to_string()],
            relay: chain.default_relay_url().map(|url| RelayConfig {
                url: url.to_string(),
                auth_key_env: None,
            }),
            ..ChainConfig::default()
        },
    );
    config
}

/// `a -> b -> c -> a` with a 3.02% round trip
pub fn triangle_updates() -> Vec<EdgeUpdate> {
    let now = Utc::now();
    vec![
        EdgeUpdate::new("a", "b", 1.01, now),
        EdgeUpdate::new("b", "c", 1.02, now),
        EdgeUpdate::new("c", "a", 1.00, now),
    ]
}

pub fn load_triangle(graph: &MarketGraph) {
    let report = graph.apply(&triangle_updates());
    assert_eq!(report.inserted, 3);
}

pub fn trigger(n: u8) -> TriggerEvent {
    TriggerEvent::new(H256::repeat_byte(n), "test")
}
