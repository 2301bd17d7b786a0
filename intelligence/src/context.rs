//! Chain context
//!
//! Everything one chain needs to run: its own market graph, pipeline,
//! adapters and background tasks. Contexts share no mutable state; the
//! supervisor runs each one on its own thread and runtime.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use ethers::signers::LocalWallet;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use vesper_dataplane::providers::{FeedStats, MultiRpcClient, WsPendingFeed};
use vesper_dataplane::relay::FlashbotsRelay;
use vesper_dataplane::signer::WalletSigner;
use vesper_dataplane::{BundleRelay, Chain, ChainClient, PendingTxFeed, TransactionSigner};

use crate::config::{resolve_secret, ChainConfig, RelayConfig, VesperConfig};
use crate::dispatch::{FeeSchedule, NonceManager, StrikeDispatcher};
use crate::error::{IntelligenceError, Result};
use crate::gate::{feed_from_config, ConfidenceGate, IntelFeed};
use crate::graph::{EdgeUpdate, MarketGraph};
use crate::ingestion::{normalize_node, GraphUpdater, PoolSpec, ReservePoller, UPDATE_CHANNEL_CAPACITY};
use crate::pipeline::Pipeline;
use crate::search::{ExecutorCallEncoder, PayloadEncoder, SearchEngine, SearchParams};
use crate::telemetry::{report_stats, PipelineStats};

/// External capabilities a context is wired with
pub struct Adapters {
    pub client: Arc<dyn ChainClient>,
    pub feed: Arc<dyn PendingTxFeed>,
    pub signer: Arc<dyn TransactionSigner>,
    pub relay: Option<Arc<dyn BundleRelay>>,
    pub intel: Arc<dyn IntelFeed>,
    pub encoder: Arc<dyn PayloadEncoder>,

    /// Counters of the pending transaction feed, when it exposes them
    pub feed_stats: Option<Arc<FeedStats>>,
}

/// One chain's engine, ready to run
pub struct ChainContext {
    chain: Chain,
    pipeline: Arc<Pipeline>,
    graph: Arc<MarketGraph>,
    stats: Arc<PipelineStats>,
    feed: Arc<dyn PendingTxFeed>,
    feed_stats: Option<Arc<FeedStats>>,
    poller: Option<ReservePoller>,
    updates_tx: mpsc::Sender<Vec<EdgeUpdate>>,
    updates_rx: mpsc::Receiver<Vec<EdgeUpdate>>,
    stats_interval: Duration,
    shutdown_grace: Duration,
}

fn chain_config(config: &VesperConfig, chain: Chain) -> Result<&ChainConfig> {
    config
        .chains
        .get(&chain)
        .ok_or_else(|| IntelligenceError::config(format!("chain {} is not configured", chain)))
}

fn build_relay(chain: Chain, relay: &RelayConfig) -> Result<Arc<dyn BundleRelay>> {
    let relay = match &relay.auth_key_env {
        Some(env) => {
            let wallet: LocalWallet = resolve_secret(env)?
                .trim()
                .parse()
                .map_err(|_| IntelligenceError::config(format!("chains.{}: {} is not a valid relay auth key", chain, env)))?;
            FlashbotsRelay::new(&relay.url, wallet)?
        }
        None => FlashbotsRelay::with_random_identity(&relay.url)?,
    };
    Ok(Arc::new(relay))
}

impl ChainContext {
    /// Build the production adapters for `chain` and assemble the context.
    ///
    /// Fails before anything connects if the signing key, executor, endpoints
    /// or fee schedule are missing or invalid.
    pub fn build(chain: Chain, config: &VesperConfig) -> Result<Self> {
        let chain_config = chain_config(config, chain)?;

        let client = Arc::new(MultiRpcClient::new(chain, chain_config.rpc.clone())?);
        let feed = WsPendingFeed::new(chain, format!("{}-ws", chain), &chain_config.ws_url)?;
        let feed_stats = feed.stats();

        let key = resolve_secret(&chain_config.private_key_env)?;
        let signer = WalletSigner::from_private_key(key.trim(), chain)
            .map_err(|e| IntelligenceError::config(format!("chains.{}: {}", chain, e)))?;

        let relay = chain_config
            .relay
            .as_ref()
            .map(|relay| build_relay(chain, relay))
            .transpose()?;

        let encoder = ExecutorCallEncoder::new(
            config.search.notional,
            config.search.notional_decimals,
            config.search.min_margin,
        )
        .map_err(|e| IntelligenceError::config(format!("search.notional: {}", e)))?;

        let adapters = Adapters {
            client,
            feed: Arc::new(feed),
            signer: Arc::new(signer),
            relay,
            intel: feed_from_config(&config.gate)?,
            encoder: Arc::new(encoder),
            feed_stats: Some(feed_stats),
        };
        Self::assemble(chain, config, adapters)
    }

    /// Wire a context from already built adapters
    pub fn assemble(chain: Chain, config: &VesperConfig, adapters: Adapters) -> Result<Self> {
        let chain_config = chain_config(config, chain)?;
        let executor = chain_config.executor_address()?;

        let origins: Vec<String> = chain_config.search_origins.iter().map(|o| normalize_node(o)).collect();
        if origins.is_empty() {
            return Err(IntelligenceError::config(format!("chains.{}: search_origins is empty", chain)));
        }
        let pools = chain_config
            .pools
            .iter()
            .map(PoolSpec::try_from)
            .collect::<Result<Vec<_>>>()?;
        let fees = FeeSchedule::from_config(&config.fees)?;

        let stats = Arc::new(PipelineStats::new(chain));
        let graph = Arc::new(MarketGraph::new());
        let nonces = Arc::new(NonceManager::new(adapters.client.clone(), adapters.signer.address()));
        let dispatcher = Arc::new(StrikeDispatcher::new(
            chain,
            adapters.client.clone(),
            adapters.signer,
            adapters.relay,
            executor,
            config.fees.gas_limit,
            fees,
        ));

        let pipeline = Arc::new(Pipeline::new(
            chain,
            graph.clone(),
            origins,
            SearchEngine::new(SearchParams::from(&config.search), adapters.encoder),
            Arc::new(ConfidenceGate::new(adapters.intel, &config.gate)?),
            dispatcher,
            nonces,
            stats.clone(),
            config.global.dry_run,
        ));

        let (updates_tx, updates_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let poller = (!pools.is_empty()).then(|| {
            ReservePoller::new(
                adapters.client,
                pools,
                chain_config.reserve_poll_interval(),
                updates_tx.clone(),
                stats.clone(),
            )
        });

        Ok(Self {
            chain,
            pipeline,
            graph,
            stats,
            feed: adapters.feed,
            feed_stats: adapters.feed_stats,
            poller,
            updates_tx,
            updates_rx,
            stats_interval: Duration::from_secs(config.global.stats_interval_secs.max(1)),
            shutdown_grace: Duration::from_secs(config.global.shutdown_grace_secs),
        })
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn graph(&self) -> &Arc<MarketGraph> {
        &self.graph
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Sender for external rate producers
    pub fn update_sender(&self) -> mpsc::Sender<Vec<EdgeUpdate>> {
        self.updates_tx.clone()
    }

    /// Run until `shutdown` fires or the trigger feed ends.
    ///
    /// Every trigger is processed on its own task; the feed loop never waits
    /// for one. On exit, in-flight triggers get `shutdown_grace` to finish.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let ChainContext {
            chain,
            pipeline,
            graph,
            stats,
            feed,
            feed_stats,
            poller,
            updates_tx,
            updates_rx,
            stats_interval,
            shutdown_grace,
        } = self;
        drop(updates_tx);

        // Background tasks stop with the context, whatever ends it
        let background_token = shutdown.child_token();
        let background = TaskTracker::new();
        background.spawn(GraphUpdater::new(graph, stats.clone()).run(updates_rx, background_token.clone()));
        if let Some(poller) = poller {
            background.spawn(poller.run(background_token.clone()));
        }
        background.spawn(report_stats(stats.clone(), stats_interval, background_token.clone()));
        if let Some(feed_stats) = feed_stats {
            background.spawn(mirror_feed_stats(feed_stats, stats.clone(), stats_interval, background_token.clone()));
        }
        background.close();

        let triggers = TaskTracker::new();
        let mut stream = feed.subscribe();
        info!(chain = %chain, "Chain context running");

        let result = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                next = stream.next() => match next {
                    Some(trigger) => {
                        let pipeline = pipeline.clone();
                        triggers.spawn(async move {
                            pipeline.process(trigger).await;
                        });
                    }
                    None => break Err(IntelligenceError::feed(format!("{} pending transaction feed ended", chain))),
                },
            }
        };

        drop(stream);
        background_token.cancel();
        triggers.close();
        if tokio::time::timeout(shutdown_grace, triggers.wait()).await.is_err() {
            warn!(chain = %chain, in_flight = triggers.len(), "Shutdown grace expired with triggers in flight");
        }
        background.wait().await;

        debug!(chain = %chain, completed = stats.snapshot().completed(), "Chain context stopped");
        result
    }
}

/// Copy the feed's malformed notification count into the pipeline counters
async fn mirror_feed_stats(
    feed_stats: Arc<FeedStats>,
    stats: Arc<PipelineStats>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut seen = 0u64;
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let total = feed_stats.malformed.load(Ordering::Relaxed);
                stats.record_malformed_triggers(total.saturating_sub(seen));
                seen = seen.max(total);
            }
        }
    }
}

impl std::fmt::Debug for ChainContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainContext")
            .field("chain", &self.chain)
            .field("pipeline", &self.pipeline)
            .field("pools", &self.poller.is_some())
            .finish()
    }
}
