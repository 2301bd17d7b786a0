//! Market graph ingestion
//!
//! Rate updates reach the graph through a bounded channel of batches. The
//! [`GraphUpdater`] drains it and applies each batch as one copy-on-write
//! swap. The [`ReservePoller`] is the built-in producer: it reads
//! `getReserves()` from configured V2 pairs and emits both directions of
//! each pair as fee-adjusted spot rates.

use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use ethers::types::Address;
use ethers::utils::format_units;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use vesper_dataplane::contracts::{AbiManager, PairReserves};
use vesper_dataplane::ChainClient;

use crate::config::PoolConfig;
use crate::error::{IntelligenceError, Result};
use crate::graph::{EdgeUpdate, MarketGraph};
use crate::telemetry::PipelineStats;

/// Capacity of the update channel, in batches
pub const UPDATE_CHANNEL_CAPACITY: usize = 1024;

/// Graph node id for an on-chain asset: full lowercase hex
pub fn node_id(address: &Address) -> String {
    format!("{:?}", address)
}

/// Normalize a configured node name. Addresses map to [`node_id`]; anything
/// else is trimmed and lowercased.
pub fn normalize_node(raw: &str) -> String {
    match raw.trim().parse::<Address>() {
        Ok(address) => node_id(&address),
        Err(_) => raw.trim().to_lowercase(),
    }
}

/// Applies update batches to the graph until cancelled or the senders drop
pub struct GraphUpdater {
    graph: Arc<MarketGraph>,
    stats: Arc<PipelineStats>,
}

impl GraphUpdater {
    pub fn new(graph: Arc<MarketGraph>, stats: Arc<PipelineStats>) -> Self {
        Self { graph, stats }
    }

    /// Apply one batch; malformed updates are dropped and counted
    pub fn apply_batch(&self, batch: &[EdgeUpdate]) {
        let report = self.graph.apply(batch);
        if !report.rejected.is_empty() {
            for error in &report.rejected {
                debug!(chain = %self.stats.chain(), error = %error, "Dropped malformed rate update");
            }
            self.stats.record_malformed_updates(report.rejected.len() as u64);
        }
        trace!(
            inserted = report.inserted,
            replaced = report.replaced,
            stale = report.stale,
            version = self.graph.version(),
            "Applied rate batch"
        );
    }

    pub async fn run(self, mut updates: mpsc::Receiver<Vec<EdgeUpdate>>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                batch = updates.recv() => match batch {
                    Some(batch) => self.apply_batch(&batch),
                    None => {
                        debug!(chain = %self.stats.chain(), "Rate update channel closed");
                        break;
                    }
                },
            }
        }
    }
}

/// A V2 pair with its addresses parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSpec {
    pub address: Address,
    pub token0: Address,
    pub token1: Address,
    pub decimals0: u32,
    pub decimals1: u32,
    pub fee_bps: u32,
}

impl TryFrom<&PoolConfig> for PoolSpec {
    type Error = IntelligenceError;

    fn try_from(pool: &PoolConfig) -> Result<Self> {
        let parse = |field: &str, value: &str| {
            value
                .parse::<Address>()
                .map_err(|_| IntelligenceError::config(format!("pool {}: invalid {} {:?}", pool.address, field, value)))
        };
        Ok(Self {
            address: parse("address", &pool.address)?,
            token0: parse("token0", &pool.token0)?,
            token1: parse("token1", &pool.token1)?,
            decimals0: pool.decimals0,
            decimals1: pool.decimals1,
            fee_bps: pool.fee_bps,
        })
    }
}

fn to_units(amount: ethers::types::U256, decimals: u32) -> Option<f64> {
    format_units(amount, decimals).ok()?.parse::<f64>().ok()
}

/// Both directed spot rates of a pair, net of the pool fee.
///
/// Returns `None` when either reserve is empty; a drained pool has no price.
pub fn spot_rates(pool: &PoolSpec, reserves: &PairReserves, observed_at: DateTime<Utc>) -> Option<[EdgeUpdate; 2]> {
    if reserves.reserve0.is_zero() || reserves.reserve1.is_zero() {
        return None;
    }
    let amount0 = to_units(reserves.reserve0, pool.decimals0)?;
    let amount1 = to_units(reserves.reserve1, pool.decimals1)?;
    let fee_factor = 1.0 - f64::from(pool.fee_bps) / 10_000.0;

    let (token0, token1, venue) = (node_id(&pool.token0), node_id(&pool.token1), node_id(&pool.address));
    Some([
        EdgeUpdate::new(token0.clone(), token1.clone(), amount1 / amount0 * fee_factor, observed_at)
            .with_venue(venue.clone()),
        EdgeUpdate::new(token1, token0, amount0 / amount1 * fee_factor, observed_at).with_venue(venue),
    ])
}

/// Polls V2 pair reserves and feeds the graph
pub struct ReservePoller {
    client: Arc<dyn ChainClient>,
    pools: Vec<PoolSpec>,
    interval: Duration,
    updates: mpsc::Sender<Vec<EdgeUpdate>>,
    stats: Arc<PipelineStats>,
}

impl ReservePoller {
    pub fn new(
        client: Arc<dyn ChainClient>,
        pools: Vec<PoolSpec>,
        interval: Duration,
        updates: mpsc::Sender<Vec<EdgeUpdate>>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            client,
            pools,
            interval,
            updates,
            stats,
        }
    }

    async fn read_reserves(&self, pool: &PoolSpec) -> Option<PairReserves> {
        let call = AbiManager::encode_get_reserves_call().ok()?;
        match self.client.call(pool.address, call).await {
            Ok(output) => match AbiManager::decode_get_reserves_output(&output) {
                Ok(reserves) => Some(reserves),
                Err(e) => {
                    debug!(pool = ?pool.address, error = %e, "Undecodable getReserves output");
                    self.stats.record_malformed_updates(1);
                    None
                }
            },
            Err(e) => {
                warn!(pool = ?pool.address, error = %e, "getReserves call failed");
                None
            }
        }
    }

    /// Read every pool once and build the resulting batch
    pub async fn poll_once(&self) -> Vec<EdgeUpdate> {
        let observed_at = Utc::now();
        let reads = join_all(self.pools.iter().map(|pool| self.read_reserves(pool))).await;

        let mut batch = Vec::with_capacity(self.pools.len() * 2);
        for (pool, reserves) in self.pools.iter().zip(reads) {
            let Some(reserves) = reserves else { continue };
            match spot_rates(pool, &reserves, observed_at) {
                Some(edges) => batch.extend(edges),
                None => {
                    debug!(pool = ?pool.address, "Pool has empty reserves");
                    self.stats.record_malformed_updates(1);
                }
            }
        }
        batch
    }

    pub async fn run(self, shutdown: CancellationToken) {
        if self.pools.is_empty() {
            return;
        }
        info!(chain = %self.stats.chain(), pools = self.pools.len(), interval_ms = self.interval.as_millis() as u64, "Starting reserve poller");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let batch = self.poll_once().await;
                    if batch.is_empty() {
                        continue;
                    }
                    if self.updates.send(batch).await.is_err() {
                        debug!("Graph updater gone, stopping reserve poller");
                        break;
                    }
                }
            }
        }
    }
}
