//! Pipeline counters, strike lines and the metrics exporter

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;
use vesper_dataplane::Chain;

use crate::error::{DispatchError, IntelligenceError, Result};
use crate::types::{SkipReason, TriggerOutcome, TriggerState};

/// Log target for strike lines
pub const STRIKE_TARGET: &str = "vesper::strike";

/// Per-context pipeline counters, mirrored into `metrics`
#[derive(Debug)]
pub struct PipelineStats {
    chain: Chain,
    received: AtomicU64,
    skipped_confidence: AtomicU64,
    skipped_unprofitable: AtomicU64,
    skipped_dry_run: AtomicU64,
    submitted: AtomicU64,
    failed: AtomicU64,
    malformed_triggers: AtomicU64,
    malformed_updates: AtomicU64,
    gate_fallbacks: AtomicU64,
    partial_searches: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub skipped_confidence: u64,
    pub skipped_unprofitable: u64,
    pub skipped_dry_run: u64,
    pub submitted: u64,
    pub failed: u64,
    pub malformed_triggers: u64,
    pub malformed_updates: u64,
    pub gate_fallbacks: u64,
    pub partial_searches: u64,
}

impl StatsSnapshot {
    /// Triggers that reached a terminal state
    pub fn completed(&self) -> u64 {
        self.skipped_confidence + self.skipped_unprofitable + self.skipped_dry_run + self.submitted + self.failed
    }
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl PipelineStats {
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            received: AtomicU64::new(0),
            skipped_confidence: AtomicU64::new(0),
            skipped_unprofitable: AtomicU64::new(0),
            skipped_dry_run: AtomicU64::new(0),
            submitted: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            malformed_triggers: AtomicU64::new(0),
            malformed_updates: AtomicU64::new(0),
            gate_fallbacks: AtomicU64::new(0),
            partial_searches: AtomicU64::new(0),
        }
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn record_received(&self) {
        bump(&self.received, 1);
        counter!("vesper_triggers_received_total", 1, "chain" => self.chain.name());
    }

    pub fn record_malformed_triggers(&self, count: u64) {
        if count == 0 {
            return;
        }
        bump(&self.malformed_triggers, count);
        counter!("vesper_malformed_triggers_total", count, "chain" => self.chain.name());
    }

    pub fn record_malformed_updates(&self, count: u64) {
        if count == 0 {
            return;
        }
        bump(&self.malformed_updates, count);
        counter!("vesper_malformed_updates_total", count, "chain" => self.chain.name());
    }

    pub fn record_gate_fallback(&self) {
        bump(&self.gate_fallbacks, 1);
        counter!("vesper_gate_fallbacks_total", 1, "chain" => self.chain.name());
    }

    pub fn record_partial_search(&self) {
        bump(&self.partial_searches, 1);
        counter!("vesper_partial_searches_total", 1, "chain" => self.chain.name());
    }

    /// Count a failed strike by stage and underlying error category
    pub fn record_dispatch_error(&self, error: &DispatchError) {
        let category = match error {
            DispatchError::ChainRead(e) | DispatchError::Signing(e) | DispatchError::Relay(e) | DispatchError::Public(e) => {
                e.category()
            }
            DispatchError::EmptyPayload | DispatchError::NoFeeTier(_) => "engine",
        };
        counter!(
            "vesper_dispatch_errors_total",
            1,
            "chain" => self.chain.name(),
            "stage" => error.stage(),
            "category" => category
        );
    }

    /// Count a terminal trigger outcome
    pub fn record_outcome(&self, outcome: &TriggerOutcome) {
        let (slot, state) = match outcome.state {
            TriggerState::Submitted => (&self.submitted, "submitted"),
            TriggerState::Failed => (&self.failed, "failed"),
            TriggerState::Skipped(SkipReason::LowConfidence) => (&self.skipped_confidence, "skipped_confidence"),
            TriggerState::Skipped(SkipReason::Unprofitable) => (&self.skipped_unprofitable, "skipped_unprofitable"),
            TriggerState::Skipped(SkipReason::DryRun) => (&self.skipped_dry_run, "skipped_dry_run"),
            _ => return,
        };
        bump(slot, 1);
        counter!("vesper_trigger_outcomes_total", 1, "chain" => self.chain.name(), "state" => state);
        histogram!(
            "vesper_trigger_latency_seconds",
            outcome.latency.as_secs_f64(),
            "chain" => self.chain.name()
        );
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            received: load(&self.received),
            skipped_confidence: load(&self.skipped_confidence),
            skipped_unprofitable: load(&self.skipped_unprofitable),
            skipped_dry_run: load(&self.skipped_dry_run),
            submitted: load(&self.submitted),
            failed: load(&self.failed),
            malformed_triggers: load(&self.malformed_triggers),
            malformed_updates: load(&self.malformed_updates),
            gate_fallbacks: load(&self.gate_fallbacks),
            partial_searches: load(&self.partial_searches),
        }
    }
}

/// Human-readable line for a submitted strike
pub fn log_strike(chain: Chain, outcome: &TriggerOutcome) {
    let Some(receipt) = &outcome.receipt else {
        return;
    };
    let latency_ms = outcome.latency.as_secs_f64() * 1000.0;
    info!(
        target: STRIKE_TARGET,
        chain = %chain,
        tx = ?outcome.tx_hash,
        latency_ms,
        confidence = outcome.confidence,
        fee_tier = receipt.fee_tier,
        channel = %receipt.channel,
        "STRIKE | {} | Latency: {:.3}ms | Conf: {:.4} | Tier: {} | Via: {}",
        chain,
        latency_ms,
        outcome.confidence,
        receipt.fee_tier,
        receipt.channel
    );
}

/// Log a stats line every `interval` until cancelled
pub async fn report_stats(stats: Arc<PipelineStats>, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    // First tick fires immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let s = stats.snapshot();
                info!(
                    chain = %stats.chain(),
                    received = s.received,
                    submitted = s.submitted,
                    failed = s.failed,
                    skipped_confidence = s.skipped_confidence,
                    skipped_unprofitable = s.skipped_unprofitable,
                    skipped_dry_run = s.skipped_dry_run,
                    malformed_triggers = s.malformed_triggers,
                    malformed_updates = s.malformed_updates,
                    gate_fallbacks = s.gate_fallbacks,
                    partial_searches = s.partial_searches,
                    "Pipeline stats"
                );
            }
        }
    }
}

/// Install the process-wide Prometheus exporter
pub fn install_prometheus_exporter(addr: &str) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| IntelligenceError::config(format!("invalid metrics address {:?}: {}", addr, e)))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| IntelligenceError::internal(format!("failed to install metrics exporter: {}", e)))?;
    info!(%addr, "Prometheus exporter listening");
    Ok(())
}
