//! Per-trigger pipeline
//!
//! One pass per pending transaction:
//!
//! ```text
//! Received -> Scoring -> Gated -> Dispatching -> Submitted | Failed
//!                           \-> Skipped(reason)   \-> Skipped(DryRun)
//! ```
//!
//! Scoring runs the confidence gate and the cycle search concurrently against
//! a graph snapshot taken on arrival. Each pass is independent; nothing here
//! blocks another trigger.

use std::sync::Arc;
use ethers::types::H256;
use tracing::{debug, trace, warn};
use vesper_dataplane::{Chain, TriggerEvent};

use crate::dispatch::{NonceManager, StrikeDispatcher};
use crate::gate::ConfidenceGate;
use crate::graph::MarketGraph;
use crate::search::SearchEngine;
use crate::telemetry::{log_strike, PipelineStats};
use crate::types::{Confidence, Signal, SkipReason, TriggerOutcome, TriggerState};

/// State tracker for one trigger
#[derive(Debug)]
struct TriggerRun {
    tx_hash: H256,
    state: TriggerState,
}

impl TriggerRun {
    fn new(tx_hash: H256) -> Self {
        Self {
            tx_hash,
            state: TriggerState::Received,
        }
    }

    fn advance(&mut self, next: TriggerState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        trace!(tx = ?self.tx_hash, from = %self.state, to = %next, "Trigger state");
        self.state = next;
    }
}

/// Everything one chain context needs to process triggers
pub struct Pipeline {
    chain: Chain,
    graph: Arc<MarketGraph>,
    origins: Arc<Vec<String>>,
    search: SearchEngine,
    gate: Arc<ConfidenceGate>,
    dispatcher: Arc<StrikeDispatcher>,
    nonces: Arc<NonceManager>,
    stats: Arc<PipelineStats>,
    dry_run: bool,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Chain,
        graph: Arc<MarketGraph>,
        origins: Vec<String>,
        search: SearchEngine,
        gate: Arc<ConfidenceGate>,
        dispatcher: Arc<StrikeDispatcher>,
        nonces: Arc<NonceManager>,
        stats: Arc<PipelineStats>,
        dry_run: bool,
    ) -> Self {
        Self {
            chain,
            graph,
            origins: Arc::new(origins),
            search,
            gate,
            dispatcher,
            nonces,
            stats,
            dry_run,
        }
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    /// Run one trigger to a terminal state
    pub async fn process(&self, trigger: TriggerEvent) -> TriggerOutcome {
        self.stats.record_received();
        let mut run = TriggerRun::new(trigger.tx_hash);

        run.advance(TriggerState::Scoring);
        let snapshot = self.graph.snapshot();
        // The search deadline bounds the whole scoring stage
        let (gate_score, signal) = tokio::join!(
            self.gate.score_within(self.search.params().deadline),
            self.search.search_blocking(snapshot, self.origins.to_vec())
        );
        if gate_score.fallback.is_some() {
            self.stats.record_gate_fallback();
        }
        if signal.partial {
            self.stats.record_partial_search();
        }
        let confidence = gate_score.confidence;

        run.advance(TriggerState::Gated);
        let mut outcome = TriggerOutcome {
            tx_hash: trigger.tx_hash,
            state: run.state,
            confidence,
            latency: trigger.age(),
            signal: None,
            receipt: None,
            error: None,
        };

        if !self.gate.admits(confidence) {
            run.advance(TriggerState::Skipped(SkipReason::LowConfidence));
        } else if !signal.profitable {
            run.advance(TriggerState::Skipped(SkipReason::Unprofitable));
        } else {
            run.advance(TriggerState::Dispatching);
            self.dispatch(&mut run, &mut outcome, &signal, confidence).await;
        }

        outcome.state = run.state;
        outcome.latency = trigger.age();
        outcome.signal = Some(signal);

        self.stats.record_outcome(&outcome);
        match outcome.state {
            TriggerState::Submitted => log_strike(self.chain, &outcome),
            state => debug!(
                chain = %self.chain,
                tx = ?outcome.tx_hash,
                state = %state,
                confidence,
                latency_us = outcome.latency.as_micros() as u64,
                "Trigger finished"
            ),
        }
        outcome
    }

    async fn dispatch(
        &self,
        run: &mut TriggerRun,
        outcome: &mut TriggerOutcome,
        signal: &Signal,
        confidence: Confidence,
    ) {
        if self.dry_run {
            debug!(
                chain = %self.chain,
                tx = ?run.tx_hash,
                margin = signal.margin,
                path = ?signal.path,
                "Dry run, not submitting"
            );
            run.advance(TriggerState::Skipped(SkipReason::DryRun));
            return;
        }

        let nonce = match self.nonces.next().await {
            Ok(nonce) => nonce,
            Err(e) => {
                warn!(chain = %self.chain, error = %e, "Could not reserve a nonce");
                outcome.error = Some(e.to_string());
                run.advance(TriggerState::Failed);
                return;
            }
        };

        match self.dispatcher.dispatch(signal, confidence, nonce).await {
            Ok(receipt) => {
                outcome.receipt = Some(receipt);
                run.advance(TriggerState::Submitted);
            }
            Err(e) => {
                warn!(chain = %self.chain, stage = e.stage(), error = %e, "Strike failed");
                self.stats.record_dispatch_error(&e);
                // The nonce may or may not have been consumed
                self.nonces.resync().await;
                outcome.error = Some(e.to_string());
                run.advance(TriggerState::Failed);
            }
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("chain", &self.chain)
            .field("origins", &self.origins)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}
