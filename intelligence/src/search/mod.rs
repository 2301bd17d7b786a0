//! Path search engine
//!
//! Wraps the log-space cycle search with the engine's policy: which origins
//! to try, the time and step budget, the profitability floor and how a
//! winning cycle becomes call data.

pub mod dfs;
pub mod encoder;

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

pub use dfs::{compare_candidates, find_best_cycle, Cycle, DfsOutcome, SearchLimits};
pub use encoder::{ExecutorCallEncoder, PayloadEncoder};

use crate::config::SearchConfig;
use crate::graph::GraphView;
use crate::types::Signal;

/// Search policy
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub max_hops: usize,
    pub deadline: Duration,
    pub max_steps: u64,
    pub min_margin: f64,
    pub notional: f64,
}

impl From<&SearchConfig> for SearchParams {
    fn from(config: &SearchConfig) -> Self {
        Self {
            max_hops: config.max_hops,
            deadline: config.deadline(),
            max_steps: config.max_steps,
            min_margin: config.min_margin,
            notional: config.notional,
        }
    }
}

/// Cycle search with a pluggable payload encoder
#[derive(Clone)]
pub struct SearchEngine {
    params: SearchParams,
    encoder: Arc<dyn PayloadEncoder>,
}

impl std::fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchEngine").field("params", &self.params).finish()
    }
}

impl SearchEngine {
    pub fn new(params: SearchParams, encoder: Arc<dyn PayloadEncoder>) -> Self {
        Self { params, encoder }
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    /// Search from a single origin
    pub fn search<G: GraphView + ?Sized>(&self, graph: &G, origin: &str) -> Signal {
        self.search_origins(graph, std::slice::from_ref(&origin))
    }

    /// Search every origin under one shared deadline and step budget and keep
    /// the best cycle overall.
    pub fn search_origins<G, S>(&self, graph: &G, origins: &[S]) -> Signal
    where
        G: GraphView + ?Sized,
        S: AsRef<str>,
    {
        let started = Instant::now();
        let deadline = started + self.params.deadline;

        let mut best: Option<Cycle> = None;
        let mut steps = 0u64;
        let mut partial = false;

        for origin in origins {
            let remaining_steps = self.params.max_steps.saturating_sub(steps);
            if remaining_steps == 0 || Instant::now() >= deadline {
                partial = true;
                break;
            }

            let outcome = find_best_cycle(
                graph,
                origin.as_ref(),
                SearchLimits {
                    max_hops: self.params.max_hops,
                    deadline,
                    max_steps: remaining_steps,
                },
            );
            steps += outcome.steps;
            partial |= outcome.partial;

            if let Some(cycle) = outcome.best {
                let better = match &best {
                    None => true,
                    Some(current) => {
                        compare_candidates((cycle.log_sum, &cycle.nodes[..]), (current.log_sum, &current.nodes[..]))
                            == Ordering::Greater
                    }
                };
                if better {
                    best = Some(cycle);
                }
            }

            if partial {
                break;
            }
        }

        let signal = self.to_signal(best, partial, steps);
        debug!(
            profitable = signal.profitable,
            margin = signal.margin,
            hops = signal.hops(),
            steps,
            partial,
            elapsed_us = started.elapsed().as_micros() as u64,
            "Cycle search finished"
        );
        signal
    }

    fn to_signal(&self, best: Option<Cycle>, partial: bool, steps: u64) -> Signal {
        let Some(cycle) = best else {
            return Signal::unprofitable(partial, steps);
        };

        let margin = cycle.margin();
        let mut profitable = margin > self.params.min_margin;
        let payload = if profitable {
            match self.encoder.encode(&cycle) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, path = ?cycle.nodes, "Failed to encode cycle payload");
                    profitable = false;
                    Default::default()
                }
            }
        } else {
            Default::default()
        };

        Signal {
            profitable,
            margin,
            estimated_profit: margin * self.params.notional,
            path: cycle.nodes,
            venues: cycle.venues,
            payload,
            partial,
            steps,
        }
    }

    /// Run the search on the blocking pool so it never stalls the runtime
    pub async fn search_blocking<G>(&self, graph: G, origins: Vec<String>) -> Signal
    where
        G: GraphView + 'static,
    {
        let engine = self.clone();
        match tokio::task::spawn_blocking(move || engine.search_origins(&graph, &origins)).await {
            Ok(signal) => signal,
            Err(e) => {
                error!(error = %e, "Cycle search task failed");
                Signal::unprofitable(true, 0)
            }
        }
    }
}
