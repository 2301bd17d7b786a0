//! Market graph
//!
//! Directed graph of exchange rates between assets. Nodes are asset
//! identifiers, and each ordered pair carries at most one edge holding the
//! newest observed rate.
//!
//! The graph is copy-on-write: the current state lives behind an
//! `Arc<GraphState>` and every write clones-then-swaps it. [`MarketGraph::snapshot`]
//! hands out the current `Arc`, so searches read a consistent view without
//! holding any lock while updates keep flowing.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// Stored edge data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Units of `to` received per unit of `from`
    pub weight: f64,

    /// When the rate was observed
    pub observed_at: DateTime<Utc>,

    /// Pool or venue that quoted the rate
    pub venue: Option<String>,
}

/// One edge write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeUpdate {
    pub from: String,
    pub to: String,
    pub weight: f64,
    pub observed_at: DateTime<Utc>,
    pub venue: Option<String>,
}

impl EdgeUpdate {
    pub fn new(from: impl Into<String>, to: impl Into<String>, weight: f64, observed_at: DateTime<Utc>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            weight,
            observed_at,
            venue: None,
        }
    }

    pub fn with_venue(mut self, venue: impl Into<String>) -> Self {
        self.venue = Some(venue.into());
        self
    }

    /// Check the update can be stored
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.from.is_empty() || self.to.is_empty() {
            return Err(GraphError::EmptyNode);
        }
        if self.from == self.to {
            return Err(GraphError::SelfLoop(self.from.clone()));
        }
        if !(self.weight.is_finite() && self.weight > 0.0) {
            return Err(GraphError::InvalidWeight {
                from: self.from.clone(),
                to: self.to.clone(),
                weight: self.weight,
            });
        }
        Ok(())
    }
}

/// What an upsert did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
    /// A newer observation is already stored
    Stale,
}

/// Summary of a batch write
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    pub inserted: usize,
    pub replaced: usize,
    pub stale: usize,
    pub rejected: Vec<GraphError>,
}

impl ApplyReport {
    pub fn changed(&self) -> bool {
        self.inserted + self.replaced > 0
    }
}

/// Neighbor entry handed to the search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor<'a> {
    pub node: &'a str,
    pub weight: f64,
    pub venue: Option<&'a str>,
}

/// Read access needed by the cycle search
pub trait GraphView: Send + Sync {
    fn contains(&self, node: &str) -> bool;

    /// Largest edge weight, `None` on an empty graph
    fn max_weight(&self) -> Option<f64>;

    /// Outgoing edges of `node`, ordered by neighbor id
    fn neighbors(&self, node: &str) -> Vec<Neighbor<'_>>;
}

#[derive(Debug, Clone, Default)]
pub struct GraphState {
    adjacency: HashMap<String, BTreeMap<String, Edge>>,
    node_count: usize,
    edge_count: usize,
    max_weight: Option<f64>,
    version: u64,
}

impl GraphState {
    fn upsert(&mut self, update: &EdgeUpdate) -> UpsertOutcome {
        let is_new_from = !self.adjacency.contains_key(&update.from);
        let is_new_to = !self.adjacency.contains_key(&update.to);

        let edges = self.adjacency.entry(update.from.clone()).or_default();
        let previous = edges.get(&update.to).map(|e| (e.weight, e.observed_at));

        let outcome = match previous {
            Some((_, observed_at)) if observed_at > update.observed_at => return UpsertOutcome::Stale,
            Some(_) => UpsertOutcome::Replaced,
            None => UpsertOutcome::Inserted,
        };

        edges.insert(
            update.to.clone(),
            Edge {
                weight: update.weight,
                observed_at: update.observed_at,
                venue: update.venue.clone(),
            },
        );
        // Every endpoint is a node even with no outgoing edges
        self.adjacency.entry(update.to.clone()).or_default();

        self.node_count += is_new_from as usize + is_new_to as usize;
        if outcome == UpsertOutcome::Inserted {
            self.edge_count += 1;
        }

        match (previous, self.max_weight) {
            // The old maximum may have just been lowered
            (Some((old, _)), Some(max)) if old == max && update.weight < old => self.recompute_max_weight(),
            (_, Some(max)) if update.weight <= max => {}
            _ => self.max_weight = Some(update.weight),
        }

        outcome
    }

    fn recompute_max_weight(&mut self) {
        self.max_weight = self
            .adjacency
            .values()
            .flat_map(|edges| edges.values().map(|e| e.weight))
            .fold(None, |acc: Option<f64>, w| Some(acc.map_or(w, |m| m.max(w))));
    }
}

/// Immutable view of the graph at one version
#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    state: Arc<GraphState>,
}

impl GraphSnapshot {
    pub fn version(&self) -> u64 {
        self.state.version
    }

    pub fn node_count(&self) -> usize {
        self.state.node_count
    }

    pub fn edge_count(&self) -> usize {
        self.state.edge_count
    }

    pub fn edge(&self, from: &str, to: &str) -> Option<&Edge> {
        self.state.adjacency.get(from).and_then(|edges| edges.get(to))
    }

    /// All edges as `(from, to, weight)`, sorted
    pub fn edges(&self) -> Vec<(String, String, f64)> {
        let mut edges: Vec<_> = self
            .state
            .adjacency
            .iter()
            .flat_map(|(from, edges)| edges.iter().map(move |(to, e)| (from.clone(), to.clone(), e.weight)))
            .collect();
        edges.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        edges
    }

    /// Whether both snapshots share the same underlying state
    pub fn ptr_eq(&self, other: &GraphSnapshot) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl GraphView for GraphSnapshot {
    fn contains(&self, node: &str) -> bool {
        self.state.adjacency.contains_key(node)
    }

    fn max_weight(&self) -> Option<f64> {
        self.state.max_weight
    }

    fn neighbors(&self, node: &str) -> Vec<Neighbor<'_>> {
        self.state
            .adjacency
            .get(node)
            .map(|edges| {
                edges
                    .iter()
                    .map(|(to, e)| Neighbor {
                        node: to.as_str(),
                        weight: e.weight,
                        venue: e.venue.as_deref(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Shared, copy-on-write market graph
#[derive(Debug, Default)]
pub struct MarketGraph {
    state: RwLock<Arc<GraphState>>,
}

impl MarketGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace one edge
    pub fn upsert_edge(
        &self,
        from: &str,
        to: &str,
        weight: f64,
        observed_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, GraphError> {
        let update = EdgeUpdate::new(from, to, weight, observed_at);
        update.validate()?;

        let mut guard = self.state.write();
        let state = Arc::make_mut(&mut *guard);
        let outcome = state.upsert(&update);
        if outcome != UpsertOutcome::Stale {
            state.version += 1;
        }
        Ok(outcome)
    }

    /// Apply a batch under a single write. Invalid updates are rejected
    /// individually; the rest still apply.
    pub fn apply(&self, batch: &[EdgeUpdate]) -> ApplyReport {
        let mut report = ApplyReport::default();
        let (valid, rejected): (Vec<_>, Vec<_>) = batch.iter().map(|u| (u, u.validate())).partition(|(_, r)| r.is_ok());
        report.rejected = rejected.into_iter().filter_map(|(_, r)| r.err()).collect();

        if valid.is_empty() {
            return report;
        }

        let mut guard = self.state.write();
        // Build the next state off to the side so readers never see a partial batch
        let mut next = GraphState::clone(&guard);
        for (update, _) in valid {
            match next.upsert(update) {
                UpsertOutcome::Inserted => report.inserted += 1,
                UpsertOutcome::Replaced => report.replaced += 1,
                UpsertOutcome::Stale => report.stale += 1,
            }
        }
        if report.changed() {
            next.version += 1;
            *guard = Arc::new(next);
        }
        report
    }

    /// Outgoing edges of `node` as `(neighbor, weight)`, ordered by neighbor id
    pub fn neighbors(&self, node: &str) -> Vec<(String, f64)> {
        let state = self.state.read();
        state
            .adjacency
            .get(node)
            .map(|edges| edges.iter().map(|(to, e)| (to.clone(), e.weight)).collect())
            .unwrap_or_default()
    }

    /// Consistent read-only view; does not block later writes
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            state: Arc::clone(&self.state.read()),
        }
    }

    pub fn version(&self) -> u64 {
        self.state.read().version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_upsert_and_replace() {
        let graph = MarketGraph::new();
        assert_eq!(graph.upsert_edge("a", "b", 1.5, t(0)).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(graph.upsert_edge("a", "b", 1.7, t(1)).unwrap(), UpsertOutcome::Replaced);
        assert_eq!(graph.neighbors("a"), vec![("b".to_string(), 1.7)]);

        let snap = graph.snapshot();
        assert_eq!(snap.node_count(), 2);
        assert_eq!(snap.edge_count(), 1);
        assert_eq!(graph.version(), 2);
    }

    #[test]
    fn test_stale_update_is_ignored() {
        let graph = MarketGraph::new();
        graph.upsert_edge("a", "b", 2.0, t(10)).unwrap();
        assert_eq!(graph.upsert_edge("a", "b", 3.0, t(5)).unwrap(), UpsertOutcome::Stale);
        assert_eq!(graph.neighbors("a"), vec![("b".to_string(), 2.0)]);
        assert_eq!(graph.version(), 1);
    }

    #[test]
    fn test_invalid_weights_are_rejected() {
        let graph = MarketGraph::new();
        for weight in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                graph.upsert_edge("a", "b", weight, t(0)),
                Err(GraphError::InvalidWeight { .. })
            ));
        }
        assert!(matches!(graph.upsert_edge("a", "a", 1.0, t(0)), Err(GraphError::SelfLoop(_))));
        assert_eq!(graph.snapshot().edge_count(), 0);
    }

    #[test]
    fn test_neighbors_are_ordered() {
        let graph = MarketGraph::new();
        graph.upsert_edge("a", "d", 1.0, t(0)).unwrap();
        graph.upsert_edge("a", "b", 1.0, t(0)).unwrap();
        graph.upsert_edge("a", "c", 1.0, t(0)).unwrap();
        let ids: Vec<_> = graph.neighbors("a").into_iter().map(|(n, _)| n).collect();
        assert_eq!(ids, vec!["b", "c", "d"]);
        assert!(graph.neighbors("missing").is_empty());
    }

    #[test]
    fn test_snapshot_isolated_from_later_writes() {
        let graph = MarketGraph::new();
        graph.upsert_edge("a", "b", 1.0, t(0)).unwrap();
        let before = graph.snapshot();
        graph.upsert_edge("b", "c", 1.0, t(1)).unwrap();

        assert_eq!(before.edge_count(), 1);
        assert_eq!(graph.snapshot().edge_count(), 2);
    }

    #[test]
    fn test_snapshot_idempotent() {
        let graph = MarketGraph::new();
        graph.upsert_edge("a", "b", 1.01, t(0)).unwrap();
        graph.upsert_edge("b", "a", 0.99, t(0)).unwrap();

        let first = graph.snapshot();
        let second = graph.snapshot();
        assert_eq!(first.edges(), second.edges());
        assert_eq!(first.version(), second.version());
        assert!(first.ptr_eq(&second));
    }

    #[test]
    fn test_apply_batch() {
        let graph = MarketGraph::new();
        let now = Utc::now();
        let report = graph.apply(&[
            EdgeUpdate::new("a", "b", 1.0, now).with_venue("0xpool"),
            EdgeUpdate::new("b", "c", -4.0, now),
            EdgeUpdate::new("c", "a", 1.1, now),
            EdgeUpdate::new("a", "b", 1.2, now - Duration::seconds(1)),
        ]);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.stale, 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(graph.version(), 1);

        let snap = graph.snapshot();
        assert_eq!(snap.edge("a", "b").and_then(|e| e.venue.clone()), Some("0xpool".to_string()));
        assert_eq!(snap.max_weight(), Some(1.1));
    }

    #[test]
    fn test_max_weight_tracks_replacements() {
        let graph = MarketGraph::new();
        graph.upsert_edge("a", "b", 3.0, t(0)).unwrap();
        graph.upsert_edge("b", "a", 2.0, t(0)).unwrap();
        assert_eq!(graph.snapshot().max_weight(), Some(3.0));
        graph.upsert_edge("a", "b", 0.5, t(1)).unwrap();
        assert_eq!(graph.snapshot().max_weight(), Some(2.0));
    }

    proptest! {
        #[test]
        fn prop_neighbors_hold_latest_weight(
            updates in proptest::collection::vec((0u8..4, 0u8..4, 0.01f64..10.0), 1..64)
        ) {
            let graph = MarketGraph::new();
            let mut expected: BTreeMap<(u8, u8), f64> = BTreeMap::new();

            for (i, (from, to, weight)) in updates.into_iter().enumerate() {
                if from == to {
                    continue;
                }
                graph.upsert_edge(&from.to_string(), &to.to_string(), weight, t(i as i64)).unwrap();
                expected.insert((from, to), weight);
            }

            for node in 0u8..4 {
                let want: Vec<(String, f64)> = expected
                    .iter()
                    .filter(|((from, _), _)| *from == node)
                    .map(|((_, to), w)| (to.to_string(), *w))
                    .collect();
                prop_assert_eq!(graph.neighbors(&node.to_string()), want);
            }
            prop_assert_eq!(graph.snapshot().edge_count(), expected.len());
        }
    }
}
