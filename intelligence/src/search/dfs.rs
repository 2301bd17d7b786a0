//! Bounded-depth cycle search in log space
//!
//! Edge weights are exchange rates, so a cycle's return is the product of its
//! weights. Summing `ln(weight)` instead keeps the arithmetic additive and a
//! cycle is profitable exactly when its log sum is positive.
//!
//! Branches are cut when even `max_weight` on every remaining hop could not
//! beat the best cycle found so far.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::time::Instant;

use crate::graph::GraphView;

/// Margins closer than this are treated as equal
pub const TIE_EPSILON: f64 = 1e-12;

/// Traversal limits for one search
#[derive(Debug, Clone, Copy)]
pub struct SearchLimits {
    pub max_hops: usize,
    pub deadline: Instant,
    pub max_steps: u64,
}

/// A closed cycle starting and ending at the origin
#[derive(Debug, Clone, PartialEq)]
pub struct Cycle {
    /// Node sequence, origin first and last
    pub nodes: Vec<String>,

    /// Venue per hop
    pub venues: Vec<Option<String>>,

    /// Sum of `ln(weight)` over the hops
    pub log_sum: f64,
}

impl Cycle {
    pub fn hops(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }

    /// Product of weights minus one
    pub fn margin(&self) -> f64 {
        self.log_sum.exp() - 1.0
    }

    pub fn origin(&self) -> &str {
        self.nodes.first().map(String::as_str).unwrap_or_default()
    }
}

/// Ranking between two candidate cycles: higher log sum, then fewer hops,
/// then the lexicographically smaller node sequence.
pub fn compare_candidates<A: AsRef<str>, B: AsRef<str>>(
    (sum_a, nodes_a): (f64, &[A]),
    (sum_b, nodes_b): (f64, &[B]),
) -> Ordering {
    if sum_a > sum_b + TIE_EPSILON {
        return Ordering::Greater;
    }
    if sum_b > sum_a + TIE_EPSILON {
        return Ordering::Less;
    }
    nodes_b
        .len()
        .cmp(&nodes_a.len())
        .then_with(|| {
            let a = nodes_a.iter().map(AsRef::as_ref);
            let b = nodes_b.iter().map(AsRef::as_ref);
            // Smaller sequence ranks higher
            b.cmp(a)
        })
}

/// Result of one traversal
#[derive(Debug, Clone, Default)]
pub struct DfsOutcome {
    pub best: Option<Cycle>,
    pub steps: u64,

    /// Deadline or step budget expired before the traversal finished
    pub partial: bool,
}

struct Dfs<'g, G: GraphView + ?Sized> {
    graph: &'g G,
    origin: &'g str,
    limits: SearchLimits,
    log_max: f64,
    steps: u64,
    expired: bool,
    path: Vec<&'g str>,
    venues: Vec<Option<&'g str>>,
    on_path: HashSet<&'g str>,
    best: Option<Cycle>,
}

impl<'g, G: GraphView + ?Sized> Dfs<'g, G> {
    fn budget_exhausted(&mut self) -> bool {
        if !self.expired && (self.steps >= self.limits.max_steps || Instant::now() >= self.limits.deadline) {
            self.expired = true;
        }
        self.expired
    }

    /// Optimistic final log sum for a path of `hops` edges with log sum `sum`
    fn upper_bound(&self, sum: f64, hops: usize) -> f64 {
        let remaining = self.limits.max_hops.saturating_sub(hops) as f64;
        if self.log_max >= 0.0 {
            sum + remaining * self.log_max
        } else {
            // At least one more hop is needed and every hop loses value
            sum + self.log_max
        }
    }

    fn visit(&mut self, node: &'g str, sum: f64) {
        if self.budget_exhausted() {
            return;
        }
        self.steps += 1;
        // Edges walked so far; `path` holds the origin plus one node per edge
        let hops = self.path.len() - 1;

        let graph = self.graph;
        for neighbor in graph.neighbors(node) {
            if self.expired {
                return;
            }
            let next_sum = sum + neighbor.weight.ln();
            let next_hops = hops + 1;

            if neighbor.node == self.origin {
                if next_hops >= 2 {
                    self.offer(neighbor.venue, next_sum);
                }
                continue;
            }

            // No room left for the hop back to the origin
            if next_hops + 1 > self.limits.max_hops || self.on_path.contains(neighbor.node) {
                continue;
            }

            if let Some(best) = &self.best {
                if self.upper_bound(next_sum, next_hops) < best.log_sum - TIE_EPSILON {
                    continue;
                }
            }

            self.path.push(neighbor.node);
            self.venues.push(neighbor.venue);
            self.on_path.insert(neighbor.node);

            self.visit(neighbor.node, next_sum);

            self.on_path.remove(neighbor.node);
            self.venues.pop();
            self.path.pop();
        }
    }

    /// Consider the current path closed back to the origin
    fn offer(&mut self, closing_venue: Option<&'g str>, log_sum: f64) {
        let mut nodes: Vec<&str> = self.path.clone();
        nodes.push(self.origin);

        let better = match &self.best {
            None => true,
            Some(best) => compare_candidates((log_sum, &nodes[..]), (best.log_sum, &best.nodes[..])) == Ordering::Greater,
        };
        if !better {
            return;
        }

        let mut venues: Vec<Option<String>> = self.venues.iter().map(|v| v.map(str::to_string)).collect();
        venues.push(closing_venue.map(str::to_string));

        self.best = Some(Cycle {
            nodes: nodes.into_iter().map(str::to_string).collect(),
            venues,
            log_sum,
        });
    }
}

/// Search for the best cycle through `origin` within `limits`.
///
/// Never mutates the graph. An absent origin yields no cycle and no error.
pub fn find_best_cycle<G: GraphView + ?Sized>(graph: &G, origin: &str, limits: SearchLimits) -> DfsOutcome {
    let log_max = match graph.max_weight() {
        Some(max) if graph.contains(origin) && limits.max_hops >= 2 => max.ln(),
        _ => return DfsOutcome::default(),
    };

    let mut dfs = Dfs {
        graph,
        origin,
        limits,
        log_max,
        steps: 0,
        expired: false,
        path: vec![origin],
        venues: Vec::new(),
        on_path: HashSet::from([origin]),
        best: None,
    };
    dfs.visit(origin, 0.0);

    DfsOutcome {
        best: dfs.best,
        steps: dfs.steps,
        partial: dfs.expired,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MarketGraph;
    use chrono::Utc;
    use std::time::Duration;

    fn graph(edges: &[(&str, &str, f64)]) -> MarketGraph {
        let graph = MarketGraph::new();
        let now = Utc::now();
        for (from, to, w) in edges {
            graph.upsert_edge(from, to, *w, now).unwrap();
        }
        graph
    }

    fn limits(max_hops: usize) -> SearchLimits {
        SearchLimits {
            max_hops,
            deadline: Instant::now() + Duration::from_secs(5),
            max_steps: 1_000_000,
        }
    }

    #[test]
    fn test_finds_triangle() {
        let g = graph(&[("A", "B", 1.01), ("B", "C", 1.02), ("C", "A", 1.00)]);
        let outcome = find_best_cycle(&g.snapshot(), "A", limits(12));
        let best = outcome.best.unwrap();
        assert_eq!(best.nodes, vec!["A", "B", "C", "A"]);
        assert_eq!(best.hops(), 3);
        assert!((best.margin() - 0.0302).abs() < 1e-9);
        assert!(!outcome.partial);
    }

    #[test]
    fn test_cycle_of_exactly_max_hops_is_found() {
        let g = graph(&[("A", "B", 1.01), ("B", "C", 1.02), ("C", "A", 1.00)]);
        let best = find_best_cycle(&g.snapshot(), "A", limits(3)).best.unwrap();
        assert_eq!(best.nodes, vec!["A", "B", "C", "A"]);
        assert!(find_best_cycle(&g.snapshot(), "A", limits(2)).best.is_none());

        let g = graph(&[("A", "B", 1.5), ("B", "A", 1.5)]);
        let best = find_best_cycle(&g.snapshot(), "A", limits(2)).best.unwrap();
        assert_eq!(best.nodes, vec!["A", "B", "A"]);
        assert_eq!(best.hops(), 2);
    }

    #[test]
    fn test_pruning_keeps_better_cycle_at_hop_limit() {
        // A-B-A returns 1.44 and is found first; A-C-D-A returns 1.520875.
        // The bound at A->C must still allow two more hops.
        let g = graph(&[
            ("A", "B", 1.2),
            ("B", "A", 1.2),
            ("A", "C", 1.15),
            ("C", "D", 1.15),
            ("D", "A", 1.15),
        ]);
        let best = find_best_cycle(&g.snapshot(), "A", limits(3)).best.unwrap();
        assert_eq!(best.nodes, vec!["A", "C", "D", "A"]);
        assert!((best.margin() - 0.520875).abs() < 1e-9);

        let best = find_best_cycle(&g.snapshot(), "A", limits(2)).best.unwrap();
        assert_eq!(best.nodes, vec!["A", "B", "A"]);
    }

    #[test]
    fn test_two_hop_cycle_and_no_revisit() {
        // B -> C -> B loop is not through A and must not be walked twice
        let g = graph(&[("A", "B", 2.0), ("B", "A", 0.6), ("B", "C", 3.0), ("C", "B", 3.0)]);
        let best = find_best_cycle(&g.snapshot(), "A", limits(12)).best.unwrap();
        assert_eq!(best.nodes, vec!["A", "B", "A"]);
        assert!((best.margin() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_tie_prefers_fewer_hops_then_lexicographic() {
        // A-B-A and A-C-D-A both return exactly 1.21
        let g = graph(&[
            ("A", "B", 1.1),
            ("B", "A", 1.1),
            ("A", "C", 1.1),
            ("C", "D", 1.0),
            ("D", "A", 1.1),
        ]);
        let best = find_best_cycle(&g.snapshot(), "A", limits(12)).best.unwrap();
        assert_eq!(best.nodes, vec!["A", "B", "A"]);

        let g = graph(&[("A", "C", 1.1), ("C", "A", 1.1), ("A", "B", 1.1), ("B", "A", 1.1)]);
        let best = find_best_cycle(&g.snapshot(), "A", limits(12)).best.unwrap();
        assert_eq!(best.nodes, vec!["A", "B", "A"]);
    }

    #[test]
    fn test_absent_origin() {
        let g = graph(&[("A", "B", 1.5), ("B", "A", 1.5)]);
        let outcome = find_best_cycle(&g.snapshot(), "Z", limits(12));
        assert!(outcome.best.is_none());
        assert_eq!(outcome.steps, 0);
        assert!(!outcome.partial);
    }

    #[test]
    fn test_step_budget_marks_partial() {
        let g = graph(&[("A", "B", 1.0), ("B", "C", 1.0), ("C", "D", 1.0), ("D", "A", 1.0), ("B", "A", 1.0)]);
        let outcome = find_best_cycle(
            &g.snapshot(),
            "A",
            SearchLimits {
                max_steps: 1,
                ..limits(12)
            },
        );
        assert!(outcome.partial);
        assert_eq!(outcome.steps, 1);
    }

    #[test]
    fn test_compare_candidates() {
        let short = ["A", "B", "A"];
        let long = ["A", "B", "C", "A"];
        assert_eq!(compare_candidates((0.1, &short[..]), (0.0, &long[..])), Ordering::Greater);
        assert_eq!(compare_candidates((0.0, &short[..]), (0.0, &long[..])), Ordering::Greater);
        assert_eq!(
            compare_candidates((0.0, &["A", "B", "A"][..]), (0.0, &["A", "C", "A"][..])),
            Ordering::Greater
        );
    }
}
