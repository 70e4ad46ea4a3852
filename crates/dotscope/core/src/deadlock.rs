// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Deadlock Detection
//!
//! Units that wait on each other form a wait-for graph. When the engine runs
//! out of work, the detector looks for terminal clusters: groups of blocked
//! units that no unit outside the group can unblock. Such a cluster will
//! never receive more input, so whatever it is still waiting for can be
//! treated as final.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::time::{Duration, Instant};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use tracing::debug;

use dotscope_common::UnitId;

/// Represents a wait-for relationship between units
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitForEdge<T> {
    /// Unit that is waiting
    pub waiter: UnitId,
    /// Unit expected to grant the token
    pub holder: UnitId,
    /// Token being waited for
    pub resource: T,
    /// When this wait relationship was established
    pub wait_start_time: Instant,
}

impl<T> WaitForEdge<T> {
    pub fn new(waiter: UnitId, holder: UnitId, resource: T) -> Self {
        Self {
            waiter,
            holder,
            resource,
            wait_start_time: Instant::now(),
        }
    }

    /// Get the duration this unit has been waiting
    pub fn wait_duration(&self) -> Duration {
        self.wait_start_time.elapsed()
    }
}

/// A group of units that can only be unblocked from within
#[derive(Debug, Clone)]
pub struct DeadlockCluster {
    /// Units involved in the deadlock, sorted
    pub units: Vec<UnitId>,
    /// When this deadlock was detected
    pub detection_time: Instant,
}

impl DeadlockCluster {
    pub fn contains(&self, unit: &UnitId) -> bool {
        self.units.binary_search(unit).is_ok()
    }
}

/// Statistics about deadlock detection
#[derive(Debug, Clone, Default)]
pub struct DeadlockStatistics {
    /// Total number of clusters detected
    pub total_deadlocks_detected: u64,
    /// Units released with their previous result by deadlock resolution
    pub units_released: u64,
    /// Units restarted by deadlock resolution
    pub units_restarted: u64,
    /// Closure tokens granted by deadlock resolution
    pub tokens_granted: u64,
    /// Number of currently active wait-for edges
    pub active_wait_edges: usize,
    /// Longest wait observed at detection time
    pub max_wait_time_ms: u64,
}

/// Wait-for graph for deadlock detection
#[derive(Debug)]
pub struct WaitForGraph<T> {
    /// Edges in the wait-for graph
    edges: HashMap<UnitId, Vec<WaitForEdge<T>>>,
    /// Reverse mapping: unit -> units waiting for it
    waiting_for: HashMap<UnitId, HashSet<UnitId>>,
}

impl<T> Default for WaitForGraph<T> {
    fn default() -> Self {
        Self {
            edges: HashMap::new(),
            waiting_for: HashMap::new(),
        }
    }
}

impl<T: Clone + PartialEq + Debug> WaitForGraph<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a wait-for edge to the graph
    pub fn add_edge(&mut self, edge: WaitForEdge<T>) {
        self.waiting_for
            .entry(edge.holder.clone())
            .or_default()
            .insert(edge.waiter.clone());
        self.edges.entry(edge.waiter.clone()).or_default().push(edge);
    }

    /// Remove one wait-for edge for `resource`. Returns false if absent.
    pub fn remove_edge(&mut self, waiter: &UnitId, holder: &UnitId, resource: &T) -> bool {
        let Some(edges) = self.edges.get_mut(waiter) else {
            return false;
        };
        let Some(pos) = edges.iter().position(|e| &e.holder == holder && &e.resource == resource) else {
            return false;
        };
        edges.remove(pos);
        let still_waiting = edges.iter().any(|e| &e.holder == holder);
        if edges.is_empty() {
            self.edges.remove(waiter);
        }
        if !still_waiting {
            if let Some(waiters) = self.waiting_for.get_mut(holder) {
                waiters.remove(waiter);
                if waiters.is_empty() {
                    self.waiting_for.remove(holder);
                }
            }
        }
        true
    }

    /// Units waiting on `holder`
    pub fn waiters_of(&self, holder: &UnitId) -> Vec<UnitId> {
        self.waiting_for
            .get(holder)
            .map(|w| w.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    fn max_wait(&self) -> Duration {
        self.edges
            .values()
            .flatten()
            .map(WaitForEdge::wait_duration)
            .max()
            .unwrap_or_default()
    }

    /// Terminal clusters of the current graph.
    ///
    /// A strongly connected component with at least one wait edge is
    /// terminal when nothing it can reach outside itself is still waiting.
    /// The cluster is the component plus everything it reaches.
    pub fn terminal_clusters(&self) -> Vec<DeadlockCluster> {
        let mut graph: DiGraph<UnitId, ()> = DiGraph::new();
        let mut nodes: HashMap<UnitId, NodeIndex> = HashMap::new();
        let mut node = |graph: &mut DiGraph<UnitId, ()>, unit: &UnitId| {
            *nodes.entry(unit.clone()).or_insert_with(|| graph.add_node(unit.clone()))
        };
        for edge in self.edges.values().flatten() {
            let from = node(&mut graph, &edge.waiter);
            let to = node(&mut graph, &edge.holder);
            graph.update_edge(from, to, ());
        }

        let waits = |n: NodeIndex| graph.neighbors(n).next().is_some();
        let mut clusters = Vec::new();
        for scc in tarjan_scc(&graph) {
            if !scc.iter().any(|&n| waits(n)) {
                continue;
            }
            let members: HashSet<NodeIndex> = scc.iter().copied().collect();
            let mut reach = HashSet::new();
            for &start in &scc {
                let mut dfs = Dfs::new(&graph, start);
                while let Some(n) = dfs.next(&graph) {
                    reach.insert(n);
                }
            }
            if reach.iter().any(|n| !members.contains(n) && waits(*n)) {
                continue;
            }
            let mut units: Vec<UnitId> = reach.into_iter().map(|n| graph[n].clone()).collect();
            units.sort();
            clusters.push(DeadlockCluster {
                units,
                detection_time: Instant::now(),
            });
        }
        clusters
    }
}

/// Deadlock detector owning the global wait-for graph.
#[derive(Debug)]
pub struct DeadlockDetector<T> {
    graph: WaitForGraph<T>,
    statistics: DeadlockStatistics,
}

impl<T> Default for DeadlockDetector<T> {
    fn default() -> Self {
        Self {
            graph: WaitForGraph::default(),
            statistics: DeadlockStatistics::default(),
        }
    }
}

impl<T: Clone + PartialEq + Debug> DeadlockDetector<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_wait(&mut self, waiter: UnitId, holder: UnitId, resource: T) {
        self.graph.add_edge(WaitForEdge::new(waiter, holder, resource));
    }

    pub fn remove_wait(&mut self, waiter: &UnitId, holder: &UnitId, resource: &T) -> bool {
        self.graph.remove_edge(waiter, holder, resource)
    }

    pub fn detect(&mut self) -> Vec<DeadlockCluster> {
        let clusters = self.graph.terminal_clusters();
        if !clusters.is_empty() {
            self.statistics.total_deadlocks_detected += clusters.len() as u64;
            self.statistics.max_wait_time_ms = self
                .statistics
                .max_wait_time_ms
                .max(self.graph.max_wait().as_millis() as u64);
            debug!("detected {} deadlock cluster(s)", clusters.len());
        }
        clusters
    }

    pub fn record_release(&mut self) {
        self.statistics.units_released += 1;
    }

    pub fn record_restart(&mut self) {
        self.statistics.units_restarted += 1;
    }

    pub fn record_grants(&mut self, count: usize) {
        self.statistics.tokens_granted += count as u64;
    }

    pub fn statistics(&self) -> DeadlockStatistics {
        let mut stats = self.statistics.clone();
        stats.active_wait_edges = self.graph.edge_count();
        stats
    }
}
