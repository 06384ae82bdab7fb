//! Wait-for graph
//!
//! A directed graph where an edge `u -> v` means "u is waiting on v".
//! Nodes are opaque identifiers naming either a pending request or a
//! lock owner; the graph does not care which.
//!
//! The graph has no interior locking. It is owned by a single
//! [`DeadlockDetector`](super::DeadlockDetector), which guards it with a
//! reader/writer lock.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Node and edge counts of a wait-for graph
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
}

/// Directed wait-for graph with cycle enumeration
///
/// `Clone` is a deep copy of nodes and adjacency lists, used to simulate
/// edge additions without touching live state.
#[derive(Debug, Clone, Default)]
pub struct WaitForGraph {
    nodes: HashSet<String>,
    /// Adjacency lists, in insertion order, without duplicates
    edges: HashMap<String, Vec<String>>,
}

impl WaitForGraph {
    /// Creates a new, empty wait-for graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node with no edges. Existing edges are kept.
    pub fn add_node(&mut self, id: impl Into<String>) {
        let id = id.into();
        self.edges.entry(id.clone()).or_default();
        self.nodes.insert(id);
    }

    /// Removes a node, its outgoing edges, and every edge pointing at it.
    ///
    /// Returns `true` if the node was present.
    pub fn remove_node(&mut self, id: &str) -> bool {
        let existed = self.nodes.remove(id);
        self.edges.remove(id);

        for targets in self.edges.values_mut() {
            targets.retain(|t| t != id);
        }

        existed
    }

    /// Removes `id` only if no edge leaves or enters it.
    ///
    /// Returns `true` if the node was removed.
    pub fn remove_isolated(&mut self, id: &str) -> bool {
        let referenced = self
            .edges
            .values()
            .any(|targets| targets.iter().any(|t| t == id));
        if referenced || !self.waits_for(id).is_empty() {
            return false;
        }

        self.edges.remove(id);
        self.nodes.remove(id)
    }

    /// Records that `source` waits for `target`. Idempotent.
    pub fn add_edge(&mut self, source: impl Into<String>, target: impl Into<String>) {
        let source = source.into();
        let target = target.into();

        self.nodes.insert(source.clone());
        self.nodes.insert(target.clone());
        self.edges.entry(target.clone()).or_default();

        let targets = self.edges.entry(source).or_default();
        if !targets.contains(&target) {
            targets.push(target);
        }
    }

    /// Whether `id` is a node of the graph
    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains(id)
    }

    /// Whether the edge `source -> target` exists
    pub fn has_edge(&self, source: &str, target: &str) -> bool {
        self.edges
            .get(source)
            .map(|targets| targets.iter().any(|t| t == target))
            .unwrap_or(false)
    }

    /// The nodes `id` is waiting for
    pub fn waits_for(&self, id: &str) -> &[String] {
        self.edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Graph statistics
    pub fn stats(&self) -> GraphStats {
        GraphStats {
            nodes: self.node_count(),
            edges: self.edge_count(),
        }
    }

    /// Finds cycles with a depth-first search from every unvisited node.
    ///
    /// When the traversal reaches a node that is still on the DFS stack,
    /// the path segment from that node to the current one is emitted.
    /// The result is not a minimal cycle basis: overlapping cycles may be
    /// reported, and which ones depends on traversal order. It is empty if
    /// and only if the graph is acyclic.
    ///
    /// The traversal keeps its own stack, so chain length is bounded by
    /// memory rather than by the thread's call stack.
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let mut cycles = Vec::new();
        let mut visited: HashSet<&str> = HashSet::with_capacity(self.nodes.len());
        let mut on_stack: HashSet<&str> = HashSet::new();
        // Current path; each entry carries the index of its next edge to follow
        let mut path: Vec<(&str, usize)> = Vec::new();

        // Sorted start order keeps results reproducible across runs
        let mut starts: Vec<&str> = self.nodes.iter().map(String::as_str).collect();
        starts.sort_unstable();

        for start in starts {
            if visited.contains(start) {
                continue;
            }
            visited.insert(start);
            on_stack.insert(start);
            path.push((start, 0));

            while let Some((node, next)) = path.last_mut() {
                let node = *node;
                let Some(target) = self.waits_for(node).get(*next) else {
                    on_stack.remove(node);
                    path.pop();
                    continue;
                };
                *next += 1;

                let target = target.as_str();
                if !visited.contains(target) {
                    visited.insert(target);
                    on_stack.insert(target);
                    path.push((target, 0));
                } else if on_stack.contains(target) {
                    if let Some(begin) = path.iter().position(|(n, _)| *n == target) {
                        cycles.push(path[begin..].iter().map(|(n, _)| n.to_string()).collect());
                    }
                }
            }
        }

        cycles
    }

    /// Whether the graph contains at least one cycle
    pub fn has_cycle(&self) -> bool {
        !self.find_cycles().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &str)]) -> WaitForGraph {
        let mut g = WaitForGraph::new();
        for (s, t) in edges {
            g.add_edge(*s, *t);
        }
        g
    }

    #[test]
    fn test_add_edge_is_idempotent() {
        let g = graph(&[("a", "b"), ("a", "b")]);
        assert_eq!(g.stats(), GraphStats { nodes: 2, edges: 1 });
        assert!(g.has_edge("a", "b"));
        assert!(!g.has_edge("b", "a"));
        assert_eq!(g.waits_for("a"), ["b".to_string()]);
    }

    #[test]
    fn test_edge_endpoints_are_nodes() {
        let g = graph(&[("a", "b")]);
        assert!(g.contains_node("a"));
        assert!(g.contains_node("b"));
        assert!(g.waits_for("b").is_empty());
    }

    #[test]
    fn test_remove_node_strips_incoming_edges() {
        let mut g = graph(&[("a", "b"), ("c", "b"), ("b", "d")]);
        assert!(g.remove_node("b"));
        assert!(!g.contains_node("b"));
        assert!(g.waits_for("a").is_empty());
        assert!(g.waits_for("c").is_empty());
        assert_eq!(g.stats(), GraphStats { nodes: 3, edges: 0 });
        assert!(!g.remove_node("b"));
    }

    #[test]
    fn test_remove_isolated_only_drops_unreferenced_nodes() {
        let mut g = graph(&[("r1", "owner"), ("r2", "owner")]);
        assert!(!g.remove_isolated("owner"));
        assert!(!g.remove_isolated("r1"));

        g.remove_node("r1");
        g.remove_node("r2");
        assert!(g.remove_isolated("owner"));
        assert!(g.is_empty());
        assert!(!g.remove_isolated("owner"));
    }

    #[test]
    fn test_add_node_keeps_edges() {
        let mut g = graph(&[("a", "b")]);
        g.add_node("a");
        g.add_node("z");
        assert!(g.has_edge("a", "b"));
        assert_eq!(g.node_count(), 3);
    }

    #[test]
    fn test_acyclic_graph_has_no_cycles() {
        let g = graph(&[("a", "b"), ("b", "c"), ("a", "c"), ("c", "d"), ("e", "d")]);
        assert!(g.find_cycles().is_empty());
        assert!(!g.has_cycle());
        assert!(WaitForGraph::new().find_cycles().is_empty());
    }

    #[test]
    fn test_three_cycle_detected_regardless_of_insertion_order() {
        let orders: [[(&str, &str); 3]; 3] = [
            [("a", "b"), ("b", "c"), ("c", "a")],
            [("c", "a"), ("a", "b"), ("b", "c")],
            [("b", "c"), ("c", "a"), ("a", "b")],
        ];

        for edges in orders {
            let cycles = graph(&edges).find_cycles();
            assert!(!cycles.is_empty());
            assert_eq!(cycles[0].len(), 3);
        }
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let cycles = graph(&[("a", "a")]).find_cycles();
        assert_eq!(cycles, vec![vec!["a".to_string()]]);
    }

    #[test]
    fn test_cycle_path_segment() {
        // x leads into the a-b-c cycle; x itself is not part of it
        let cycles = graph(&[("x", "a"), ("a", "b"), ("b", "c"), ("c", "a")]).find_cycles();
        assert_eq!(cycles.len(), 1);
        assert!(!cycles[0].contains(&"x".to_string()));
        assert_eq!(cycles[0].len(), 3);
    }

    #[test]
    fn test_clone_is_independent() {
        let g = graph(&[("a", "b")]);
        let mut speculative = g.clone();
        speculative.add_edge("b", "a");

        assert!(speculative.has_cycle());
        assert!(!g.has_cycle());
        assert_eq!(g.stats().edges, 1);
    }

    #[test]
    fn test_long_chain_does_not_exhaust_the_stack() {
        let len = 200_000;
        let mut g = WaitForGraph::new();
        for i in 0..len {
            g.add_edge(format!("n{:06}", i), format!("n{:06}", i + 1));
        }
        assert!(!g.has_cycle());

        // Close the tail into a three-node loop
        g.add_edge(format!("n{:06}", len), format!("n{:06}", len - 2));
        let cycles = g.find_cycles();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), 3);
    }
}
