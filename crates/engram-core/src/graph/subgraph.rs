use crate::types::{Edge, EdgeId, Node, NodeId};
use std::collections::{HashMap, HashSet};

/// A subgraph result from traversal or query
#[derive(Debug, Clone, Default)]
pub struct Subgraph {
    /// All nodes in the result, keyed by ID for O(1) lookup.
    pub nodes: HashMap<NodeId, Node>,

    /// All edges connecting the result nodes, ordered by descending
    /// confidence then ascending first_observed.
    pub edges: Vec<Edge>,

    /// Depth of each node from the nearest seed.
    pub depths: HashMap<NodeId, u32>,

    /// Total nodes visited during traversal (may exceed nodes.len()
    /// when kind_filter excluded some).
    pub visited_count: usize,

    /// Whether traversal was truncated by a budget or limit.
    pub truncated: bool,

    /// Set when the store was unavailable and the result is an empty
    /// stand-in rather than an answer. The agent proceeds without
    /// context; a missing answer looks like "I do not know yet".
    pub soft_error: bool,
}

impl Subgraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty result carrying the degraded-store marker.
    pub fn soft_error() -> Self {
        Self {
            soft_error: true,
            ..Self::default()
        }
    }

    /// Get all edges between two specific nodes, either direction.
    pub fn edges_between(&self, a: NodeId, b: NodeId) -> Vec<&Edge> {
        self.edges
            .iter()
            .filter(|e| (e.source == a && e.target == b) || (e.source == b && e.target == a))
            .collect()
    }

    /// Get neighbors of a node within this subgraph
    pub fn neighbors(&self, id: NodeId) -> Vec<&Node> {
        let mut neighbor_ids = HashSet::new();
        for edge in &self.edges {
            if edge.source == id {
                neighbor_ids.insert(edge.target);
            } else if edge.target == id {
                neighbor_ids.insert(edge.source);
            }
        }
        neighbor_ids
            .iter()
            .filter_map(|nid| self.nodes.get(nid))
            .collect()
    }

    /// Merge another subgraph into this one
    pub fn merge(&mut self, other: Subgraph) {
        for (id, node) in other.nodes {
            self.nodes.insert(id, node);
        }

        let existing: HashSet<EdgeId> = self.edges.iter().map(|e| e.id).collect();
        for edge in other.edges {
            if !existing.contains(&edge.id) {
                self.edges.push(edge);
            }
        }

        for (id, depth) in other.depths {
            self.depths
                .entry(id)
                .and_modify(|d| *d = (*d).min(depth))
                .or_insert(depth);
        }

        self.visited_count += other.visited_count;
        self.truncated = self.truncated || other.truncated;
        self.soft_error = self.soft_error || other.soft_error;
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
