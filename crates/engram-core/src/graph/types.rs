use crate::types::{NodeId, NodeKind, Relation};

/// Request for graph traversal
#[derive(Debug, Clone)]
pub struct TraversalRequest {
    /// Starting node(s). Can start from multiple seeds.
    pub seeds: Vec<NodeId>,

    /// Maximum hops from a seed. 0 = seeds only (plus the edges
    /// between them).
    pub max_hops: u32,

    /// Only follow edges with these relation types. None = all.
    pub relation_filter: Option<Vec<Relation>>,

    /// Only include nodes of these kinds in results. None = all.
    /// Filtering doesn't stop traversal — a filtered-out node is still
    /// traversed through, just not returned.
    pub kind_filter: Option<Vec<NodeKind>>,

    /// Minimum edge confidence to follow.
    pub min_confidence: Option<f32>,

    /// Audit paths only: traverse retracted/archived/expired edges too.
    pub include_inactive: bool,

    /// Maximum number of nodes to return. None = no limit.
    pub limit: Option<usize>,

    /// Whether to include the seed nodes in results.
    pub include_seeds: bool,
}

impl Default for TraversalRequest {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            max_hops: 2,
            relation_filter: None,
            kind_filter: None,
            min_confidence: None,
            include_inactive: false,
            limit: None,
            include_seeds: true,
        }
    }
}

/// Budget circuit breakers for traversal
#[derive(Debug, Clone)]
pub struct TraversalBudget {
    /// Maximum nodes to visit before aborting
    pub max_visited: usize,

    /// Maximum time in milliseconds
    pub max_time_ms: u64,

    /// Maximum nodes at a single depth level
    pub max_nodes_per_level: usize,
}

impl Default for TraversalBudget {
    fn default() -> Self {
        Self {
            max_visited: 10_000,
            max_time_ms: 5_000,
            max_nodes_per_level: 1_000,
        }
    }
}
