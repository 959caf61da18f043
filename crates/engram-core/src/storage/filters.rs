use crate::types::{NodeId, NodeKind, Relation};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Filter criteria for querying nodes
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub kind: Option<NodeKind>,
    /// Case-insensitive substring match on canonical name.
    pub name_contains: Option<String>,
    /// Case-folded substring match against any alias.
    pub alias_contains: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl NodeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kind(mut self, kind: NodeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_name_contains(mut self, fragment: impl Into<String>) -> Self {
        self.name_contains = Some(fragment.into());
        self
    }

    pub fn with_alias_contains(mut self, fragment: impl Into<String>) -> Self {
        self.alias_contains = Some(fragment.into());
        self
    }

    pub fn created_after(mut self, time: DateTime<Utc>) -> Self {
        self.created_after = Some(time);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Filter criteria for querying edges
#[derive(Debug, Clone, Default)]
pub struct EdgeFilter {
    pub source: Option<NodeId>,
    pub target: Option<NodeId>,
    pub relation: Option<Relation>,
    pub min_confidence: Option<f32>,
    /// Audit paths only: include retracted, archived, and expired edges.
    pub include_inactive: bool,
    pub limit: Option<usize>,
}

impl EdgeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, id: NodeId) -> Self {
        self.source = Some(id);
        self
    }

    pub fn with_target(mut self, id: NodeId) -> Self {
        self.target = Some(id);
        self
    }

    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relation = Some(relation);
        self
    }

    pub fn with_min_confidence(mut self, min: f32) -> Self {
        self.min_confidence = Some(min);
        self
    }

    pub fn include_inactive(mut self) -> Self {
        self.include_inactive = true;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    pub node_count: u64,
    pub edge_count: u64,
    pub episode_count: u64,
    pub node_counts_by_kind: HashMap<NodeKind, u64>,
    pub edge_counts_by_relation: HashMap<Relation, u64>,
    pub active_edge_count: u64,
    pub retracted_edge_count: u64,
    pub archived_edge_count: u64,
}
