//! Structured subgraph queries: BFS from entity seeds with relation and
//! confidence filters. A degraded store yields an empty subgraph with a
//! soft-error marker, never an error to the agent.

use log::warn;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::graph::{GraphStore, Subgraph, TraversalRequest};
use crate::storage::Storage;
use crate::types::Relation;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QuerySpec {
    /// Seed entities, by name or alias. Empty seeds return an empty
    /// subgraph (a cold graph is not an error).
    #[serde(default)]
    pub entities: Vec<String>,
    /// Relation names to follow. Empty = all.
    #[serde(default)]
    pub relations: Vec<String>,
    #[serde(default)]
    pub min_confidence: Option<f32>,
    #[serde(default = "default_hops")]
    pub max_hops: u32,
}

fn default_hops() -> u32 {
    2
}

pub fn query_structured<S: Storage>(store: &Arc<GraphStore<S>>, spec: &QuerySpec) -> Subgraph {
    match run(store, spec) {
        Ok(subgraph) => subgraph,
        Err(e) => {
            warn!("structured query degraded to empty: {}", e);
            Subgraph::soft_error()
        }
    }
}

fn run<S: Storage>(
    store: &Arc<GraphStore<S>>,
    spec: &QuerySpec,
) -> crate::error::Result<Subgraph> {
    let mut seeds = Vec::new();
    for name in &spec.entities {
        if let Some(id) = store.resolve_alias(name)? {
            seeds.push(id);
        }
    }
    if seeds.is_empty() {
        return Ok(Subgraph::new());
    }

    let relation_filter = if spec.relations.is_empty() {
        None
    } else {
        Some(
            spec.relations
                .iter()
                .filter_map(|r| Relation::new(r).ok())
                .collect::<Vec<_>>(),
        )
    };

    store.traverse(TraversalRequest {
        seeds,
        max_hops: spec.max_hops,
        relation_filter,
        min_confidence: spec.min_confidence,
        ..Default::default()
    })
}
