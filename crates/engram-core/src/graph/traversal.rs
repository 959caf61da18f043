use crate::error::Result;
use crate::graph::{Subgraph, TraversalBudget, TraversalRequest};
use crate::storage::Storage;
use crate::types::{Edge, NodeId};
use chrono::Utc;
use std::collections::{HashSet, VecDeque};
use std::time::Instant;

/// Breadth-first traversal with per-level filtering. Expansion order at
/// each node follows the query tie-break: descending confidence, then
/// ascending first_observed.
pub fn traverse<S: Storage>(
    storage: &S,
    request: TraversalRequest,
    budget: &TraversalBudget,
) -> Result<Subgraph> {
    let start_time = Instant::now();
    let now = Utc::now();
    let mut result = Subgraph::new();
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    let mut candidate_edges: Vec<Edge> = Vec::new();

    for node_id in &request.seeds {
        queue.push_back((*node_id, 0u32));
        visited.insert(*node_id);
    }

    while let Some((current_id, depth)) = queue.pop_front() {
        if result.visited_count >= budget.max_visited {
            result.truncated = true;
            break;
        }
        if start_time.elapsed().as_millis() > budget.max_time_ms as u128 {
            result.truncated = true;
            break;
        }

        result.visited_count += 1;

        let current_node = match storage.get_node(current_id)? {
            Some(node) => node,
            None => continue,
        };

        let should_include = if depth == 0 && !request.include_seeds {
            false
        } else {
            match &request.kind_filter {
                Some(kinds) => kinds.contains(&current_node.kind),
                None => true,
            }
        };

        if should_include {
            result.nodes.insert(current_id, current_node.clone());
            result.depths.insert(current_id, depth);

            if let Some(limit) = request.limit {
                if result.nodes.len() >= limit {
                    result.truncated = true;
                    break;
                }
            }
        }

        if depth >= request.max_hops {
            // Still collect edges between already-visited nodes at the
            // boundary so a 0-hop query returns the edges between seeds.
            for edge in edges_for(storage, current_id)? {
                if passes_filters(&edge, &request, now) {
                    candidate_edges.push(edge);
                }
            }
            continue;
        }

        let mut edges = edges_for(storage, current_id)?;
        order_edges(&mut edges);

        // Per-level circuit breaker.
        let next_level_count = queue.iter().filter(|(_, d)| *d == depth + 1).count();
        if next_level_count >= budget.max_nodes_per_level {
            result.truncated = true;
            break;
        }

        for edge in edges {
            if !passes_filters(&edge, &request, now) {
                continue;
            }

            let next_id = if edge.source == current_id {
                edge.target
            } else {
                edge.source
            };

            if !visited.contains(&next_id) {
                visited.insert(next_id);
                queue.push_back((next_id, depth + 1));
            }

            candidate_edges.push(edge);
        }
    }

    // Only include edges whose endpoints both made it into the result,
    // deduplicated (an edge is reachable from both ends).
    let mut seen = HashSet::new();
    result.edges = candidate_edges
        .into_iter()
        .filter(|e| {
            result.nodes.contains_key(&e.source)
                && result.nodes.contains_key(&e.target)
                && seen.insert(e.id)
        })
        .collect();
    order_edges(&mut result.edges);

    Ok(result)
}

fn edges_for<S: Storage>(storage: &S, node_id: NodeId) -> Result<Vec<Edge>> {
    let mut edges = storage.edges_from(node_id)?;
    edges.extend(storage.edges_to(node_id)?);
    Ok(edges)
}

fn passes_filters(edge: &Edge, request: &TraversalRequest, now: chrono::DateTime<Utc>) -> bool {
    if !request.include_inactive && !edge.is_active(now) {
        return false;
    }
    if let Some(ref relations) = request.relation_filter {
        if !relations.contains(&edge.relation) {
            return false;
        }
    }
    if let Some(min) = request.min_confidence {
        if edge.confidence < min {
            return false;
        }
    }
    true
}

/// Descending confidence, ties broken by ascending first_observed.
fn order_edges(edges: &mut [Edge]) {
    edges.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.first_observed.cmp(&b.first_observed))
    });
}
