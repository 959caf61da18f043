//! Natural-language queries: an LLM planner turns the question into a
//! structured plan; unparseable output falls back to a broad search
//! ranked by recency × confidence.

use chrono::Utc;
use log::warn;
use std::sync::Arc;

use crate::extract::{prompts, repair_json};
use crate::graph::{GraphStore, Subgraph};
use crate::llm::{CircuitBreaker, CompletionRequest, LlmCapability, TokenBudget};
use crate::query::structured::{query_structured, QuerySpec};
use crate::storage::{EdgeFilter, Storage};

pub struct NlPlanner {
    llm: Arc<dyn LlmCapability>,
    breaker: Arc<CircuitBreaker>,
    budget: Arc<TokenBudget>,
}

impl NlPlanner {
    pub fn new(
        llm: Arc<dyn LlmCapability>,
        breaker: Arc<CircuitBreaker>,
        budget: Arc<TokenBudget>,
    ) -> Self {
        Self {
            llm,
            breaker,
            budget,
        }
    }

    /// Plan a structured query from a natural-language question.
    /// None when the planner is unavailable or its output unusable.
    pub async fn plan(&self, question: &str) -> Option<QuerySpec> {
        let request = CompletionRequest::new(prompts::nl_query_prompt(question));
        if !self.budget.charge(request.estimated_tokens()) {
            return None;
        }
        self.breaker.permit().ok()?;

        match self.llm.complete(request).await {
            Ok(text) => {
                self.breaker.record_success();
                let value = repair_json(&text)?;
                let spec: QuerySpec = serde_json::from_value(value).ok()?;
                if spec.entities.is_empty() && spec.relations.is_empty() {
                    return None;
                }
                Some(spec)
            }
            Err(e) => {
                self.breaker.record_failure();
                warn!("NL query planning failed: {}", e);
                None
            }
        }
    }
}

/// Execute an NL query: plan, run, or fall back to the broad search.
pub async fn query_natural<S: Storage>(
    planner: &NlPlanner,
    store: &Arc<GraphStore<S>>,
    question: &str,
) -> (Subgraph, Option<QuerySpec>) {
    match planner.plan(question).await {
        Some(spec) => {
            let subgraph = query_structured(store, &spec);
            (subgraph, Some(spec))
        }
        None => (broad_search(store, 50), None),
    }
}

/// Whole-graph fallback: top edges by recency × confidence, plus their
/// endpoints.
pub fn broad_search<S: Storage>(store: &Arc<GraphStore<S>>, limit: usize) -> Subgraph {
    let edges = match store.edges(EdgeFilter::new()) {
        Ok(edges) => edges,
        Err(e) => {
            warn!("broad search degraded to empty: {}", e);
            return Subgraph::soft_error();
        }
    };

    let now = Utc::now();
    let mut ranked: Vec<_> = edges
        .into_iter()
        .map(|edge| {
            let age_days = (now - edge.last_reinforced).num_hours() as f32 / 24.0;
            let recency = 1.0 / (1.0 + age_days / 30.0);
            let score = recency * edge.confidence;
            (score, edge)
        })
        .collect();
    ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(limit);

    let mut subgraph = Subgraph::new();
    for (_, edge) in ranked {
        for id in [edge.source, edge.target] {
            if !subgraph.nodes.contains_key(&id) {
                if let Ok(Some(node)) = store.get_node(id) {
                    subgraph.nodes.insert(id, node);
                }
            }
        }
        subgraph.edges.push(edge);
    }
    subgraph
}
