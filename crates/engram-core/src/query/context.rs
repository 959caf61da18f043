//! Context-block assembly: a compact, ranked description of what the
//! graph knows about the entities and topics currently in play, capped
//! by a token budget. Cached against the graph version.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::graph::GraphStore;
use crate::queue::{ItemKind, ItemState, OutboundQueue};
use crate::storage::{EdgeFilter, Storage};
use crate::types::{case_fold, Edge, TemporalType};

/// Rough chars-per-token for budget accounting.
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBlock {
    pub sections: Vec<EntitySection>,
    /// Pending probes whose tags match the active topics.
    pub pending_probes: Vec<String>,
    /// Wishes and bounded facts expiring soon.
    pub reminders: Vec<String>,
    pub estimated_tokens: usize,
    /// True when served from cache at an unchanged graph version.
    #[serde(default)]
    pub cached: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySection {
    pub entity: String,
    pub facts: Vec<String>,
}

struct CacheEntry {
    version: u64,
    key: String,
    block: ContextBlock,
}

pub struct ContextAssembler<S: Storage> {
    store: Arc<GraphStore<S>>,
    outbound: Arc<OutboundQueue>,
    cache: Mutex<Option<CacheEntry>>,
}

impl<S: Storage> ContextAssembler<S> {
    pub fn new(store: Arc<GraphStore<S>>, outbound: Arc<OutboundQueue>) -> Self {
        Self {
            store,
            outbound,
            cache: Mutex::new(None),
        }
    }

    /// relevance = 0.40 × entity match + 0.25 × topic match +
    /// 0.20 × confidence + 0.15 × recency.
    pub fn assemble(
        &self,
        active_entities: &[String],
        active_topics: &[String],
        token_budget: usize,
    ) -> ContextBlock {
        let version = self.store.version();
        let key = cache_key(active_entities, active_topics, token_budget);
        {
            let cache = self.cache.lock().unwrap();
            if let Some(entry) = cache.as_ref() {
                if entry.version == version && entry.key == key {
                    let mut block = entry.block.clone();
                    block.cached = true;
                    return block;
                }
            }
        }

        let block = self.build(active_entities, active_topics, token_budget);
        *self.cache.lock().unwrap() = Some(CacheEntry {
            version,
            key,
            block: block.clone(),
        });
        block
    }

    fn build(
        &self,
        active_entities: &[String],
        active_topics: &[String],
        token_budget: usize,
    ) -> ContextBlock {
        let now = Utc::now();
        let topics: Vec<String> = active_topics.iter().map(|t| case_fold(t)).collect();
        let mut budget_chars = token_budget.saturating_mul(CHARS_PER_TOKEN);
        let mut sections = Vec::new();
        let mut seen_edges: HashSet<uuid::Uuid> = HashSet::new();

        for entity_name in active_entities {
            let Ok(Some(node_id)) = self.store.resolve_alias(entity_name) else {
                continue;
            };
            let Ok(Some(node)) = self.store.get_node(node_id) else {
                continue;
            };

            let mut scored: Vec<(f32, Edge)> = Vec::new();
            let mut edges = self
                .store
                .edges(EdgeFilter::new().with_source(node_id))
                .unwrap_or_default();
            edges.extend(
                self.store
                    .edges(EdgeFilter::new().with_target(node_id))
                    .unwrap_or_default(),
            );

            for edge in edges {
                if !seen_edges.insert(edge.id) {
                    continue;
                }
                let topic_match = if topics.is_empty() {
                    0.0
                } else {
                    let hits = edge
                        .context_tags
                        .iter()
                        .filter(|t| topics.contains(&case_fold(t)))
                        .count();
                    hits as f32 / topics.len() as f32
                };
                let age_days = (now - edge.last_reinforced).num_hours() as f32 / 24.0;
                let recency = 1.0 / (1.0 + age_days / 30.0);
                let score =
                    0.40 * 1.0 + 0.25 * topic_match + 0.20 * edge.confidence + 0.15 * recency;
                scored.push((score, edge));
            }

            scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

            let mut facts = Vec::new();
            for (_, edge) in scored {
                let Some(line) = self.render_fact(&edge) else {
                    continue;
                };
                if line.len() > budget_chars {
                    break;
                }
                budget_chars -= line.len();
                facts.push(line);
            }

            if !facts.is_empty() {
                sections.push(EntitySection {
                    entity: node.name,
                    facts,
                });
            }
        }

        let pending_probes = self.matching_probes(&topics);
        let reminders = self.upcoming_reminders(now);
        let used_chars: usize = sections
            .iter()
            .flat_map(|s| s.facts.iter())
            .map(|f| f.len())
            .sum::<usize>()
            + pending_probes.iter().map(|p| p.len()).sum::<usize>()
            + reminders.iter().map(|r| r.len()).sum::<usize>();

        ContextBlock {
            sections,
            pending_probes,
            reminders,
            estimated_tokens: used_chars / CHARS_PER_TOKEN,
            cached: false,
        }
    }

    fn render_fact(&self, edge: &Edge) -> Option<String> {
        let source = self.store.get_node(edge.source).ok()??;
        let target = self.store.get_node(edge.target).ok()??;
        Some(format!(
            "{} {} {} ({:.2})",
            source.name,
            edge.relation.as_str().replace('_', " "),
            target.name,
            edge.confidence
        ))
    }

    fn matching_probes(&self, topics: &[String]) -> Vec<String> {
        let Ok(items) = self.outbound.snapshot() else {
            return Vec::new();
        };
        items
            .into_iter()
            .filter(|item| {
                item.kind == ItemKind::Probe
                    && item.state == ItemState::Queued
                    && (topics.is_empty()
                        || item
                            .context_tags
                            .iter()
                            .any(|t| topics.contains(&case_fold(t))))
            })
            .map(|item| item.payload)
            .collect()
    }

    fn upcoming_reminders(&self, now: chrono::DateTime<Utc>) -> Vec<String> {
        let Ok(edges) = self.store.edges(EdgeFilter::new()) else {
            return Vec::new();
        };
        edges
            .into_iter()
            .filter(|edge| {
                edge.temporal == TemporalType::Wish
                    && edge
                        .expiry
                        .map_or(false, |e| e > now && e <= now + Duration::days(7))
            })
            .filter_map(|edge| {
                let source = self.store.get_node(edge.source).ok()??;
                let target = self.store.get_node(edge.target).ok()??;
                Some(format!(
                    "{} {} {} — expires {}",
                    source.name,
                    edge.relation.as_str().replace('_', " "),
                    target.name,
                    edge.expiry.unwrap().format("%Y-%m-%d")
                ))
            })
            .collect()
    }
}

fn cache_key(entities: &[String], topics: &[String], budget: usize) -> String {
    let mut entities: Vec<String> = entities.iter().map(|e| case_fold(e)).collect();
    entities.sort();
    let mut topics: Vec<String> = topics.iter().map(|t| case_fold(t)).collect();
    topics.sort();
    format!("{}|{}|{}", entities.join(","), topics.join(","), budget)
}
