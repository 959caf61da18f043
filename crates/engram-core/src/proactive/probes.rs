//! Probe generation: on every graph mutation, look for knowledge gaps
//! the new knowledge opened, synthesize a question for each, and queue
//! it for context-gated delivery.

use chrono::{Duration, Utc};
use log::{debug, warn};
use std::sync::Arc;

use crate::bus::GraphEvent;
use crate::config::ProbingConfig;
use crate::error::Result;
use crate::extract::{prompts, repair_json};
use crate::graph::GraphStore;
use crate::llm::{CircuitBreaker, CompletionRequest, LlmCapability, TokenBudget};
use crate::queue::{ItemKind, ItemState, OutboundItem, OutboundQueue, Subtype};
use crate::storage::{EdgeFilter, Storage};
use crate::types::{case_fold, Edge, Node, NodeKind};

/// Relations that express a preference; a person with none of them in a
/// live topic is a gap worth probing.
const PREFERENCE_RELATIONS: &[&str] = &["prefers", "likes", "loves", "dislikes"];

/// A detected gap: a person active in a topic with no recorded
/// preferences there.
#[derive(Debug, Clone)]
pub struct KnowledgeGap {
    pub person: String,
    pub topic: String,
}

pub struct ProbeGenerator<S: Storage> {
    store: Arc<GraphStore<S>>,
    outbound: Arc<OutboundQueue>,
    llm: Arc<dyn LlmCapability>,
    breaker: Arc<CircuitBreaker>,
    budget: Arc<TokenBudget>,
    config: ProbingConfig,
}

impl<S: Storage> ProbeGenerator<S> {
    pub fn new(
        store: Arc<GraphStore<S>>,
        outbound: Arc<OutboundQueue>,
        llm: Arc<dyn LlmCapability>,
        breaker: Arc<CircuitBreaker>,
        budget: Arc<TokenBudget>,
        config: ProbingConfig,
    ) -> Self {
        Self {
            store,
            outbound,
            llm,
            breaker,
            budget,
            config,
        }
    }

    /// React to one graph mutation. Only added edges open gaps.
    pub async fn on_graph_event(&self, event: &GraphEvent) -> Result<usize> {
        let edge = match event {
            GraphEvent::EdgeAdded(edge) => edge,
            _ => return Ok(0),
        };
        if edge.context_tags.is_empty() {
            return Ok(0);
        }

        let gaps = self.detect_gaps(edge)?;
        let mut generated = 0;
        for gap in gaps {
            if self.already_probing(&gap)? {
                continue;
            }
            let question = self.synthesize_question(&gap).await;
            let mut probe = OutboundItem::new(
                ItemKind::Probe,
                Subtype::PreferenceDiscovery,
                0.6,
                question,
                format!("no {} preferences recorded for {}", gap.topic, gap.person),
            );
            probe.context_tags = vec![gap.topic.clone()];
            probe.entities = vec![gap.person.clone()];
            probe.min_turn = self.config.min_turn;
            probe.latest = Utc::now() + Duration::days(14);
            self.outbound.push(probe)?;
            generated += 1;
        }
        if generated > 0 {
            debug!("probe generator: queued {} probes", generated);
        }
        Ok(generated)
    }

    /// Persons touched by the new edge's topics with no preference
    /// edge in any of those topics.
    fn detect_gaps(&self, edge: &Edge) -> Result<Vec<KnowledgeGap>> {
        let mut gaps = Vec::new();
        let mut persons: Vec<Node> = Vec::new();
        for id in [edge.source, edge.target] {
            if let Some(node) = self.store.get_node(id)? {
                if node.kind == NodeKind::Person {
                    persons.push(node);
                }
            }
        }

        for person in persons {
            let outgoing = self
                .store
                .edges(EdgeFilter::new().with_source(person.id))?;
            for topic in &edge.context_tags {
                let covered = outgoing.iter().any(|e| {
                    PREFERENCE_RELATIONS.contains(&e.relation.as_str())
                        && e.context_tags.iter().any(|t| case_fold(t) == case_fold(topic))
                });
                if !covered {
                    gaps.push(KnowledgeGap {
                        person: person.name.clone(),
                        topic: topic.clone(),
                    });
                }
            }
        }
        Ok(gaps)
    }

    /// One open probe per (person, topic).
    fn already_probing(&self, gap: &KnowledgeGap) -> Result<bool> {
        // The queue is small; a scan through queued probes is fine.
        let queued = self.outbound.queued_count()?;
        if queued == 0 {
            return Ok(false);
        }
        Ok(self.outbound_items_matching(gap)?)
    }

    fn outbound_items_matching(&self, gap: &KnowledgeGap) -> Result<bool> {
        for item in self.outbound_snapshot()? {
            if item.state != ItemState::Queued || item.kind != ItemKind::Probe {
                continue;
            }
            let same_person = item
                .entities
                .iter()
                .any(|e| case_fold(e) == case_fold(&gap.person));
            let same_topic = item
                .context_tags
                .iter()
                .any(|t| case_fold(t) == case_fold(&gap.topic));
            if same_person && same_topic {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn outbound_snapshot(&self) -> Result<Vec<OutboundItem>> {
        self.outbound.snapshot()
    }

    /// Ask the large model for a natural question; fall back to a
    /// template when it is unavailable or unparseable.
    async fn synthesize_question(&self, gap: &KnowledgeGap) -> String {
        let fallback = format!(
            "Does {} have any favorites when it comes to {}?",
            gap.person, gap.topic
        );

        let description = format!(
            "{} comes up in conversations about {}, but no preferences are recorded",
            gap.person, gap.topic
        );
        let request = CompletionRequest::new(prompts::probe_prompt(&description));
        if !self.budget.charge(request.estimated_tokens()) {
            return fallback;
        }
        if self.breaker.permit().is_err() {
            return fallback;
        }

        match self.llm.complete(request).await {
            Ok(text) => {
                self.breaker.record_success();
                repair_json(&text)
                    .and_then(|v| {
                        v.get("question")
                            .and_then(|q| q.as_str())
                            .map(|s| s.to_string())
                    })
                    .unwrap_or(fallback)
            }
            Err(e) => {
                self.breaker.record_failure();
                warn!("probe synthesis failed, using template: {}", e);
                fallback
            }
        }
    }
}
