//! Nightly inference cycle: walk 2-hop patterns and ask the large model
//! to hypothesize relations the graph implies but does not state.
//! Candidates land at inferential base confidence, capped per cycle.

use log::{debug, info};
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditKind, AuditLog, Component};
use crate::config::{ConfidenceConfig, ExtractionConfig, ScheduleConfig};
use crate::error::Result;
use crate::extract::{prompts, repair_json};
use crate::graph::{GraphStore, NewEdge};
use crate::llm::{CircuitBreaker, CompletionRequest, LlmCapability, TokenBudget};
use crate::storage::{EdgeFilter, NodeFilter, Storage};
use crate::types::{Edge, NodeKind, PrivacyLevel, Provenance, Relation};

#[derive(Debug, Default, Clone, Copy)]
pub struct InferenceReport {
    pub paths_examined: usize,
    pub candidates: usize,
    pub emitted: usize,
}

pub struct InferenceWorker<S: Storage> {
    store: Arc<GraphStore<S>>,
    audit: Arc<AuditLog>,
    llm: Arc<dyn LlmCapability>,
    breaker: Arc<CircuitBreaker>,
    budget: Arc<TokenBudget>,
    confidence: ConfidenceConfig,
    extraction: ExtractionConfig,
    schedule: ScheduleConfig,
}

impl<S: Storage> InferenceWorker<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<GraphStore<S>>,
        audit: Arc<AuditLog>,
        llm: Arc<dyn LlmCapability>,
        breaker: Arc<CircuitBreaker>,
        budget: Arc<TokenBudget>,
        confidence: ConfidenceConfig,
        extraction: ExtractionConfig,
        schedule: ScheduleConfig,
    ) -> Self {
        Self {
            store,
            audit,
            llm,
            breaker,
            budget,
            confidence,
            extraction,
            schedule,
        }
    }

    pub async fn run_once(&self) -> Result<InferenceReport> {
        let correlation = Uuid::now_v7();
        let mut report = InferenceReport::default();

        if !self.extraction.indirect_inference {
            debug!("inference cycle skipped: indirect inference disabled");
            return Ok(report);
        }

        'outer: for (first, second) in self.two_hop_paths()? {
            if report.emitted >= self.schedule.inference_cap_per_cycle {
                break;
            }
            report.paths_examined += 1;

            let Some(description) = self.describe_path(&first, &second)? else {
                continue;
            };

            let request = CompletionRequest::new(prompts::inference_prompt(&description));
            if !self.budget.charge(request.estimated_tokens()) {
                // Budget exhausted: skip the rest of the cycle.
                break 'outer;
            }
            if self.breaker.permit().is_err() {
                break 'outer;
            }

            let response = match self.llm.complete(request).await {
                Ok(text) => {
                    self.breaker.record_success();
                    text
                }
                Err(_) => {
                    self.breaker.record_failure();
                    continue;
                }
            };

            let Some(value) = repair_json(&response) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            report.candidates += 1;

            if self.emit_candidate(correlation, &value, &first, &second)? {
                report.emitted += 1;
            }
        }

        self.audit.log(
            AuditEntry::new(
                correlation,
                AuditKind::InferenceCycleCompleted,
                Component::InferenceWorker,
            )
            .with_reasoning(format!(
                "examined {}, candidates {}, emitted {}",
                report.paths_examined, report.candidates, report.emitted
            )),
        )?;
        info!(
            "inference cycle: examined {}, emitted {}",
            report.paths_examined, report.emitted
        );
        Ok(report)
    }

    /// A -r1-> B -r2-> C paths over inference-eligible nodes.
    fn two_hop_paths(&self) -> Result<Vec<(Edge, Edge)>> {
        let mut paths = Vec::new();
        let nodes = self.store.find_nodes(NodeFilter::new())?;
        for node in nodes {
            if !node.kind.participates_in_inference() {
                continue;
            }
            let first_hops = self.store.edges(EdgeFilter::new().with_source(node.id))?;
            for first in first_hops {
                let second_hops = self
                    .store
                    .edges(EdgeFilter::new().with_source(first.target))?;
                for second in second_hops {
                    if second.target == first.source {
                        continue;
                    }
                    paths.push((first.clone(), second));
                }
            }
        }
        Ok(paths)
    }

    fn describe_path(&self, first: &Edge, second: &Edge) -> Result<Option<String>> {
        let Some(a) = self.store.get_node(first.source)? else {
            return Ok(None);
        };
        let Some(b) = self.store.get_node(first.target)? else {
            return Ok(None);
        };
        let Some(c) = self.store.get_node(second.target)? else {
            return Ok(None);
        };
        Ok(Some(format!(
            "- {} {} {}\n- {} {} {}",
            a.name,
            first.relation.as_str().replace('_', " "),
            b.name,
            b.name,
            second.relation.as_str().replace('_', " "),
            c.name
        )))
    }

    /// Validate and write one hypothesized relation. The candidate
    /// inherits provenance from the path's episodes.
    fn emit_candidate(
        &self,
        correlation: Uuid,
        value: &serde_json::Value,
        first: &Edge,
        second: &Edge,
    ) -> Result<bool> {
        let Some(subject_name) = value.get("subject").and_then(|v| v.as_str()) else {
            return Ok(false);
        };
        let Some(object_name) = value.get("object").and_then(|v| v.as_str()) else {
            return Ok(false);
        };
        let Some(relation) = value
            .get("relation")
            .and_then(|v| v.as_str())
            .and_then(|r| Relation::new(&r.trim().to_lowercase()).ok())
        else {
            return Ok(false);
        };

        let Some(subject) = self.store.resolve_alias(subject_name)? else {
            // Inference never invents nodes; both endpoints must exist.
            return Ok(false);
        };
        let Some(object) = self.store.resolve_alias(object_name)? else {
            return Ok(false);
        };
        if subject == object {
            return Ok(false);
        }

        // Already known: nothing to add.
        let existing = self
            .store
            .storage()
            .edges_between(subject, object)?
            .into_iter()
            .any(|e| e.relation == relation && !e.retracted);
        if existing {
            return Ok(false);
        }

        // The inferred edge's provenance chain is the supporting path.
        let episode = first
            .source_episodes
            .first()
            .or_else(|| second.source_episodes.first())
            .copied();
        let Some(episode) = episode else {
            return Ok(false);
        };

        let reasoning = value
            .get("reasoning")
            .and_then(|v| v.as_str())
            .unwrap_or("implied by a 2-hop path")
            .to_string();

        let mut tags = first.context_tags.clone();
        for tag in &second.context_tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }

        let edge = self.store.create_edge(
            correlation,
            NewEdge {
                source: subject,
                target: object,
                relation,
                temporal: crate::types::TemporalType::State,
                confidence: self.confidence.base_inferential,
                provenance: Provenance::Inferential,
                context_tags: tags,
                episode: Some(episode),
                expiry: None,
                refines: None,
            },
        )?;
        self.audit.log(
            AuditEntry::new(correlation, AuditKind::EdgeInserted, Component::InferenceWorker)
                .with_target(edge.id)
                .with_mechanism(Provenance::Inferential)
                .with_reasoning(reasoning),
        )?;
        Ok(true)
    }
}
