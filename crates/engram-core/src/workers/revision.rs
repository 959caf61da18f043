//! Nightly revision cycle: sample public facts whose last verification
//! exceeds the TTL and check them against an external verifier
//! capability. Unchanged facts are reinforced, changed ones revised.
//! Budget-bounded per cycle.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::info;
use rand::seq::SliceRandom;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditKind, AuditLog, Component};
use crate::config::{ConfidenceConfig, ScheduleConfig};
use crate::confidence;
use crate::error::Result;
use crate::graph::GraphStore;
use crate::storage::{EdgeFilter, Storage};
use crate::types::{Edge, NodeKind, PrivacyLevel, RetractionReason};

/// What the external verifier concluded about a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Unchanged,
    Changed { new_value: String },
    Unknown,
}

/// External fact-verification capability. Out of scope beyond this
/// contract; tests script it.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, statement: &str) -> Result<Verdict>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RevisionReport {
    pub sampled: usize,
    pub reinforced: usize,
    pub revised: usize,
    pub unknown: usize,
}

pub struct RevisionWorker<S: Storage> {
    store: Arc<GraphStore<S>>,
    audit: Arc<AuditLog>,
    verifier: Arc<dyn Verifier>,
    confidence: ConfidenceConfig,
    schedule: ScheduleConfig,
}

impl<S: Storage> RevisionWorker<S> {
    pub fn new(
        store: Arc<GraphStore<S>>,
        audit: Arc<AuditLog>,
        verifier: Arc<dyn Verifier>,
        confidence: ConfidenceConfig,
        schedule: ScheduleConfig,
    ) -> Self {
        Self {
            store,
            audit,
            verifier,
            confidence,
            schedule,
        }
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<RevisionReport> {
        let correlation = Uuid::now_v7();
        let mut report = RevisionReport::default();

        let due = self.due_edges(now)?;
        for edge in due {
            report.sampled += 1;

            let Some(statement) = self.render_statement(&edge)? else {
                continue;
            };
            match self.verifier.verify(&statement).await {
                Ok(Verdict::Unchanged) => {
                    let boosted = confidence::reinforce(&self.confidence, edge.confidence);
                    // Verification is not an episode; reuse the edge's own
                    // provenance trail.
                    if let Some(episode) = edge.source_episodes.first() {
                        self.store
                            .reinforce_edge(correlation, edge.id, boosted, *episode)?;
                        report.reinforced += 1;
                    }
                }
                Ok(Verdict::Changed { new_value }) => {
                    let object = self.store.upsert_node(
                        correlation,
                        NodeKind::Concept,
                        &new_value,
                        &[],
                        &[],
                        PrivacyLevel::L0Public,
                    )?;
                    self.store.revise_edge(
                        correlation,
                        edge.id,
                        object,
                        self.confidence.base_observational,
                        edge.source_episodes.first().copied(),
                        RetractionReason::VerificationFailed,
                    )?;
                    report.revised += 1;
                }
                Ok(Verdict::Unknown) | Err(_) => {
                    report.unknown += 1;
                }
            }
        }

        self.audit.log(
            AuditEntry::new(
                correlation,
                AuditKind::RevisionCycleCompleted,
                Component::RevisionWorker,
            )
            .with_reasoning(format!(
                "sampled {}, reinforced {}, revised {}, unknown {}",
                report.sampled, report.reinforced, report.revised, report.unknown
            )),
        )?;
        info!(
            "revision cycle: sampled {}, reinforced {}, revised {}",
            report.sampled, report.reinforced, report.revised
        );
        Ok(report)
    }

    /// Public facts past the verification TTL, sampled within the cycle
    /// budget.
    fn due_edges(&self, now: DateTime<Utc>) -> Result<Vec<Edge>> {
        let ttl = Duration::days(self.schedule.revision_ttl_days);
        let mut due = Vec::new();
        for edge in self.store.edges(EdgeFilter::new())? {
            if now - edge.last_reinforced < ttl {
                continue;
            }
            let source_public = self
                .store
                .get_node(edge.source)?
                .map(|n| n.privacy <= PrivacyLevel::L1Platform)
                .unwrap_or(false);
            let target_public = self
                .store
                .get_node(edge.target)?
                .map(|n| n.privacy <= PrivacyLevel::L1Platform)
                .unwrap_or(false);
            if source_public && target_public {
                due.push(edge);
            }
        }

        due.shuffle(&mut rand::thread_rng());
        due.truncate(self.schedule.revision_budget_per_cycle);
        Ok(due)
    }

    fn render_statement(&self, edge: &Edge) -> Result<Option<String>> {
        let Some(source) = self.store.get_node(edge.source)? else {
            return Ok(None);
        };
        let Some(target) = self.store.get_node(edge.target)? else {
            return Ok(None);
        };
        Ok(Some(format!(
            "{} {} {}",
            source.name,
            edge.relation.as_str().replace('_', " "),
            target.name
        )))
    }
}
