//! The graph diff engine: classifies each proposed fact as INSERT /
//! REINFORCE / CONTRADICT / SKIP / MERGE and applies it through the
//! graph store. Runs inside the single writer; one interaction's ops
//! apply as a group against one episode record.

use chrono::Utc;
use log::debug;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditKind, AuditLog, Component, OpKind};
use crate::config::ConfidenceConfig;
use crate::confidence;
use crate::error::Result;
use crate::extract::{ProposedFact, ProposedOp, ProposedRetraction};
use crate::graph::{GraphStore, NewEdge};
use crate::queue::{ItemKind, OutboundItem, OutboundQueue, Subtype};
use crate::relations::is_single_valued;
use crate::storage::Storage;
use crate::types::{
    Edge, Episode, NodeId, NodeKind, PrivacyLevel, Provenance, RetractionReason,
};

/// What one application changed, by classification.
#[derive(Debug, Default, Clone)]
pub struct AppliedDelta {
    pub episode_id: Option<Uuid>,
    pub inserted: usize,
    pub reinforced: usize,
    pub revised: usize,
    pub merged: usize,
    pub skipped: usize,
    pub retracted: usize,
    /// Contradictions below the revision margin become verification
    /// probes instead of rewrites.
    pub probes_emitted: usize,
}

impl AppliedDelta {
    pub fn mutation_count(&self) -> usize {
        self.inserted + self.reinforced + self.revised + self.merged + self.retracted
    }
}

pub struct DiffEngine<S: Storage> {
    store: Arc<GraphStore<S>>,
    audit: Arc<AuditLog>,
    outbound: Arc<OutboundQueue>,
    confidence: ConfidenceConfig,
}

impl<S: Storage> DiffEngine<S> {
    pub fn new(
        store: Arc<GraphStore<S>>,
        audit: Arc<AuditLog>,
        outbound: Arc<OutboundQueue>,
        confidence: ConfidenceConfig,
    ) -> Self {
        Self {
            store,
            audit,
            outbound,
            confidence,
        }
    }

    /// Apply one interaction's proposed operations as a group. The
    /// episode is recorded first so every created edge can point back
    /// at it. Reapplying the same group is idempotent: reinforcement
    /// checks episode membership before boosting.
    pub fn apply(
        &self,
        correlation_id: Uuid,
        mut episode: Episode,
        ops: Vec<ProposedOp>,
    ) -> Result<AppliedDelta> {
        let mut delta = AppliedDelta::default();
        if ops.is_empty() {
            return Ok(delta);
        }

        self.store.record_episode(correlation_id, &episode)?;
        delta.episode_id = Some(episode.id);

        for op in ops {
            match op {
                ProposedOp::UpsertNode(node) => {
                    self.store.upsert_node(
                        correlation_id,
                        node.kind,
                        &node.name,
                        &node.aliases,
                        &node.properties,
                        node.privacy,
                    )?;
                }
                ProposedOp::AssertFact(fact) => {
                    self.apply_fact(correlation_id, &mut episode, fact, &mut delta)?;
                }
                ProposedOp::Retract(retraction) => {
                    self.apply_retraction(correlation_id, retraction, &mut delta)?;
                }
            }
        }

        debug!(
            "diff applied: {} inserted, {} reinforced, {} revised, {} merged, {} skipped",
            delta.inserted, delta.reinforced, delta.revised, delta.merged, delta.skipped
        );
        Ok(delta)
    }

    fn apply_fact(
        &self,
        correlation_id: Uuid,
        episode: &mut Episode,
        fact: ProposedFact,
        delta: &mut AppliedDelta,
    ) -> Result<()> {
        // SKIP: below the storage floor.
        if !confidence::meets_storage_floor(&self.confidence, fact.confidence) {
            self.audit_skip(correlation_id, &fact, "below storage floor")?;
            delta.skipped += 1;
            return Ok(());
        }

        let subject = self.resolve_node(correlation_id, &fact.subject, fact.subject_kind)?;
        let object = self.resolve_node(correlation_id, &fact.object, fact.object_kind)?;

        // Same (source, target, relation): duplicate → REINFORCE.
        let existing_same = self.active_edge(subject, Some(object), &fact)?;
        if let Some(edge) = existing_same {
            // Idempotency: an episode only reinforces an edge once.
            if edge.source_episodes.contains(&episode.id) {
                delta.skipped += 1;
                return Ok(());
            }
            let boosted = confidence::reinforce(&self.confidence, edge.confidence);
            self.store
                .reinforce_edge(correlation_id, edge.id, boosted, episode.id)?;
            delta.reinforced += 1;
            return Ok(());
        }

        // Same subject+relation, different object on a single-valued
        // relation: CONTRADICT.
        if is_single_valued(&fact.relation) {
            if let Some(conflicting) = self.active_edge(subject, None, &fact)? {
                if confidence::contradict_revises(
                    &self.confidence,
                    conflicting.confidence,
                    fact.confidence,
                ) {
                    let replacement = self.store.revise_edge(
                        correlation_id,
                        conflicting.id,
                        object,
                        fact.confidence,
                        Some(episode.id),
                        RetractionReason::Superseded,
                    )?;
                    episode.edge_ids.push(replacement.id);
                    delta.revised += 1;
                } else {
                    // Not confident enough to rewrite; ask instead.
                    self.emit_verification_probe(&fact, &conflicting)?;
                    self.audit_skip(
                        correlation_id,
                        &fact,
                        "contradiction below revision margin; probe emitted",
                    )?;
                    delta.probes_emitted += 1;
                    delta.skipped += 1;
                }
                return Ok(());
            }
        }

        // MERGE: the fact refines a more general edge. Both stay; the
        // specific edge links to the general one.
        let refines_id = match &fact.refines {
            Some(general) => self.find_general_edge(general)?,
            None => None,
        };

        let mut tags = fact.context_tags.clone();
        if fact.attribution_uncertain && !tags.contains(&"attribution_uncertain".to_string()) {
            tags.push("attribution_uncertain".to_string());
        }
        if fact.secondhand && !tags.contains(&"secondhand".to_string()) {
            tags.push("secondhand".to_string());
        }

        let edge = self.store.create_edge(
            correlation_id,
            NewEdge {
                source: subject,
                target: object,
                relation: fact.relation.clone(),
                temporal: fact.temporal,
                confidence: fact.confidence,
                provenance: fact.provenance,
                context_tags: tags,
                episode: Some(episode.id),
                expiry: fact.expiry,
                refines: refines_id,
            },
        )?;
        episode.edge_ids.push(edge.id);

        if refines_id.is_some() {
            self.audit.log(
                AuditEntry::new(correlation_id, AuditKind::EdgeMerged, Component::DiffEngine)
                    .with_operation(OpKind::Merge)
                    .with_target(edge.id)
                    .with_reasoning("specific refinement of an existing general edge".to_string()),
            )?;
            delta.merged += 1;
        } else {
            delta.inserted += 1;
        }
        Ok(())
    }

    fn apply_retraction(
        &self,
        correlation_id: Uuid,
        retraction: ProposedRetraction,
        delta: &mut AppliedDelta,
    ) -> Result<()> {
        let Some(subject) = self.store.resolve_alias(&retraction.subject)? else {
            delta.skipped += 1;
            return Ok(());
        };

        let now = Utc::now();
        let edges = self.store.storage().edges_from(subject)?;
        for edge in edges {
            if !edge.is_active(now) {
                continue;
            }
            if let Some(ref relation) = retraction.relation {
                if &edge.relation != relation {
                    continue;
                }
            }
            if let Some(ref object_name) = retraction.object {
                match self.store.resolve_alias(object_name)? {
                    Some(object_id) if edge.target == object_id => {}
                    _ => continue,
                }
            }
            self.store
                .retract_edge(correlation_id, edge.id, RetractionReason::UserRequest)?;
            delta.retracted += 1;
        }
        Ok(())
    }

    /// Resolve a fact endpoint by alias, creating the node when missing.
    fn resolve_node(&self, correlation_id: Uuid, name: &str, kind: NodeKind) -> Result<NodeId> {
        if let Some(id) = self.store.resolve_alias(name)? {
            return Ok(id);
        }
        let privacy = match kind {
            NodeKind::Person | NodeKind::Preference | NodeKind::Context => {
                PrivacyLevel::L2Personal
            }
            _ => PrivacyLevel::L0Public,
        };
        self.store
            .upsert_node(correlation_id, kind, name, &[], &[], privacy)
    }

    /// The active edge matching (subject, relation) and optionally the
    /// target.
    fn active_edge(
        &self,
        subject: NodeId,
        object: Option<NodeId>,
        fact: &ProposedFact,
    ) -> Result<Option<Edge>> {
        let now = Utc::now();
        let edges = self.store.storage().edges_from(subject)?;
        Ok(edges.into_iter().find(|edge| {
            edge.is_active(now)
                && edge.relation == fact.relation
                && object.map_or(true, |o| edge.target == o)
        }))
    }

    fn find_general_edge(&self, general: &crate::extract::GeneralFact) -> Result<Option<Uuid>> {
        let Some(subject) = self.store.resolve_alias(&general.subject)? else {
            return Ok(None);
        };
        let Some(object) = self.store.resolve_alias(&general.object)? else {
            return Ok(None);
        };
        let now = Utc::now();
        Ok(self
            .store
            .storage()
            .edges_between(subject, object)?
            .into_iter()
            .find(|e| e.is_active(now) && e.relation == general.relation)
            .map(|e| e.id))
    }

    fn emit_verification_probe(&self, fact: &ProposedFact, existing: &Edge) -> Result<()> {
        let old_object = self
            .store
            .get_node(existing.target)?
            .map(|n| n.name)
            .unwrap_or_else(|| "something else".to_string());

        let mut probe = OutboundItem::new(
            ItemKind::Probe,
            Subtype::FactVerification,
            0.7,
            format!(
                "Last time we discussed {}'s {} you said {} — has that changed?",
                fact.subject, fact.relation, old_object
            ),
            format!(
                "new value '{}' at {:.2} does not clear the revision margin over {:.2}",
                fact.object, fact.confidence, existing.confidence
            ),
        );
        probe.context_tags = existing.context_tags.clone();
        probe.entities = vec![fact.subject.clone()];
        self.outbound.push(probe)?;
        Ok(())
    }

    fn audit_skip(&self, correlation_id: Uuid, fact: &ProposedFact, reason: &str) -> Result<()> {
        self.audit.log(
            AuditEntry::new(correlation_id, AuditKind::EdgeSkipped, Component::DiffEngine)
                .with_operation(OpKind::Skip)
                .with_confidence(None, Some(fact.confidence))
                .with_mechanism(Provenance::Explicit)
                .with_reasoning(format!("{} ({})", reason, fact.relation)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::config::{BusConfig, DecayRates, ProbingConfig};
    use crate::extract::GeneralFact;
    use crate::storage::{EdgeFilter, RedbStorage};
    use crate::types::{Relation, TemporalType};
    use tempfile::TempDir;

    struct Fixture {
        engine: DiffEngine<RedbStorage>,
        store: Arc<GraphStore<RedbStorage>>,
        outbound: Arc<OutboundQueue>,
        _dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(RedbStorage::open(dir.path().join("diff.redb")).unwrap());
        let bus = EventBus::new(BusConfig::default());
        let audit = Arc::new(AuditLog::new(storage.database()));
        let store = Arc::new(GraphStore::new(
            storage.clone(),
            bus,
            audit.clone(),
            ConfidenceConfig::default(),
            DecayRates::default(),
        ));
        let outbound = Arc::new(
            OutboundQueue::open(storage.database(), audit.clone(), ProbingConfig::default())
                .unwrap(),
        );
        let engine = DiffEngine::new(
            store.clone(),
            audit,
            outbound.clone(),
            ConfidenceConfig::default(),
        );
        Fixture {
            engine,
            store,
            outbound,
            _dir: dir,
        }
    }

    fn fact(subject: &str, relation: &str, object: &str, confidence: f32) -> ProposedFact {
        ProposedFact {
            subject: subject.to_string(),
            subject_kind: NodeKind::Person,
            relation: Relation::new(relation).unwrap(),
            object: object.to_string(),
            object_kind: NodeKind::Concept,
            temporal: TemporalType::Trait,
            confidence,
            provenance: Provenance::Explicit,
            context_tags: vec![],
            expiry: None,
            refines: None,
            attribution_uncertain: false,
            secondhand: false,
        }
    }

    fn episode(turn: u32) -> Episode {
        Episode::new("s1", turn, "chat")
    }

    #[tokio::test]
    async fn inserts_create_nodes_first() {
        let f = fixture();
        let delta = f
            .engine
            .apply(
                Uuid::now_v7(),
                episode(1),
                vec![
                    ProposedOp::AssertFact(fact("User", "married_to", "Lena", 0.9)),
                    ProposedOp::AssertFact(fact("Lena", "loves", "Malbec", 0.9)),
                ],
            )
            .unwrap();

        assert_eq!(delta.inserted, 2);
        assert!(f.store.resolve_alias("user").unwrap().is_some());
        assert!(f.store.resolve_alias("lena").unwrap().is_some());
        assert!(f.store.resolve_alias("malbec").unwrap().is_some());
    }

    #[tokio::test]
    async fn duplicate_fact_reinforces() {
        let f = fixture();
        f.engine
            .apply(
                Uuid::now_v7(),
                episode(1),
                vec![ProposedOp::AssertFact(fact("Lena", "loves", "Malbec", 0.9))],
            )
            .unwrap();

        let delta = f
            .engine
            .apply(
                Uuid::now_v7(),
                episode(2),
                vec![ProposedOp::AssertFact(fact("Lena", "loves", "Malbec", 0.9))],
            )
            .unwrap();
        assert_eq!(delta.reinforced, 1);

        let lena = f.store.resolve_alias("lena").unwrap().unwrap();
        let edges = f.store.edges(EdgeFilter::new().with_source(lena)).unwrap();
        assert_eq!(edges.len(), 1);
        // 0.90 + 0.08 × (1 − 0.90)
        assert!((edges[0].confidence - 0.908).abs() < 1e-4);
        assert_eq!(edges[0].source_episodes.len(), 2);
    }

    #[tokio::test]
    async fn reapplying_same_episode_is_idempotent() {
        let f = fixture();
        let ep = episode(1);
        let ops = vec![ProposedOp::AssertFact(fact("Lena", "loves", "Malbec", 0.9))];
        f.engine.apply(Uuid::now_v7(), ep.clone(), ops.clone()).unwrap();

        let delta = f.engine.apply(Uuid::now_v7(), ep, ops).unwrap();
        assert_eq!(delta.reinforced, 0);
        assert_eq!(delta.skipped, 1);

        let lena = f.store.resolve_alias("lena").unwrap().unwrap();
        let edges = f.store.edges(EdgeFilter::new().with_source(lena)).unwrap();
        assert!((edges[0].confidence - 0.9).abs() < 1e-6);
    }

    #[tokio::test]
    async fn strong_contradiction_revises() {
        let f = fixture();
        f.engine
            .apply(
                Uuid::now_v7(),
                episode(1),
                vec![ProposedOp::AssertFact(fact("Lena", "age", "47", 0.8))],
            )
            .unwrap();

        let delta = f
            .engine
            .apply(
                Uuid::now_v7(),
                episode(2),
                vec![ProposedOp::AssertFact(fact("Lena", "age", "46", 0.9))],
            )
            .unwrap();
        assert_eq!(delta.revised, 1);

        let lena = f.store.resolve_alias("lena").unwrap().unwrap();
        let active = f.store.edges(EdgeFilter::new().with_source(lena)).unwrap();
        assert_eq!(active.len(), 1);
        let forty_six = f.store.resolve_alias("46").unwrap().unwrap();
        assert_eq!(active[0].target, forty_six);

        let all = f
            .store
            .edges(EdgeFilter::new().with_source(lena).include_inactive())
            .unwrap();
        let retracted = all.iter().find(|e| e.retracted).unwrap();
        assert_eq!(
            retracted.retraction_reason,
            Some(RetractionReason::Superseded)
        );
    }

    #[tokio::test]
    async fn weak_contradiction_asks_instead() {
        let f = fixture();
        f.engine
            .apply(
                Uuid::now_v7(),
                episode(1),
                vec![ProposedOp::AssertFact(fact("Lena", "age", "47", 0.85))],
            )
            .unwrap();

        let delta = f
            .engine
            .apply(
                Uuid::now_v7(),
                episode(2),
                vec![ProposedOp::AssertFact(fact("Lena", "age", "46", 0.88))],
            )
            .unwrap();
        assert_eq!(delta.revised, 0);
        assert_eq!(delta.probes_emitted, 1);
        assert_eq!(f.outbound.queued_count().unwrap(), 1);

        // The old value stands.
        let lena = f.store.resolve_alias("lena").unwrap().unwrap();
        let active = f.store.edges(EdgeFilter::new().with_source(lena)).unwrap();
        let forty_seven = f.store.resolve_alias("47").unwrap().unwrap();
        assert_eq!(active[0].target, forty_seven);
    }

    #[tokio::test]
    async fn below_floor_is_skipped() {
        let f = fixture();
        let delta = f
            .engine
            .apply(
                Uuid::now_v7(),
                episode(1),
                vec![ProposedOp::AssertFact(fact("Lena", "likes", "rain", 0.1))],
            )
            .unwrap();
        assert_eq!(delta.skipped, 1);
        assert_eq!(delta.inserted, 0);
        assert!(f.store.resolve_alias("rain").unwrap().is_none());
    }

    #[tokio::test]
    async fn refinement_merges_and_links() {
        let f = fixture();
        f.engine
            .apply(
                Uuid::now_v7(),
                episode(1),
                vec![ProposedOp::AssertFact(fact("Lena", "loves", "Malbec", 0.9))],
            )
            .unwrap();

        let mut refinement = fact("Lena", "prefers", "Malbec 2018", 0.9);
        refinement.refines = Some(GeneralFact {
            subject: "Lena".to_string(),
            relation: Relation::new("loves").unwrap(),
            object: "Malbec".to_string(),
        });
        let delta = f
            .engine
            .apply(Uuid::now_v7(), episode(2), vec![ProposedOp::AssertFact(refinement)])
            .unwrap();
        assert_eq!(delta.merged, 1);

        let lena = f.store.resolve_alias("lena").unwrap().unwrap();
        let edges = f.store.edges(EdgeFilter::new().with_source(lena)).unwrap();
        assert_eq!(edges.len(), 2);
        let specific = edges
            .iter()
            .find(|e| e.relation.as_str() == "prefers")
            .unwrap();
        let general = edges
            .iter()
            .find(|e| e.relation.as_str() == "loves")
            .unwrap();
        assert_eq!(specific.refines, Some(general.id));
    }

    #[tokio::test]
    async fn retraction_op_retracts_matching_edges() {
        let f = fixture();
        f.engine
            .apply(
                Uuid::now_v7(),
                episode(1),
                vec![ProposedOp::AssertFact(fact("Lena", "loves", "Malbec", 0.9))],
            )
            .unwrap();

        let delta = f
            .engine
            .apply(
                Uuid::now_v7(),
                episode(2),
                vec![ProposedOp::Retract(ProposedRetraction {
                    subject: "Lena".to_string(),
                    relation: Some(Relation::new("loves").unwrap()),
                    object: None,
                })],
            )
            .unwrap();
        assert_eq!(delta.retracted, 1);

        let lena = f.store.resolve_alias("lena").unwrap().unwrap();
        assert!(f.store.edges(EdgeFilter::new().with_source(lena)).unwrap().is_empty());
    }
}
