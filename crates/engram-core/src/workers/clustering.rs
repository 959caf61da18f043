//! Weekly episode clustering: group related episodes by the dominant
//! context tag of the edges they produced; recurring patterns promote
//! to Experience nodes at modest confidence with episode back-links.

use chrono::{DateTime, Utc};
use log::info;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditKind, AuditLog, Component};
use crate::config::ConfidenceConfig;
use crate::error::Result;
use crate::graph::{GraphStore, NewEdge};
use crate::storage::Storage;
use crate::types::{case_fold, Episode, NodeKind, PrivacyLevel, Provenance, Relation, TemporalType};

/// Episodes sharing a tag at or above this count form a pattern.
const MIN_CLUSTER_SIZE: usize = 3;

#[derive(Debug, Default, Clone, Copy)]
pub struct ClusteringReport {
    pub episodes_examined: usize,
    pub clusters_found: usize,
    pub experiences_promoted: usize,
}

pub struct ClusteringWorker<S: Storage> {
    store: Arc<GraphStore<S>>,
    audit: Arc<AuditLog>,
    confidence: ConfidenceConfig,
}

impl<S: Storage> ClusteringWorker<S> {
    pub fn new(
        store: Arc<GraphStore<S>>,
        audit: Arc<AuditLog>,
        confidence: ConfidenceConfig,
    ) -> Self {
        Self {
            store,
            audit,
            confidence,
        }
    }

    pub fn run_once(&self, _now: DateTime<Utc>) -> Result<ClusteringReport> {
        let correlation = Uuid::now_v7();
        let mut report = ClusteringReport::default();

        let episodes = self.store.storage().list_episodes(None, None)?;
        report.episodes_examined = episodes.len();

        // Bucket episodes by each context tag their edges carry.
        let mut clusters: HashMap<String, Vec<&Episode>> = HashMap::new();
        for episode in &episodes {
            let mut tags: Vec<String> = Vec::new();
            for edge_id in &episode.edge_ids {
                if let Some(edge) = self.store.get_edge(*edge_id)? {
                    for tag in edge.context_tags {
                        let folded = case_fold(&tag);
                        if !tags.contains(&folded) {
                            tags.push(folded);
                        }
                    }
                }
            }
            for tag in tags {
                clusters.entry(tag).or_default().push(episode);
            }
        }

        for (tag, members) in clusters {
            if members.len() < MIN_CLUSTER_SIZE {
                continue;
            }
            report.clusters_found += 1;

            let name = format!("recurring interest: {}", tag);
            if self.store.resolve_alias(&name)?.is_some() {
                // Pattern already promoted; reinforce its count instead.
                self.reinforce_existing(&name, members.len())?;
                continue;
            }

            let mean_sentiment: f32 =
                members.iter().map(|e| e.sentiment).sum::<f32>() / members.len() as f32;
            let experience = self.store.upsert_node(
                correlation,
                NodeKind::Experience,
                &name,
                &[],
                &[
                    (
                        "description".to_string(),
                        format!(
                            "{} separate interactions touched '{}' (mean sentiment {:+.2})",
                            members.len(),
                            tag,
                            mean_sentiment
                        ),
                    ),
                    (
                        "condition".to_string(),
                        format!("conversation touches '{}'", tag),
                    ),
                    (
                        "reinforcement_count".to_string(),
                        members.len().to_string(),
                    ),
                    (
                        "episode_ids".to_string(),
                        members
                            .iter()
                            .map(|e| e.id.to_string())
                            .collect::<Vec<_>>()
                            .join(","),
                    ),
                ],
                PrivacyLevel::L2Personal,
            )?;

            // Link the experience to the concept it generalizes, if the
            // graph knows it.
            if let Some(concept) = self.store.resolve_alias(&tag)? {
                self.store.create_edge(
                    correlation,
                    NewEdge {
                        source: experience,
                        target: concept,
                        relation: Relation::new("derived_from").unwrap(),
                        temporal: TemporalType::State,
                        confidence: self.confidence.base_reflective,
                        provenance: Provenance::Reflective,
                        context_tags: vec![tag.clone()],
                        episode: members.first().map(|e| e.id),
                        expiry: None,
                        refines: None,
                    },
                )?;
            }
            report.experiences_promoted += 1;
        }

        self.audit.log(
            AuditEntry::new(
                correlation,
                AuditKind::ClusteringCycleCompleted,
                Component::ClusteringWorker,
            )
            .with_reasoning(format!(
                "examined {}, clusters {}, promoted {}",
                report.episodes_examined, report.clusters_found, report.experiences_promoted
            )),
        )?;
        info!(
            "clustering cycle: examined {}, promoted {}",
            report.episodes_examined, report.experiences_promoted
        );
        Ok(report)
    }

    fn reinforce_existing(&self, name: &str, count: usize) -> Result<()> {
        if let Some(id) = self.store.resolve_alias(name)? {
            if let Some(mut node) = self.store.get_node(id)? {
                node.properties
                    .insert("reinforcement_count".to_string(), count.to_string());
                node.last_reinforced = Utc::now();
                self.store.storage().put_node(&node)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::config::{BusConfig, DecayRates};
    use crate::storage::{NodeFilter, RedbStorage};
    use tempfile::TempDir;

    fn fixture() -> (ClusteringWorker<RedbStorage>, Arc<GraphStore<RedbStorage>>, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(RedbStorage::open(dir.path().join("clusters.redb")).unwrap());
        let bus = EventBus::new(BusConfig::default());
        let audit = Arc::new(AuditLog::new(storage.database()));
        let store = Arc::new(GraphStore::new(
            storage,
            bus,
            audit.clone(),
            ConfidenceConfig::default(),
            DecayRates::default(),
        ));
        let worker = ClusteringWorker::new(store.clone(), audit, ConfidenceConfig::default());
        (worker, store, dir)
    }

    fn seed_tagged_episodes(store: &Arc<GraphStore<RedbStorage>>, tag: &str, count: usize) {
        let correlation = Uuid::now_v7();
        let lena = store
            .upsert_node(correlation, NodeKind::Person, "Lena", &[], &[], PrivacyLevel::L2Personal)
            .unwrap();
        let concept = store
            .upsert_node(correlation, NodeKind::Concept, tag, &[], &[], PrivacyLevel::L0Public)
            .unwrap();

        for turn in 0..count {
            let episode = Episode::new("s1", turn as u32 + 1, "chat");
            store.record_episode(correlation, &episode).unwrap();
            store
                .create_edge(
                    correlation,
                    NewEdge {
                        source: lena,
                        target: concept,
                        relation: Relation::new("discussed").unwrap(),
                        temporal: TemporalType::Episode,
                        confidence: 0.6,
                        provenance: Provenance::Observational,
                        context_tags: vec![tag.to_string()],
                        episode: Some(episode.id),
                        expiry: None,
                        refines: None,
                    },
                )
                .unwrap();
        }
    }

    #[tokio::test]
    async fn recurring_tag_promotes_experience() {
        let (worker, store, _dir) = fixture();
        seed_tagged_episodes(&store, "wine", 3);

        let report = worker.run_once(Utc::now()).unwrap();
        assert_eq!(report.experiences_promoted, 1);

        let experiences = store
            .find_nodes(NodeFilter::new().with_kind(NodeKind::Experience))
            .unwrap();
        assert_eq!(experiences.len(), 1);
        let experience = &experiences[0];
        assert_eq!(experience.properties["reinforcement_count"], "3");
        assert!(experience.properties["episode_ids"].contains(','));
        // Promotion carries the reflective base confidence on its link.
        let edges = store
            .edges(crate::storage::EdgeFilter::new().with_source(experience.id))
            .unwrap();
        assert!((edges[0].confidence - 0.50).abs() < 1e-6);
    }

    #[tokio::test]
    async fn small_clusters_are_not_promoted() {
        let (worker, store, _dir) = fixture();
        seed_tagged_episodes(&store, "wine", 2);

        let report = worker.run_once(Utc::now()).unwrap();
        assert_eq!(report.experiences_promoted, 0);
    }

    #[tokio::test]
    async fn second_run_reinforces_instead_of_duplicating() {
        let (worker, store, _dir) = fixture();
        seed_tagged_episodes(&store, "wine", 3);

        worker.run_once(Utc::now()).unwrap();
        let report = worker.run_once(Utc::now()).unwrap();
        assert_eq!(report.experiences_promoted, 0);

        let experiences = store
            .find_nodes(NodeFilter::new().with_kind(NodeKind::Experience))
            .unwrap();
        assert_eq!(experiences.len(), 1);
    }
}
