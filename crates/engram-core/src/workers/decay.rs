//! Weekly decay cycle: recompute every active edge's confidence from
//! elapsed time since last reinforcement; archive what falls below the
//! threshold.

use chrono::{DateTime, Utc};
use log::info;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditKind, AuditLog, Component};
use crate::config::ConfidenceConfig;
use crate::confidence;
use crate::error::Result;
use crate::graph::GraphStore;
use crate::storage::{EdgeFilter, Storage};

#[derive(Debug, Default, Clone, Copy)]
pub struct DecayReport {
    pub examined: usize,
    pub decayed: usize,
    pub archived: usize,
}

pub struct DecayWorker<S: Storage> {
    store: Arc<GraphStore<S>>,
    audit: Arc<AuditLog>,
    config: ConfidenceConfig,
}

impl<S: Storage> DecayWorker<S> {
    pub fn new(store: Arc<GraphStore<S>>, audit: Arc<AuditLog>, config: ConfidenceConfig) -> Self {
        Self {
            store,
            audit,
            config,
        }
    }

    pub fn run_once(&self, now: DateTime<Utc>) -> Result<DecayReport> {
        let correlation = Uuid::now_v7();
        let mut report = DecayReport::default();

        let edges = self.store.edges(EdgeFilter::new())?;
        for edge in edges {
            report.examined += 1;

            let decayed = confidence::decay(
                &self.config,
                edge.confidence,
                edge.decay_rate,
                edge.last_reinforced,
                now,
            );
            if (decayed - edge.confidence).abs() < f32::EPSILON {
                continue;
            }

            self.store.apply_decay(correlation, edge.id, decayed)?;
            report.decayed += 1;

            if confidence::should_archive(&self.config, decayed) {
                self.store.archive_edge(correlation, edge.id)?;
                report.archived += 1;
            }
        }

        self.audit.log(
            AuditEntry::new(
                correlation,
                AuditKind::DecayCycleCompleted,
                Component::DecayWorker,
            )
            .with_reasoning(format!(
                "examined {}, decayed {}, archived {}",
                report.examined, report.decayed, report.archived
            )),
        )?;
        info!(
            "decay cycle: examined {}, decayed {}, archived {}",
            report.examined, report.decayed, report.archived
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::config::{BusConfig, DecayRates};
    use crate::graph::NewEdge;
    use crate::storage::RedbStorage;
    use crate::types::{
        Episode, NodeKind, PrivacyLevel, Provenance, Relation, TemporalType,
    };
    use chrono::Duration;
    use tempfile::TempDir;

    fn fixture() -> (DecayWorker<RedbStorage>, Arc<GraphStore<RedbStorage>>, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(RedbStorage::open(dir.path().join("decay.redb")).unwrap());
        let bus = EventBus::new(BusConfig::default());
        let audit = Arc::new(AuditLog::new(storage.database()));
        let store = Arc::new(GraphStore::new(
            storage,
            bus,
            audit.clone(),
            ConfidenceConfig::default(),
            DecayRates::default(),
        ));
        let worker = DecayWorker::new(store.clone(), audit, ConfidenceConfig::default());
        (worker, store, dir)
    }

    fn seed_edge(
        store: &Arc<GraphStore<RedbStorage>>,
        confidence: f32,
        decay_rate: f32,
        age_days: i64,
    ) -> uuid::Uuid {
        let correlation = Uuid::now_v7();
        let a = store
            .upsert_node(correlation, NodeKind::Person, "User", &[], &[], PrivacyLevel::L3Private)
            .unwrap();
        let b = store
            .upsert_node(
                correlation,
                NodeKind::Concept,
                "fleeting topic",
                &[],
                &[],
                PrivacyLevel::L0Public,
            )
            .unwrap();
        let episode = Episode::new("s1", 1, "chat");
        store.record_episode(correlation, &episode).unwrap();
        let edge = store
            .create_edge(
                correlation,
                NewEdge {
                    source: a,
                    target: b,
                    relation: Relation::new("interested_in").unwrap(),
                    temporal: TemporalType::Wish,
                    confidence,
                    provenance: Provenance::Observational,
                    context_tags: vec![],
                    episode: Some(episode.id),
                    expiry: None,
                    refines: None,
                },
            )
            .unwrap();

        // Backdate the reinforcement timestamp and pin the decay rate.
        let mut backdated = edge.clone();
        backdated.last_reinforced = Utc::now() - Duration::days(age_days);
        backdated.decay_rate = decay_rate;
        store.storage().put_edge(&backdated).unwrap();
        edge.id
    }

    #[tokio::test]
    async fn stale_weak_edge_is_archived_and_hidden() {
        let (worker, store, _dir) = fixture();
        let edge_id = seed_edge(&store, 0.30, 0.08, 30 * 6);

        let report = worker.run_once(Utc::now()).unwrap();
        assert_eq!(report.archived, 1);

        let edge = store.get_edge(edge_id).unwrap().unwrap();
        assert!(edge.archived);
        assert!(edge.confidence < 0.15);

        // Archived edges leave query results.
        let visible = store.edges(EdgeFilter::new()).unwrap();
        assert!(visible.is_empty());
    }

    #[tokio::test]
    async fn fresh_edge_is_untouched() {
        let (worker, store, _dir) = fixture();
        let edge_id = seed_edge(&store, 0.8, 0.08, 3);

        let report = worker.run_once(Utc::now()).unwrap();
        assert_eq!(report.decayed, 0);
        assert_eq!(report.archived, 0);

        let edge = store.get_edge(edge_id).unwrap().unwrap();
        assert!((edge.confidence - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn aged_strong_edge_decays_without_archiving() {
        let (worker, store, _dir) = fixture();
        let edge_id = seed_edge(&store, 0.9, 0.08, 90);

        let report = worker.run_once(Utc::now()).unwrap();
        assert_eq!(report.decayed, 1);
        assert_eq!(report.archived, 0);

        let edge = store.get_edge(edge_id).unwrap().unwrap();
        assert!(edge.confidence < 0.9);
        assert!(!edge.archived);
    }
}
