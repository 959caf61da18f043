//! Starter generation: score each normalized external event against the
//! graph; above threshold, synthesize a conversation opener with a
//! delivery window honoring quiet hours.

use chrono::{DateTime, Duration, FixedOffset, Timelike, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::StartersConfig;
use crate::error::Result;
use crate::extract::{prompts, repair_json};
use crate::graph::GraphStore;
use crate::llm::{CircuitBreaker, CompletionRequest, LlmCapability, TokenBudget};
use crate::queue::{ItemKind, OutboundItem, OutboundQueue, Subtype};
use crate::storage::{EdgeFilter, Storage};
use crate::types::case_fold;

/// A normalized event from an external poller (weather, news, calendar).
/// The pollers are external collaborators; this is their contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalEvent {
    pub source: String,
    pub subtype: Subtype,
    pub title: String,
    pub description: String,
    pub topics: Vec<String>,
    pub entities: Vec<String>,
    /// [0, 1]; scales the starter's priority.
    pub severity: f32,
    pub occurs_at: Option<DateTime<Utc>>,
}

pub struct StarterGenerator<S: Storage> {
    store: Arc<GraphStore<S>>,
    outbound: Arc<OutboundQueue>,
    llm: Arc<dyn LlmCapability>,
    breaker: Arc<CircuitBreaker>,
    budget: Arc<TokenBudget>,
    config: StartersConfig,
}

impl<S: Storage> StarterGenerator<S> {
    pub fn new(
        store: Arc<GraphStore<S>>,
        outbound: Arc<OutboundQueue>,
        llm: Arc<dyn LlmCapability>,
        breaker: Arc<CircuitBreaker>,
        budget: Arc<TokenBudget>,
        config: StartersConfig,
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

    /// Score one external event and queue a starter when it clears the
    /// relevance threshold. Returns whether a starter was queued.
    pub async fn on_external_event(&self, event: &ExternalEvent) -> Result<bool> {
        let (relevance, matched) = self.score(event)?;
        if relevance < self.config.relevance_threshold {
            debug!(
                "starter: '{}' scored {:.2}, below threshold",
                event.title, relevance
            );
            return Ok(false);
        }

        let opener = self.synthesize_opener(event, &matched).await;
        let now = Utc::now();
        let earliest = self.quiet_hours_adjusted(now, event.subtype);

        let mut starter = OutboundItem::new(
            ItemKind::Starter,
            event.subtype,
            (relevance * (0.5 + 0.5 * event.severity)).clamp(0.0, 1.0),
            opener,
            format!(
                "event '{}' from {} matched {} at relevance {:.2}",
                event.title,
                event.source,
                matched.join(", "),
                relevance
            ),
        );
        starter.context_tags = event.topics.iter().map(|t| case_fold(t)).collect();
        starter.entities = matched;
        starter.earliest = earliest;
        starter.latest = earliest + Duration::hours(self.config.delivery_window_hours);
        self.outbound.push(starter)?;
        Ok(true)
    }

    /// Relevance: how much of the event's entities and topics the graph
    /// already knows at adequate confidence.
    fn score(&self, event: &ExternalEvent) -> Result<(f32, Vec<String>)> {
        let mut matched = Vec::new();
        let mut entity_hits = 0usize;
        for name in event.entities.iter().chain(event.topics.iter()) {
            if let Some(node_id) = self.store.resolve_alias(name)? {
                let supported = !self
                    .store
                    .edges(
                        EdgeFilter::new()
                            .with_source(node_id)
                            .with_min_confidence(0.4),
                    )?
                    .is_empty()
                    || !self
                        .store
                        .edges(
                            EdgeFilter::new()
                                .with_target(node_id)
                                .with_min_confidence(0.4),
                        )?
                        .is_empty();
                if supported {
                    entity_hits += 1;
                    if let Some(node) = self.store.get_node(node_id)? {
                        matched.push(node.name);
                    }
                }
            }
        }

        let total = event.entities.len() + event.topics.len();
        if total == 0 {
            return Ok((0.0, matched));
        }
        Ok((entity_hits as f32 / total as f32, matched))
    }

    /// Starters wait out quiet hours unless the subtype may override
    /// (alerts may). The window is a local-hour contract, so the clock
    /// is shifted into the configured offset before comparing.
    fn quiet_hours_adjusted(&self, now: DateTime<Utc>, subtype: Subtype) -> DateTime<Utc> {
        if subtype == Subtype::Alert && self.config.alerts_override_quiet_hours {
            return now;
        }

        let Some(offset) = FixedOffset::east_opt(self.config.tz_offset_minutes * 60) else {
            return now;
        };
        let local_now = now.with_timezone(&offset);

        let hour = local_now.hour();
        let start = self.config.quiet_start_hour;
        let end = self.config.quiet_end_hour;
        let in_quiet = if start > end {
            hour >= start || hour < end
        } else {
            hour >= start && hour < end
        };
        if !in_quiet {
            return now;
        }

        let mut release = local_now
            .date_naive()
            .and_hms_opt(end, 0, 0)
            .and_then(|dt| dt.and_local_timezone(offset).single())
            .unwrap_or(local_now);
        if release <= local_now {
            release = release + Duration::days(1);
        }
        release.with_timezone(&Utc)
    }

    async fn synthesize_opener(&self, event: &ExternalEvent, matched: &[String]) -> String {
        let fallback = format!("{} — thought of you: {}", event.title, event.description);

        let request = CompletionRequest::new(prompts::starter_prompt(
            &format!("{}: {}", event.title, event.description),
            &matched.join(", "),
        ));
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
                        v.get("opener")
                            .and_then(|o| o.as_str())
                            .map(|s| s.to_string())
                    })
                    .unwrap_or(fallback)
            }
            Err(e) => {
                self.breaker.record_failure();
                warn!("starter synthesis failed, using template: {}", e);
                fallback
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::bus::EventBus;
    use crate::config::{BusConfig, ConfidenceConfig, DecayRates, ProbingConfig};
    use crate::graph::NewEdge;
    use crate::llm::{BreakerConfig, ScriptedLlm};
    use crate::storage::RedbStorage;
    use crate::types::{
        Episode, NodeKind, PrivacyLevel, Provenance, Relation, TemporalType,
    };
    use tempfile::TempDir;
    use uuid::Uuid;

    struct Fixture {
        generator: StarterGenerator<RedbStorage>,
        store: Arc<GraphStore<RedbStorage>>,
        outbound: Arc<OutboundQueue>,
        llm: Arc<ScriptedLlm>,
        _dir: TempDir,
    }

    fn fixture() -> Fixture {
        fixture_with(StartersConfig::default())
    }

    fn fixture_with(config: StartersConfig) -> Fixture {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(RedbStorage::open(dir.path().join("starters.redb")).unwrap());
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
            OutboundQueue::open(storage.database(), audit, ProbingConfig::default()).unwrap(),
        );
        let llm = Arc::new(ScriptedLlm::new("llm_large"));
        let generator = StarterGenerator::new(
            store.clone(),
            outbound.clone(),
            llm.clone(),
            Arc::new(CircuitBreaker::new("llm_large", BreakerConfig::llm_large())),
            Arc::new(TokenBudget::new("llm_large", 1_000_000)),
            config,
        );
        Fixture {
            generator,
            store,
            outbound,
            llm,
            _dir: dir,
        }
    }

    fn seed_wine_knowledge(f: &Fixture) {
        let correlation = Uuid::now_v7();
        let lena = f
            .store
            .upsert_node(
                correlation,
                NodeKind::Person,
                "Lena",
                &[],
                &[],
                PrivacyLevel::L2Personal,
            )
            .unwrap();
        let malbec = f
            .store
            .upsert_node(
                correlation,
                NodeKind::Concept,
                "Malbec",
                &[],
                &[],
                PrivacyLevel::L0Public,
            )
            .unwrap();
        let episode = Episode::new("s1", 1, "chat");
        f.store.record_episode(correlation, &episode).unwrap();
        f.store
            .create_edge(
                correlation,
                NewEdge {
                    source: lena,
                    target: malbec,
                    relation: Relation::new("loves").unwrap(),
                    temporal: TemporalType::Trait,
                    confidence: 0.9,
                    provenance: Provenance::Explicit,
                    context_tags: vec!["wine".to_string()],
                    episode: Some(episode.id),
                    expiry: None,
                    refines: None,
                },
            )
            .unwrap();
    }

    fn wine_event() -> ExternalEvent {
        ExternalEvent {
            source: "news".to_string(),
            subtype: Subtype::Opportunity,
            title: "Malbec festival this weekend".to_string(),
            description: "A Malbec tasting festival opens downtown".to_string(),
            topics: vec![],
            entities: vec!["Malbec".to_string()],
            severity: 0.5,
            occurs_at: None,
        }
    }

    #[tokio::test]
    async fn relevant_event_queues_starter() {
        let f = fixture();
        seed_wine_knowledge(&f);
        f.llm.push_response(
            r#"{"opener": "There's a Malbec festival this weekend — Lena might love it", "tags": ["wine"]}"#,
        );

        let queued = f.generator.on_external_event(&wine_event()).await.unwrap();
        assert!(queued);
        assert_eq!(f.outbound.queued_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn irrelevant_event_is_dropped() {
        let f = fixture();
        // Empty graph: nothing matches.
        let queued = f.generator.on_external_event(&wine_event()).await.unwrap();
        assert!(!queued);
        assert_eq!(f.outbound.queued_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn opener_falls_back_when_llm_down() {
        let f = fixture();
        seed_wine_knowledge(&f);
        f.llm.push_failure("timeout");

        let queued = f.generator.on_external_event(&wine_event()).await.unwrap();
        assert!(queued);
    }

    #[tokio::test]
    async fn quiet_hours_are_evaluated_in_the_configured_offset() {
        let now = DateTime::parse_from_rfc3339("2026-08-01T23:30:00Z")
            .unwrap()
            .with_timezone(&Utc);

        // 23:30 UTC is 01:30 at UTC+2: inside the 22-8 window, released
        // at 08:00 local, which is 06:00 UTC the same day.
        let plus_two = fixture_with(StartersConfig {
            tz_offset_minutes: 120,
            ..Default::default()
        });
        let release = plus_two
            .generator
            .quiet_hours_adjusted(now, Subtype::Opportunity);
        assert_eq!(release.to_rfc3339(), "2026-08-02T06:00:00+00:00");

        // The same instant is 13:30 at UTC-10: daytime, no hold.
        let minus_ten = fixture_with(StartersConfig {
            tz_offset_minutes: -600,
            ..Default::default()
        });
        let release = minus_ten
            .generator
            .quiet_hours_adjusted(now, Subtype::Opportunity);
        assert_eq!(release, now);

        // Alerts override the window regardless of offset.
        let release = plus_two.generator.quiet_hours_adjusted(now, Subtype::Alert);
        assert_eq!(release, now);
    }
}
