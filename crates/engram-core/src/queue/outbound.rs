//! Outbound queue of pending probes and starters, with context-fit
//! scoring, frequency gates, and the cooldown lifecycle.

use chrono::{DateTime, Datelike, Duration, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditKind, AuditLog, Component};
use crate::config::ProbingConfig;
use crate::error::Result;
use crate::types::case_fold;

const OUTBOUND: TableDefinition<&[u8; 16], &[u8]> = TableDefinition::new("outbound");
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("outbound_counters");

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Probe,
    Starter,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Subtype {
    // Probe subtypes
    PreferenceDiscovery,
    FactVerification,
    PreferenceRefinement,
    // Starter subtypes
    Alert,
    Opportunity,
    Revision,
    Insight,
    Anticipation,
}

impl Subtype {
    pub fn as_str(self) -> &'static str {
        match self {
            Subtype::PreferenceDiscovery => "preference_discovery",
            Subtype::FactVerification => "fact_verification",
            Subtype::PreferenceRefinement => "preference_refinement",
            Subtype::Alert => "alert",
            Subtype::Opportunity => "opportunity",
            Subtype::Revision => "revision",
            Subtype::Insight => "insight",
            Subtype::Anticipation => "anticipation",
        }
    }
}

/// Probe lifecycle: generated → queued → delivered → {accepted, ignored,
/// deflected, obsoleted}. Ignored/deflected re-enter queued after a
/// cooldown with reduced priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    Queued,
    Delivered,
    Accepted,
    Ignored,
    Deflected,
    Obsoleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundItem {
    pub id: Uuid,
    pub kind: ItemKind,
    pub subtype: Subtype,
    /// Base priority in [0, 1]. Reduced on cooldown re-entry.
    pub priority: f32,
    pub context_tags: Vec<String>,
    /// Entities this item is about, by canonical name.
    pub entities: Vec<String>,
    /// Held until the conversation reaches this turn.
    pub min_turn: u32,
    pub earliest: DateTime<Utc>,
    pub latest: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// What the agent should say or ask.
    pub payload: String,
    pub state: ItemState,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    /// Why the proactive engine generated this.
    pub reasoning: String,
}

impl OutboundItem {
    pub fn new(
        kind: ItemKind,
        subtype: Subtype,
        priority: f32,
        payload: impl Into<String>,
        reasoning: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            kind,
            subtype,
            priority: priority.clamp(0.0, 1.0),
            context_tags: Vec::new(),
            entities: Vec::new(),
            min_turn: 0,
            earliest: now,
            latest: now + Duration::days(7),
            created_at: now,
            payload: payload.into(),
            state: ItemState::Queued,
            cooldown_until: None,
            delivered_at: None,
            reasoning: reasoning.into(),
        }
    }
}

/// A delivered item plus the gating metadata the agent may want.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveredItem {
    pub item: OutboundItem,
    pub context_fit: f32,
}

#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub active_topics: Vec<String>,
    pub entities_in_scope: Vec<String>,
    pub channel: String,
    pub session_id: String,
    pub turn: u32,
    pub now: DateTime<Utc>,
}

/// Context-fit = topic Jaccard × 0.6 + entity overlap × 0.3 +
/// recency decay × 0.1.
pub fn context_fit(item: &OutboundItem, request: &ProbeRequest) -> f32 {
    let topic_fit = jaccard(&item.context_tags, &request.active_topics);
    let entity_fit = overlap(&item.entities, &request.entities_in_scope);
    let age_hours = (request.now - item.created_at).num_minutes() as f32 / 60.0;
    let recency = 1.0 / (1.0 + (age_hours / 24.0).max(0.0));
    topic_fit * 0.6 + entity_fit * 0.3 + recency * 0.1
}

fn jaccard(a: &[String], b: &[String]) -> f32 {
    let a: HashSet<String> = a.iter().map(|s| case_fold(s)).collect();
    let b: HashSet<String> = b.iter().map(|s| case_fold(s)).collect();
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(&b).count() as f32;
    let union = a.union(&b).count() as f32;
    intersection / union
}

fn overlap(a: &[String], b: &[String]) -> f32 {
    if a.is_empty() {
        return 0.0;
    }
    let b: HashSet<String> = b.iter().map(|s| case_fold(s)).collect();
    let hits = a.iter().filter(|e| b.contains(&case_fold(e))).count();
    hits as f32 / a.len() as f32
}

pub struct OutboundQueue {
    db: Arc<Database>,
    audit: Arc<AuditLog>,
    config: ProbingConfig,
}

impl OutboundQueue {
    pub fn open(db: Arc<Database>, audit: Arc<AuditLog>, config: ProbingConfig) -> Result<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(OUTBOUND)?;
            let _ = write_txn.open_table(COUNTERS)?;
        }
        write_txn.commit()?;
        Ok(Self { db, audit, config })
    }

    pub fn push(&self, item: OutboundItem) -> Result<()> {
        let kind = match item.kind {
            ItemKind::Probe => AuditKind::ProbeGenerated,
            ItemKind::Starter => AuditKind::StarterGenerated,
        };
        self.audit.log(
            AuditEntry::new(Uuid::now_v7(), kind, Component::OutboundQueue)
                .with_target(item.id)
                .with_reasoning(item.reasoning.clone()),
        )?;
        self.put_item(&item)
    }

    /// The single best-fit probe for the current context, or None.
    /// Retrieval deducts the item and bumps the frequency counters.
    pub fn get_probe(&self, request: &ProbeRequest) -> Result<Option<DeliveredItem>> {
        if request.turn < self.config.min_turn {
            return Ok(None);
        }

        self.requeue_cooled(request.now)?;
        self.obsolete_expired(request.now)?;

        // Frequency gates. Counters are never reset, so every key must
        // embed the full date: the week key carries the ISO week-year,
        // or week 31 of one year would throttle week 31 of the next.
        let conversation_key = format!("probe:conv:{}", request.session_id);
        let day_key = format!("probe:day:{}", request.now.date_naive());
        let iso = request.now.iso_week();
        let week_key = format!("probe:week:{}-{:02}", iso.year(), iso.week());
        if self.counter(&conversation_key)? >= self.config.max_per_conversation as u64
            || self.counter(&day_key)? >= self.config.max_per_day as u64
            || self.counter(&week_key)? >= self.config.max_per_week as u64
        {
            return Ok(None);
        }

        let mut best: Option<(f32, OutboundItem)> = None;
        for item in self.scan()? {
            if item.kind != ItemKind::Probe || item.state != ItemState::Queued {
                continue;
            }
            if request.now < item.earliest
                || request.now > item.latest
                || request.turn < item.min_turn
            {
                continue;
            }
            let fit = context_fit(&item, request);
            if fit < self.config.min_context_fit {
                continue;
            }
            let rank = fit * 0.7 + item.priority * 0.3;
            match &best {
                Some((best_rank, _)) if *best_rank >= rank => {}
                _ => best = Some((rank, item)),
            }
        }

        let Some((_, mut item)) = best else {
            return Ok(None);
        };
        let fit = context_fit(&item, request);

        item.state = ItemState::Delivered;
        item.delivered_at = Some(request.now);
        self.put_item(&item)?;

        self.increment(&conversation_key)?;
        self.increment(&day_key)?;
        self.increment(&week_key)?;

        self.audit.log(
            AuditEntry::new(Uuid::now_v7(), AuditKind::ProbeDelivered, Component::OutboundQueue)
                .with_target(item.id)
                .with_session(request.session_id.clone())
                .with_reasoning(format!("context_fit {:.2}", fit)),
        )?;

        Ok(Some(DeliveredItem {
            item,
            context_fit: fit,
        }))
    }

    /// Ranked starters for a channel, respecting per-subtype daily caps.
    pub fn get_starters(
        &self,
        now: DateTime<Utc>,
        max_results: usize,
        max_per_subtype_per_day: u32,
    ) -> Result<Vec<OutboundItem>> {
        self.obsolete_expired(now)?;

        let mut candidates: Vec<OutboundItem> = self
            .scan()?
            .into_iter()
            .filter(|item| {
                item.kind == ItemKind::Starter
                    && item.state == ItemState::Queued
                    && now >= item.earliest
                    && now <= item.latest
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.priority
                .partial_cmp(&a.priority)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut delivered = Vec::new();
        for mut item in candidates {
            if delivered.len() >= max_results {
                break;
            }
            let subtype_key = format!("starter:{}:day:{}", item.subtype.as_str(), now.date_naive());
            if self.counter(&subtype_key)? >= max_per_subtype_per_day as u64 {
                continue;
            }

            item.state = ItemState::Delivered;
            item.delivered_at = Some(now);
            self.put_item(&item)?;
            self.increment(&subtype_key)?;
            self.audit.log(
                AuditEntry::new(
                    Uuid::now_v7(),
                    AuditKind::StarterDelivered,
                    Component::OutboundQueue,
                )
                .with_target(item.id)
                .with_reasoning(item.reasoning.clone()),
            )?;
            delivered.push(item);
        }
        Ok(delivered)
    }

    /// The user engaged with the probe; terminal state.
    pub fn mark_accepted(&self, id: Uuid) -> Result<()> {
        self.transition(id, ItemState::Accepted, None, 1.0)
    }

    /// The user ignored the probe; cooldown, then re-entry at reduced
    /// priority.
    pub fn mark_ignored(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let until = now + Duration::hours(self.config.ignore_cooldown_hours);
        self.audit_state(id, AuditKind::ProbeIgnored)?;
        self.transition(
            id,
            ItemState::Ignored,
            Some(until),
            self.config.reentry_priority_factor,
        )
    }

    /// The user deflected the probe; longer cooldown.
    pub fn mark_deflected(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let until = now + Duration::hours(self.config.deflect_cooldown_hours);
        self.audit_state(id, AuditKind::ProbeDeflected)?;
        self.transition(
            id,
            ItemState::Deflected,
            Some(until),
            self.config.reentry_priority_factor,
        )
    }

    /// Cooled-down items re-enter the queue.
    pub fn requeue_cooled(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut requeued = 0;
        for mut item in self.scan()? {
            if !matches!(item.state, ItemState::Ignored | ItemState::Deflected) {
                continue;
            }
            if item.cooldown_until.map_or(false, |until| now >= until) {
                item.state = ItemState::Queued;
                item.cooldown_until = None;
                self.put_item(&item)?;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    /// Items past their delivery window obsolete.
    pub fn obsolete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut obsoleted = 0;
        for mut item in self.scan()? {
            if item.state == ItemState::Queued && now > item.latest {
                item.state = ItemState::Obsoleted;
                self.put_item(&item)?;
                self.audit_state(item.id, AuditKind::ProbeObsoleted)?;
                obsoleted += 1;
            }
        }
        Ok(obsoleted)
    }

    /// All items regardless of state, for gap dedup and inspection.
    pub fn snapshot(&self) -> Result<Vec<OutboundItem>> {
        self.scan()
    }

    pub fn queued_count(&self) -> Result<u64> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|item| item.state == ItemState::Queued)
            .count() as u64)
    }

    pub fn get_item(&self, id: Uuid) -> Result<Option<OutboundItem>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(OUTBOUND)?;
        match table.get(id.as_bytes())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn transition(
        &self,
        id: Uuid,
        state: ItemState,
        cooldown_until: Option<DateTime<Utc>>,
        priority_factor: f32,
    ) -> Result<()> {
        if let Some(mut item) = self.get_item(id)? {
            item.state = state;
            item.cooldown_until = cooldown_until;
            item.priority = (item.priority * priority_factor).clamp(0.0, 1.0);
            self.put_item(&item)?;
        }
        Ok(())
    }

    fn audit_state(&self, id: Uuid, kind: AuditKind) -> Result<()> {
        self.audit.log(
            AuditEntry::new(Uuid::now_v7(), kind, Component::OutboundQueue).with_target(id),
        )
    }

    fn scan(&self) -> Result<Vec<OutboundItem>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(OUTBOUND)?;
        let mut items = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            items.push(serde_json::from_slice(value.value())?);
        }
        Ok(items)
    }

    fn put_item(&self, item: &OutboundItem) -> Result<()> {
        let bytes = serde_json::to_vec(item)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(OUTBOUND)?;
            table.insert(item.id.as_bytes(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn counter(&self, key: &str) -> Result<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(COUNTERS)?;
        Ok(table.get(key)?.map(|v| v.value()).unwrap_or(0))
    }

    fn increment(&self, key: &str) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(COUNTERS)?;
            let current = table.get(key)?.map(|v| v.value()).unwrap_or(0);
            table.insert(key, current + 1)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_queue(config: ProbingConfig) -> (OutboundQueue, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::create(dir.path().join("outbound.redb")).unwrap());
        let audit = Arc::new(AuditLog::new(db.clone()));
        let queue = OutboundQueue::open(db, audit, config).unwrap();
        (queue, dir)
    }

    fn wine_probe() -> OutboundItem {
        let mut item = OutboundItem::new(
            ItemKind::Probe,
            Subtype::PreferenceDiscovery,
            0.8,
            "Does Lena have a favorite Malbec producer?",
            "no wine preferences recorded for Lena",
        );
        item.context_tags = vec!["wine".to_string()];
        item.entities = vec!["Lena".to_string()];
        item
    }

    fn wine_request(turn: u32) -> ProbeRequest {
        ProbeRequest {
            active_topics: vec!["wine".to_string()],
            entities_in_scope: vec!["Lena".to_string()],
            channel: "chat".to_string(),
            session_id: "s1".to_string(),
            turn,
            now: Utc::now(),
        }
    }

    #[test]
    fn empty_queue_returns_none() {
        let (queue, _dir) = open_queue(ProbingConfig::default());
        assert!(queue.get_probe(&wine_request(5)).unwrap().is_none());
    }

    #[test]
    fn matching_probe_is_delivered_once_per_conversation() {
        let (queue, _dir) = open_queue(ProbingConfig::default());
        queue.push(wine_probe()).unwrap();

        let delivered = queue.get_probe(&wine_request(4)).unwrap().unwrap();
        assert!(delivered.context_fit > 0.5);
        assert_eq!(delivered.item.state, ItemState::Delivered);

        // Max one per conversation: an immediate second call is empty.
        queue.push(wine_probe()).unwrap();
        assert!(queue.get_probe(&wine_request(5)).unwrap().is_none());
    }

    #[test]
    fn min_turn_gate_holds_probe() {
        let (queue, _dir) = open_queue(ProbingConfig::default());
        queue.push(wine_probe()).unwrap();
        assert!(queue.get_probe(&wine_request(1)).unwrap().is_none());
    }

    #[test]
    fn off_topic_request_scores_below_threshold() {
        let (queue, _dir) = open_queue(ProbingConfig::default());
        queue.push(wine_probe()).unwrap();

        let request = ProbeRequest {
            active_topics: vec!["kubernetes".to_string()],
            entities_in_scope: vec![],
            ..wine_request(5)
        };
        assert!(queue.get_probe(&request).unwrap().is_none());
    }

    #[test]
    fn ignored_probe_cools_down_and_reenters_weaker() {
        let config = ProbingConfig {
            max_per_conversation: 5,
            ..Default::default()
        };
        let (queue, _dir) = open_queue(config);
        let probe = wine_probe();
        let original_priority = probe.priority;
        queue.push(probe).unwrap();

        let delivered = queue.get_probe(&wine_request(4)).unwrap().unwrap();
        queue.mark_ignored(delivered.item.id, Utc::now()).unwrap();

        // During cooldown the item is unavailable.
        assert!(queue.get_probe(&wine_request(5)).unwrap().is_none());

        // After cooldown it re-enters at reduced priority.
        let after = Utc::now() + Duration::hours(25);
        queue.requeue_cooled(after).unwrap();
        let item = queue.get_item(delivered.item.id).unwrap().unwrap();
        assert_eq!(item.state, ItemState::Queued);
        assert!(item.priority < original_priority);
    }

    #[test]
    fn expired_window_obsoletes() {
        let (queue, _dir) = open_queue(ProbingConfig::default());
        let mut probe = wine_probe();
        probe.latest = Utc::now() - Duration::hours(1);
        let id = probe.id;
        queue.push(probe).unwrap();

        assert!(queue.get_probe(&wine_request(5)).unwrap().is_none());
        assert_eq!(
            queue.get_item(id).unwrap().unwrap().state,
            ItemState::Obsoleted
        );
    }

    #[test]
    fn starters_respect_subtype_caps() {
        let (queue, _dir) = open_queue(ProbingConfig::default());
        for _ in 0..3 {
            let mut starter = OutboundItem::new(
                ItemKind::Starter,
                Subtype::Alert,
                0.9,
                "Storm warning for tonight",
                "weather alert matched Lena's commute",
            );
            starter.context_tags = vec!["weather".to_string()];
            queue.push(starter).unwrap();
        }

        let delivered = queue.get_starters(Utc::now(), 10, 2).unwrap();
        assert_eq!(delivered.len(), 2);
    }
}
