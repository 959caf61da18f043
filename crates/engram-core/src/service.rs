//! The service facade: owns every component, runs the single writer
//! loop that drains the inbound queue through extraction and the diff
//! engine, schedules the background workers, and exposes the
//! transport-agnostic operations of the external interface.

use chrono::Utc;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditFilter, AuditKind, AuditLog, Component, OpKind};
use crate::bus::{EventBus, EventKind, GraphEvent};
use crate::config::{EngramConfig, FallbackPolicy};
use crate::diff::DiffEngine;
use crate::error::{EngramError, Result};
use crate::extract::ExtractionPipeline;
use crate::graph::{GraphSnapshot, GraphStore, ProvenanceChain, Subgraph};
use crate::llm::{BreakerConfig, BreakerState, CircuitBreaker, LlmCapability, TokenBudget};
use crate::proactive::{ExternalEvent, ProbeGenerator, StarterGenerator};
use crate::query::{query_natural, query_structured, ContextAssembler, ContextBlock, NlPlanner, QuerySpec};
use crate::queue::{
    DeliveredItem, EnqueueOutcome, FailOutcome, InboundQueue, InteractionEvent, OutboundItem,
    OutboundQueue, ProbeRequest, QueuedInteraction,
};
use crate::storage::{RedbStorage, Storage, StorageStats};
use crate::types::{Episode, NodeKind, PrivacyLevel, Provenance, Relation, RetractionReason};
use crate::workers::{
    spawn_cycle, ClusteringWorker, DecayWorker, InferenceWorker, RevisionWorker, Verdict, Verifier,
};

/// Acknowledgement for a reported interaction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Ack {
    pub accepted: bool,
    pub duplicate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrectionKind {
    Revise,
    Delete,
    Retract,
}

/// Explicit user correction. Always applied; never confidence-gated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCorrection {
    pub kind: CorrectionKind,
    /// Entity name or alias the correction targets.
    pub entity: String,
    #[serde(default)]
    pub relation: Option<String>,
    #[serde(default)]
    pub old_value: Option<String>,
    #[serde(default)]
    pub new_value: Option<String>,
}

/// How the user responded to a delivered probe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProbeOutcome {
    Accepted,
    Ignored,
    Deflected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotFormat {
    Full,
    Graphml,
}

#[derive(Debug, Clone)]
pub enum SnapshotExport {
    Full(Box<GraphSnapshot>),
    Graphml(String),
}

/// What `get_context` returns: a lightweight extraction summary, the
/// surrounding subgraph, and the plan used to fetch it.
#[derive(Debug, Clone)]
pub struct ContextReply {
    pub extraction_summary: Vec<String>,
    pub subgraph: Subgraph,
    pub plan: QuerySpec,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentStatus {
    pub healthy: bool,
    pub breaker: BreakerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Component-wise health, with a circuit-breaker state per dependency.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub graph_store: ComponentStatus,
    pub llm_small: ComponentStatus,
    pub llm_large: ComponentStatus,
    pub inbound_pending: u64,
    pub outbound_queued: u64,
}

/// Verifier stub used when no external verifier is wired: every fact
/// comes back unknown and the revision cycle leaves it untouched.
struct NullVerifier;

#[async_trait::async_trait]
impl Verifier for NullVerifier {
    async fn verify(&self, _statement: &str) -> Result<Verdict> {
        Ok(Verdict::Unknown)
    }
}

/// One user graph, one service instance.
pub struct Engram {
    config: EngramConfig,
    storage: Arc<RedbStorage>,
    store: Arc<GraphStore<RedbStorage>>,
    bus: Arc<EventBus>,
    audit: Arc<AuditLog>,
    inbound: Arc<InboundQueue>,
    outbound: Arc<OutboundQueue>,
    pipeline: Arc<ExtractionPipeline>,
    diff: Arc<DiffEngine<RedbStorage>>,
    planner: Arc<NlPlanner>,
    assembler: Arc<ContextAssembler<RedbStorage>>,
    probes: Arc<ProbeGenerator<RedbStorage>>,
    starters: Arc<StarterGenerator<RedbStorage>>,
    decay_worker: Arc<DecayWorker<RedbStorage>>,
    revision_worker: Arc<RevisionWorker<RedbStorage>>,
    inference_worker: Arc<InferenceWorker<RedbStorage>>,
    clustering_worker: Arc<ClusteringWorker<RedbStorage>>,
    small_breaker: Arc<CircuitBreaker>,
    large_breaker: Arc<CircuitBreaker>,
    ingest_notify: Arc<Notify>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engram {
    /// Open (or create) a service over the database at `path`.
    /// `llm_small` drives extraction, `llm_large` drives synthesis and
    /// planning; `verifier` is the optional external fact checker.
    pub fn open(
        path: impl AsRef<Path>,
        config: EngramConfig,
        llm_small: Arc<dyn LlmCapability>,
        llm_large: Arc<dyn LlmCapability>,
        verifier: Option<Arc<dyn Verifier>>,
    ) -> Result<Arc<Self>> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(EngramError::Validation(errors.join("; ")));
        }

        let storage = Arc::new(RedbStorage::open(path)?);
        let bus = EventBus::new(config.bus.clone());
        let audit = Arc::new(AuditLog::new(storage.database()));
        let store = Arc::new(GraphStore::new(
            storage.clone(),
            bus.clone(),
            audit.clone(),
            config.confidence.clone(),
            config.decay.clone(),
        ));

        let inbound = Arc::new(InboundQueue::open(
            storage.database(),
            config.inbound.clone(),
        )?);
        let outbound = Arc::new(OutboundQueue::open(
            storage.database(),
            audit.clone(),
            config.probing.clone(),
        )?);

        let small_breaker = Arc::new(CircuitBreaker::new("llm_small", BreakerConfig::llm_small()));
        let large_breaker = Arc::new(CircuitBreaker::new("llm_large", BreakerConfig::llm_large()));
        let small_budget = Arc::new(TokenBudget::new(
            "llm_small",
            config.llm.small.daily_token_budget,
        ));
        let large_budget = Arc::new(TokenBudget::new(
            "llm_large",
            config.llm.large.daily_token_budget,
        ));

        let pipeline = Arc::new(ExtractionPipeline::new(
            llm_small,
            small_breaker.clone(),
            small_budget,
            config.extraction.clone(),
            config.confidence.clone(),
        ));
        let diff = Arc::new(DiffEngine::new(
            store.clone(),
            audit.clone(),
            outbound.clone(),
            config.confidence.clone(),
        ));
        let planner = Arc::new(NlPlanner::new(
            llm_large.clone(),
            large_breaker.clone(),
            large_budget.clone(),
        ));
        let assembler = Arc::new(ContextAssembler::new(store.clone(), outbound.clone()));
        let probes = Arc::new(ProbeGenerator::new(
            store.clone(),
            outbound.clone(),
            llm_large.clone(),
            large_breaker.clone(),
            large_budget.clone(),
            config.probing.clone(),
        ));
        let starters = Arc::new(StarterGenerator::new(
            store.clone(),
            outbound.clone(),
            llm_large.clone(),
            large_breaker.clone(),
            large_budget.clone(),
            config.starters.clone(),
        ));

        let verifier = verifier.unwrap_or_else(|| Arc::new(NullVerifier));
        let decay_worker = Arc::new(DecayWorker::new(
            store.clone(),
            audit.clone(),
            config.confidence.clone(),
        ));
        let revision_worker = Arc::new(RevisionWorker::new(
            store.clone(),
            audit.clone(),
            verifier,
            config.confidence.clone(),
            config.schedules.clone(),
        ));
        let inference_worker = Arc::new(InferenceWorker::new(
            store.clone(),
            audit.clone(),
            llm_large,
            large_breaker.clone(),
            large_budget,
            config.confidence.clone(),
            config.extraction.clone(),
            config.schedules.clone(),
        ));
        let clustering_worker = Arc::new(ClusteringWorker::new(
            store.clone(),
            audit.clone(),
            config.confidence.clone(),
        ));

        let service = Arc::new(Self {
            config,
            storage,
            store,
            bus,
            audit,
            inbound,
            outbound,
            pipeline,
            diff,
            planner,
            assembler,
            probes,
            starters,
            decay_worker,
            revision_worker,
            inference_worker,
            clustering_worker,
            small_breaker,
            large_breaker,
            ingest_notify: Arc::new(Notify::new()),
            tasks: Mutex::new(Vec::new()),
        });
        Ok(service)
    }

    /// Start the writer loop, the proactive subscriber, and the
    /// background cycles.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().unwrap();

        // Single writer: the only consumer of the inbound queue, and the
        // only place diff applications happen.
        let writer = self.clone();
        tasks.push(tokio::spawn(async move { writer.ingest_loop().await }));

        // Probe generation reacts to added edges through the bus, like
        // any other subscriber.
        let probe_generator = self.probes.clone();
        self.bus.subscribe(
            "proactive-engine",
            Some(vec![EventKind::EdgeAdded]),
            Arc::new(move |event| {
                let probes = probe_generator.clone();
                Box::pin(async move {
                    probes
                        .on_graph_event(&event)
                        .await
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                })
            }),
        );

        let schedules = &self.config.schedules;

        let decay = self.decay_worker.clone();
        tasks.push(spawn_cycle(
            "decay",
            Duration::from_secs(schedules.decay_interval_hours * 3600),
            move || {
                let decay = decay.clone();
                async move { decay.run_once(Utc::now()).map(|_| ()) }
            },
        ));

        let revision = self.revision_worker.clone();
        tasks.push(spawn_cycle(
            "revision",
            Duration::from_secs(schedules.revision_interval_hours * 3600),
            move || {
                let revision = revision.clone();
                async move { revision.run_once(Utc::now()).await.map(|_| ()) }
            },
        ));

        let inference = self.inference_worker.clone();
        tasks.push(spawn_cycle(
            "inference",
            Duration::from_secs(schedules.inference_interval_hours * 3600),
            move || {
                let inference = inference.clone();
                async move { inference.run_once().await.map(|_| ()) }
            },
        ));

        let clustering = self.clustering_worker.clone();
        tasks.push(spawn_cycle(
            "clustering",
            Duration::from_secs(schedules.clustering_interval_hours * 3600),
            move || {
                let clustering = clustering.clone();
                async move { clustering.run_once(Utc::now()).map(|_| ()) }
            },
        ));

        // Hourly housekeeping: idempotency-key retention, probe
        // cooldown re-entry, delivery-window expiry.
        let housekeeping_inbound = self.inbound.clone();
        let housekeeping_outbound = self.outbound.clone();
        tasks.push(spawn_cycle(
            "housekeeping",
            Duration::from_secs(3600),
            move || {
                let inbound = housekeeping_inbound.clone();
                let outbound = housekeeping_outbound.clone();
                async move {
                    let now = Utc::now();
                    inbound.purge_expired_keys(now)?;
                    outbound.requeue_cooled(now)?;
                    outbound.obsolete_expired(now)?;
                    Ok(())
                }
            },
        ));

        info!("engram service started");
    }

    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock().unwrap();
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("engram service stopped");
    }

    // === The writer ===

    async fn ingest_loop(self: Arc<Self>) {
        loop {
            match self.inbound.dequeue(Utc::now()) {
                Ok(Some(item)) => {
                    self.process_interaction(item).await;
                }
                Ok(None) => {
                    tokio::select! {
                        _ = self.ingest_notify.notified() => {}
                        _ = tokio::time::sleep(Duration::from_millis(250)) => {}
                    }
                }
                Err(e) => {
                    error!("inbound dequeue failed: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn process_interaction(&self, item: QueuedInteraction) {
        let correlation = Uuid::now_v7();
        let outcome = self.pipeline.run(&item.event, item.context_level()).await;

        if outcome.deferred {
            match self.config.llm.fallback {
                FallbackPolicy::Queue => {
                    warn!(
                        "extraction deferred for {}; re-enqueueing",
                        item.event.idempotency_key()
                    );
                    self.handle_failure(item).await;
                }
                FallbackPolicy::Degrade => {
                    warn!(
                        "extraction unavailable for {}; dropping under degrade policy",
                        item.event.idempotency_key()
                    );
                    let _ = self.audit.log(
                        AuditEntry::new(
                            correlation,
                            AuditKind::InteractionSkipped,
                            Component::Service,
                        )
                        .with_session(item.event.session_id.clone())
                        .with_reasoning("llm unavailable; degrade policy".to_string()),
                    );
                    let _ = self.inbound.ack(item.seq);
                }
            }
            return;
        }

        for warning in &outcome.warnings {
            let _ = self.audit.log(
                AuditEntry::new(
                    correlation,
                    AuditKind::HallucinationDetected,
                    Component::ExtractionPipeline,
                )
                .with_session(item.event.session_id.clone())
                .with_reasoning(warning.clone()),
            );
        }

        let skip_reason = if let Some(reason) = outcome.skipped {
            Some(reason)
        } else if outcome.ops.is_empty() {
            Some("no facts extracted".to_string())
        } else {
            None
        };

        if let Some(reason) = skip_reason {
            let _ = self.audit.log(
                AuditEntry::new(
                    correlation,
                    AuditKind::InteractionSkipped,
                    Component::Service,
                )
                .with_session(item.event.session_id.clone())
                .with_reasoning(reason),
            );
            if let Err(e) = self.inbound.ack(item.seq) {
                error!("ack failed: {}", e);
            }
            return;
        }

        let mut episode = Episode::new(
            item.event.session_id.clone(),
            item.event.turn,
            item.event.channel.clone(),
        );
        episode.sentiment = outcome.sentiment_score;
        if let Some(ts) = item.event.client_timestamp {
            episode.occurred_at = ts;
        }

        match self.diff.apply(correlation, episode, outcome.ops) {
            Ok(delta) => {
                info!(
                    "interaction {} applied: {} mutations",
                    item.event.idempotency_key(),
                    delta.mutation_count()
                );
                if let Err(e) = self.inbound.ack(item.seq) {
                    error!("ack failed: {}", e);
                }
            }
            Err(e) => {
                error!(
                    "diff application failed for {}: {}",
                    item.event.idempotency_key(),
                    e
                );
                self.handle_failure(item).await;
            }
        }
    }

    async fn handle_failure(&self, item: QueuedInteraction) {
        match self.inbound.fail(item.seq, Utc::now()) {
            Ok(FailOutcome::DeadLettered) => {
                let _ = self.audit.log(
                    AuditEntry::new(
                        Uuid::now_v7(),
                        AuditKind::InteractionDeadLettered,
                        Component::InboundQueue,
                    )
                    .with_session(item.event.session_id.clone()),
                );
            }
            Ok(FailOutcome::Requeued { .. }) => {}
            Err(e) => error!("failed to requeue interaction: {}", e),
        }
    }

    // === Agent-facing operations ===

    /// Non-blocking ingestion of one interaction event.
    pub fn report_interaction(&self, event: InteractionEvent) -> Result<Ack> {
        let outcome = self.inbound.enqueue(event)?;
        self.ingest_notify.notify_one();
        Ok(match outcome {
            EnqueueOutcome::Accepted => Ack {
                accepted: true,
                duplicate: false,
            },
            EnqueueOutcome::Duplicate => Ack {
                accepted: false,
                duplicate: true,
            },
        })
    }

    /// Structured subgraph query. Degrades to an empty soft-error
    /// subgraph when the store is unavailable.
    pub fn query(&self, spec: &QuerySpec) -> Subgraph {
        query_structured(&self.store, spec)
    }

    /// Natural-language query via the LLM planner.
    pub async fn query_nl(&self, question: &str) -> Subgraph {
        let (subgraph, _) = query_natural(&self.planner, &self.store, question).await;
        subgraph
    }

    /// Conversation-time context for one incoming message: spot known
    /// entities, pull their neighborhood, report the plan used.
    pub fn get_context(&self, message: &str) -> Result<ContextReply> {
        let entities = self.spot_entities(message)?;
        let plan = QuerySpec {
            entities: entities.clone(),
            relations: Vec::new(),
            min_confidence: None,
            max_hops: 2,
        };
        let subgraph = self.query(&plan);
        Ok(ContextReply {
            extraction_summary: entities,
            subgraph,
            plan,
        })
    }

    /// Known entities mentioned in a message, by alias lookup over
    /// words and adjacent word pairs.
    fn spot_entities(&self, message: &str) -> Result<Vec<String>> {
        let words: Vec<&str> = message
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let mut found = Vec::new();
        let mut push_unique = |name: String| {
            if !found.contains(&name) {
                found.push(name);
            }
        };

        for window in words.windows(2) {
            let pair = window.join(" ");
            if let Some(id) = self.store.resolve_alias(&pair)? {
                if let Some(node) = self.store.get_node(id)? {
                    push_unique(node.name);
                }
            }
        }
        for word in words {
            if let Some(id) = self.store.resolve_alias(word)? {
                if let Some(node) = self.store.get_node(id)? {
                    push_unique(node.name);
                }
            }
        }
        Ok(found)
    }

    /// The single best-fit probe for the current context, if any.
    pub fn get_probes(&self, request: &ProbeRequest) -> Result<Option<DeliveredItem>> {
        self.outbound.get_probe(request)
    }

    /// Ranked starters ready for delivery.
    pub fn get_starters(&self, max_results: usize) -> Result<Vec<OutboundItem>> {
        self.outbound.get_starters(
            Utc::now(),
            max_results,
            self.config.starters.max_per_subtype_per_day,
        )
    }

    /// Agent feedback on a delivered probe, driving its lifecycle.
    pub fn probe_feedback(&self, id: Uuid, outcome: ProbeOutcome) -> Result<()> {
        match outcome {
            ProbeOutcome::Accepted => self.outbound.mark_accepted(id),
            ProbeOutcome::Ignored => self.outbound.mark_ignored(id, Utc::now()),
            ProbeOutcome::Deflected => self.outbound.mark_deflected(id, Utc::now()),
        }
    }

    /// Feed one normalized external event to the starter generator.
    /// Events from a disabled monitor source are dropped.
    pub async fn external_event(&self, event: &ExternalEvent) -> Result<bool> {
        let monitors = &self.config.monitors;
        let enabled = match event.source.as_str() {
            "weather" => monitors.weather_enabled,
            "news" => monitors.news_enabled,
            "calendar" => monitors.calendar_enabled,
            _ => true,
        };
        if !enabled {
            return Ok(false);
        }
        self.starters.on_external_event(event).await
    }

    /// Explicit correction. Always applied, never confidence-gated.
    pub fn user_correction(&self, correction: &UserCorrection) -> Result<()> {
        let correlation = Uuid::now_v7();
        let node_id = self
            .store
            .resolve_alias(&correction.entity)?
            .ok_or_else(|| EngramError::Validation(format!(
                "unknown entity '{}'",
                correction.entity
            )))?;

        match correction.kind {
            CorrectionKind::Delete => {
                self.store.delete_node(correlation, node_id, true)?;
            }
            CorrectionKind::Retract => {
                let relation = correction
                    .relation
                    .as_deref()
                    .map(Relation::new)
                    .transpose()
                    .map_err(EngramError::Validation)?;
                let now = Utc::now();
                for edge in self.store.storage().edges_from(node_id)? {
                    if !edge.is_active(now) {
                        continue;
                    }
                    if let Some(ref relation) = relation {
                        if &edge.relation != relation {
                            continue;
                        }
                    }
                    if let Some(ref old_value) = correction.old_value {
                        match self.store.resolve_alias(old_value)? {
                            Some(target) if edge.target == target => {}
                            _ => continue,
                        }
                    }
                    self.store
                        .retract_edge(correlation, edge.id, RetractionReason::UserRequest)?;
                }
            }
            CorrectionKind::Revise => {
                let relation_name = correction.relation.as_deref().ok_or_else(|| {
                    EngramError::Validation("revise correction needs a relation".to_string())
                })?;
                let new_value = correction.new_value.as_deref().ok_or_else(|| {
                    EngramError::Validation("revise correction needs a new value".to_string())
                })?;
                let relation =
                    Relation::new(relation_name).map_err(EngramError::Validation)?;

                let now = Utc::now();
                let existing = self
                    .store
                    .storage()
                    .edges_from(node_id)?
                    .into_iter()
                    .find(|e| e.is_active(now) && e.relation == relation);

                let target = self.store.upsert_node(
                    correlation,
                    NodeKind::Concept,
                    new_value,
                    &[],
                    &[],
                    PrivacyLevel::L2Personal,
                )?;

                match existing {
                    Some(edge) => {
                        self.store.revise_edge(
                            correlation,
                            edge.id,
                            target,
                            self.config.confidence.max_confidence,
                            None,
                            RetractionReason::Superseded,
                        )?;
                    }
                    None => {
                        self.store.create_edge(
                            correlation,
                            crate::graph::NewEdge {
                                source: node_id,
                                target,
                                relation,
                                temporal: crate::types::TemporalType::State,
                                confidence: self.config.confidence.max_confidence,
                                provenance: Provenance::UserCorrection,
                                context_tags: Vec::new(),
                                episode: None,
                                expiry: None,
                                refines: None,
                            },
                        )?;
                    }
                }
            }
        }

        self.audit.log(
            AuditEntry::new(correlation, AuditKind::CorrectionApplied, Component::Service)
                .with_operation(OpKind::Revise)
                .with_target(node_id)
                .with_mechanism(Provenance::UserCorrection),
        )?;
        Ok(())
    }

    /// The provenance chain behind one edge.
    pub fn get_provenance(&self, edge_id: Uuid) -> Result<ProvenanceChain> {
        self.store.provenance(edge_id)
    }

    /// Full export of the graph.
    pub fn graph_snapshot(&self, format: SnapshotFormat) -> Result<SnapshotExport> {
        let snapshot = self.store.snapshot()?;
        Ok(match format {
            SnapshotFormat::Full => SnapshotExport::Full(Box::new(snapshot)),
            SnapshotFormat::Graphml => SnapshotExport::Graphml(snapshot.to_graphml()),
        })
    }

    /// Push-stream subscription over graph events.
    pub fn subscribe(
        &self,
        name: impl Into<String>,
        kinds: Option<Vec<EventKind>>,
    ) -> tokio::sync::mpsc::Receiver<GraphEvent> {
        self.bus.subscribe_channel(name, kinds)
    }

    pub fn unsubscribe(&self, name: &str) {
        self.bus.unsubscribe(name);
    }

    /// Compact ranked context block under a token budget.
    pub fn assemble_context(
        &self,
        active_entities: &[String],
        active_topics: &[String],
        token_budget: usize,
    ) -> ContextBlock {
        self.assembler
            .assemble(active_entities, active_topics, token_budget)
    }

    pub fn audit_query(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>> {
        self.audit.query(filter)
    }

    pub fn stats(&self) -> Result<StorageStats> {
        self.storage.stats()
    }

    pub fn config(&self) -> &EngramConfig {
        &self.config
    }

    /// Component-wise health with breaker states.
    pub fn health(&self) -> HealthReport {
        let store_status = match self.storage.stats() {
            Ok(_) => ComponentStatus {
                healthy: true,
                breaker: BreakerState::Closed,
                detail: None,
            },
            Err(e) => ComponentStatus {
                healthy: false,
                breaker: BreakerState::Open,
                detail: Some(e.to_string()),
            },
        };

        HealthReport {
            graph_store: store_status,
            llm_small: ComponentStatus {
                healthy: self.small_breaker.state() == BreakerState::Closed,
                breaker: self.small_breaker.state(),
                detail: None,
            },
            llm_large: ComponentStatus {
                healthy: self.large_breaker.state() == BreakerState::Closed,
                breaker: self.large_breaker.state(),
                detail: None,
            },
            inbound_pending: self.inbound.pending_count().unwrap_or(0),
            outbound_queued: self.outbound.queued_count().unwrap_or(0),
        }
    }

    /// Direct worker access for drive-by cycles in tests and CLI.
    pub fn decay_worker(&self) -> &Arc<DecayWorker<RedbStorage>> {
        &self.decay_worker
    }

    pub fn clustering_worker(&self) -> &Arc<ClusteringWorker<RedbStorage>> {
        &self.clustering_worker
    }

    pub fn store(&self) -> &Arc<GraphStore<RedbStorage>> {
        &self.store
    }
}

impl Drop for Engram {
    fn drop(&mut self) {
        let mut tasks = self.tasks.lock().unwrap();
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}
