pub mod audit;
pub mod bus;
pub mod config;
pub mod confidence;
pub mod diff;
pub mod error;
pub mod extract;
pub mod graph;
pub mod llm;
pub mod proactive;
pub mod query;
pub mod queue;
pub mod relations;
pub mod service;
pub mod storage;
pub mod types;
pub mod workers;

pub use audit::{AuditEntry, AuditFilter, AuditKind, AuditLog, Component, OpKind};
pub use bus::{EventBus, EventCallback, EventKind, GraphEvent};
pub use config::{
    BusConfig, ConfidenceConfig, DecayRates, EngramConfig, ExtractionConfig, FallbackPolicy,
    InboundConfig, LlmConfig, LlmTierConfig, MonitorsConfig, PrivacyConfig, ProactivityPreset,
    ProbingConfig, RiskConfig, ScheduleConfig, StartersConfig,
};
pub use confidence::HedgeLevel;
pub use diff::{AppliedDelta, DiffEngine};
pub use error::{EngramError, Result};
pub use extract::{ExtractionOutcome, ExtractionPipeline, ProposedFact, ProposedNode, ProposedOp};
pub use graph::{
    GraphSnapshot, GraphStore, NewEdge, ProvenanceChain, Subgraph, TraversalBudget,
    TraversalRequest,
};
pub use llm::{
    BreakerConfig, BreakerState, CircuitBreaker, CompletionRequest, HttpLlm, LlmCapability,
    LlmTier, ScriptedLlm, TokenBudget,
};
pub use proactive::{
    assess_risk, CostCategory, ExternalEvent, KnowledgeGap, ProbeGenerator, RiskAction,
    StarterGenerator,
};
pub use query::{ContextAssembler, ContextBlock, NlPlanner, QuerySpec};
pub use queue::{
    ContextLevel, DeliveredItem, EnqueueOutcome, InboundQueue, InteractionEvent, ItemKind,
    ItemState, OutboundItem, OutboundQueue, ProbeRequest, Subtype,
};
pub use service::{
    Ack, ComponentStatus, ContextReply, CorrectionKind, Engram, HealthReport, ProbeOutcome,
    SnapshotExport, SnapshotFormat, UserCorrection,
};
pub use storage::{EdgeFilter, NodeFilter, RedbStorage, Storage, StorageStats, CURRENT_SCHEMA_VERSION};
pub use types::*;
pub use workers::{
    ClusteringWorker, DecayWorker, InferenceWorker, RevisionWorker, Verdict, Verifier,
};
