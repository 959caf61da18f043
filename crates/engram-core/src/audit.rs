use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{EngramError, Result};
use crate::types::Provenance;

const AUDIT_TABLE: TableDefinition<u128, &[u8]> = TableDefinition::new("audit");

/// A single append-only record of a graph mutation or proactive decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When this was recorded.
    pub timestamp: DateTime<Utc>,
    /// Threads one interaction through every stage that touched it.
    pub correlation_id: Uuid,
    /// What happened.
    pub kind: AuditKind,
    /// Which component recorded it.
    pub component: Component,
    /// Diff classification, when the record describes a graph mutation.
    pub operation: Option<OpKind>,
    /// Affected node, edge, episode, or queue item.
    pub target_id: Option<Uuid>,
    /// Serialized value before the mutation. Deletion records carry
    /// metadata only, never the deleted payload.
    pub old_value: Option<String>,
    /// Serialized value after the mutation.
    pub new_value: Option<String>,
    pub confidence_before: Option<f32>,
    pub confidence_after: Option<f32>,
    /// Source mechanism of the mutating fact.
    pub mechanism: Option<Provenance>,
    pub session_id: Option<String>,
    /// Decision reasoning for proactive outputs.
    pub reasoning: Option<String>,
}

impl AuditEntry {
    pub fn new(correlation_id: Uuid, kind: AuditKind, component: Component) -> Self {
        Self {
            timestamp: Utc::now(),
            correlation_id,
            kind,
            component,
            operation: None,
            target_id: None,
            old_value: None,
            new_value: None,
            confidence_before: None,
            confidence_after: None,
            mechanism: None,
            session_id: None,
            reasoning: None,
        }
    }

    pub fn with_operation(mut self, op: OpKind) -> Self {
        self.operation = Some(op);
        self
    }

    pub fn with_target(mut self, id: Uuid) -> Self {
        self.target_id = Some(id);
        self
    }

    pub fn with_values(mut self, old: Option<String>, new: Option<String>) -> Self {
        self.old_value = old;
        self.new_value = new;
        self
    }

    pub fn with_confidence(mut self, before: Option<f32>, after: Option<f32>) -> Self {
        self.confidence_before = before;
        self.confidence_after = after;
        self
    }

    pub fn with_mechanism(mut self, mechanism: Provenance) -> Self {
        self.mechanism = Some(mechanism);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }
}

/// The closed set of audit event kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    NodeInserted,
    NodeUpdated,
    NodeDeleted,
    EdgeInserted,
    EdgeReinforced,
    EdgeRevised,
    EdgeRetracted,
    EdgeArchived,
    EdgeMerged,
    EdgeSkipped,
    EpisodeRecorded,
    InteractionSkipped,
    InteractionDeadLettered,
    HallucinationDetected,
    ExtractionFailed,
    CorrectionApplied,
    ProbeGenerated,
    ProbeDelivered,
    ProbeIgnored,
    ProbeDeflected,
    ProbeObsoleted,
    StarterGenerated,
    StarterDelivered,
    DecayCycleCompleted,
    RevisionCycleCompleted,
    InferenceCycleCompleted,
    ClusteringCycleCompleted,
    BreakerStateChanged,
}

impl std::fmt::Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_string(self).unwrap_or_default();
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// Which component wrote the record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    GraphStore,
    DiffEngine,
    ExtractionPipeline,
    InboundQueue,
    OutboundQueue,
    ProactiveEngine,
    DecayWorker,
    RevisionWorker,
    InferenceWorker,
    ClusteringWorker,
    QuerySurface,
    Service,
}

/// Diff classification attached to mutation records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum OpKind {
    Insert,
    Reinforce,
    Contradict,
    Revise,
    Merge,
    Skip,
    Delete,
    Archive,
}

/// Append-only audit log in a dedicated redb table, keyed by
/// (timestamp nanos << 32 | sequence) for time-ordered iteration.
pub struct AuditLog {
    db: Arc<Database>,
    /// Monotonic counter to disambiguate entries within the same nanosecond.
    seq: AtomicU64,
}

impl AuditLog {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            seq: AtomicU64::new(0),
        }
    }

    pub fn log(&self, entry: AuditEntry) -> Result<()> {
        let nanos = entry.timestamp.timestamp_nanos_opt().unwrap_or(0) as u128;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) as u128;
        let key = (nanos << 32) | (seq & 0xFFFF_FFFF);
        let value = serde_json::to_vec(&entry)
            .map_err(|e| EngramError::Validation(format!("Audit serialise: {}", e)))?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(AUDIT_TABLE)?;
            table.insert(key, value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Query audit entries with optional filters, oldest first.
    pub fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT_TABLE)?;

        let since_key = filter
            .since
            .and_then(|t| t.timestamp_nanos_opt())
            .map(|n| (n as u128) << 32)
            .unwrap_or(0);

        let mut entries = Vec::new();
        for result in table.range(since_key..)? {
            let (_, value) = result?;
            let entry = match serde_json::from_slice::<AuditEntry>(value.value()) {
                Ok(e) => e,
                Err(_) => continue, // skip corrupt entries
            };

            if let Some(correlation) = filter.correlation_id {
                if entry.correlation_id != correlation {
                    continue;
                }
            }
            if let Some(target) = filter.target_id {
                if entry.target_id != Some(target) {
                    continue;
                }
            }
            if let Some(kind) = filter.kind {
                if entry.kind != kind {
                    continue;
                }
            }
            if let Some(component) = filter.component {
                if entry.component != component {
                    continue;
                }
            }

            entries.push(entry);
            if let Some(limit) = filter.limit {
                if entries.len() >= limit {
                    break;
                }
            }
        }

        Ok(entries)
    }
}

/// Filter criteria for querying the audit log.
#[derive(Debug, Default, Clone)]
pub struct AuditFilter {
    pub since: Option<DateTime<Utc>>,
    pub correlation_id: Option<Uuid>,
    pub target_id: Option<Uuid>,
    pub kind: Option<AuditKind>,
    pub component: Option<Component>,
    pub limit: Option<usize>,
}
