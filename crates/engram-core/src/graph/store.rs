use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditKind, AuditLog, Component, OpKind};
use crate::bus::{EventBus, GraphEvent};
use crate::config::{ConfidenceConfig, DecayRates};
use crate::confidence;
use crate::error::{EngramError, Result};
use crate::graph::{traversal, Subgraph, TraversalBudget, TraversalRequest};
use crate::storage::{EdgeFilter, NodeFilter, Storage};
use crate::types::{
    case_fold, Edge, EdgeId, Episode, EpisodeId, Node, NodeId, NodeKind, PrivacyLevel, Provenance,
    Relation, RetractionReason, TemporalType,
};

/// Parameters for a new edge.
#[derive(Debug, Clone)]
pub struct NewEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub relation: Relation,
    pub temporal: TemporalType,
    pub confidence: f32,
    pub provenance: Provenance,
    pub context_tags: Vec<String>,
    pub episode: Option<EpisodeId>,
    pub expiry: Option<DateTime<Utc>>,
    pub refines: Option<EdgeId>,
}

/// Full export of one user graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub taken_at: DateTime<Utc>,
    pub nodes: Vec<Node>,
    /// Active edges only. Retracted and archived history stays in the
    /// audit log, not in exports.
    pub edges: Vec<Edge>,
    pub episodes: Vec<Episode>,
}

impl GraphSnapshot {
    /// Render as GraphML for the visualization surface.
    pub fn to_graphml(&self) -> String {
        let mut out = String::new();
        out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        out.push_str("<graphml xmlns=\"http://graphml.graphdrawing.org/xmlns\">\n");
        out.push_str("  <key id=\"kind\" for=\"node\" attr.name=\"kind\" attr.type=\"string\"/>\n");
        out.push_str("  <key id=\"name\" for=\"node\" attr.name=\"name\" attr.type=\"string\"/>\n");
        out.push_str(
            "  <key id=\"relation\" for=\"edge\" attr.name=\"relation\" attr.type=\"string\"/>\n",
        );
        out.push_str(
            "  <key id=\"confidence\" for=\"edge\" attr.name=\"confidence\" attr.type=\"double\"/>\n",
        );
        out.push_str("  <graph id=\"engram\" edgedefault=\"directed\">\n");
        for node in &self.nodes {
            out.push_str(&format!(
                "    <node id=\"{}\"><data key=\"kind\">{}</data><data key=\"name\">{}</data></node>\n",
                node.id,
                node.kind,
                xml_escape(&node.name)
            ));
        }
        for edge in &self.edges {
            out.push_str(&format!(
                "    <edge source=\"{}\" target=\"{}\"><data key=\"relation\">{}</data><data key=\"confidence\">{:.3}</data></edge>\n",
                edge.source, edge.target, edge.relation, edge.confidence
            ));
        }
        out.push_str("  </graph>\n</graphml>\n");
        out
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Provenance chain for one edge: the episodes that produced it and the
/// general edge it refines, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceChain {
    pub edge: Edge,
    pub episodes: Vec<Episode>,
    pub refines: Option<Edge>,
}

/// Typed temporal weighted graph over a [`Storage`] backend.
///
/// All mutations flow through here so that invariants are enforced in
/// one place and every change reaches the event bus and the audit log.
/// The service serializes calls through its single writer task; reads
/// are snapshot-consistent against the backend.
pub struct GraphStore<S: Storage> {
    storage: Arc<S>,
    bus: Arc<EventBus>,
    audit: Arc<AuditLog>,
    confidence: ConfidenceConfig,
    decay_rates: DecayRates,
    budget: TraversalBudget,
    /// Bumped on every committed mutation. Cheap cache invalidation for
    /// the context assembler.
    version: Arc<AtomicU64>,
}

impl<S: Storage> GraphStore<S> {
    pub fn new(
        storage: Arc<S>,
        bus: Arc<EventBus>,
        audit: Arc<AuditLog>,
        confidence: ConfidenceConfig,
        decay_rates: DecayRates,
    ) -> Self {
        Self {
            storage,
            bus,
            audit,
            confidence,
            decay_rates,
            budget: TraversalBudget::default(),
            version: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    pub fn version_counter(&self) -> Arc<AtomicU64> {
        self.version.clone()
    }

    fn bump_version(&self) {
        self.version.fetch_add(1, Ordering::Relaxed);
    }

    // === Node operations ===

    /// Insert a node or merge onto the existing representative when an
    /// alias overlaps a node of the same kind. Returns the representative
    /// id either way.
    pub fn upsert_node(
        &self,
        correlation_id: Uuid,
        kind: NodeKind,
        name: &str,
        aliases: &[String],
        properties: &[(String, String)],
        privacy: PrivacyLevel,
    ) -> Result<NodeId> {
        let mut candidate_aliases: Vec<String> = vec![case_fold(name)];
        for alias in aliases {
            let folded = case_fold(alias);
            if !folded.is_empty() && !candidate_aliases.contains(&folded) {
                candidate_aliases.push(folded);
            }
        }

        // Find an existing representative through any overlapping alias.
        let mut representative: Option<Node> = None;
        for alias in &candidate_aliases {
            if let Some(existing_id) = self.storage.find_by_alias(alias)? {
                if let Some(existing) = self.storage.get_node(existing_id)? {
                    if existing.kind == kind {
                        representative = Some(existing);
                        break;
                    }
                }
            }
        }

        if let Some(mut node) = representative {
            let before = node.clone();
            for alias in &candidate_aliases {
                // An alias already bound to a different node stays there;
                // aliases are a function.
                match self.storage.find_by_alias(alias)? {
                    Some(owner) if owner != node.id => continue,
                    _ => node.add_alias(alias),
                }
            }
            for (key, value) in properties {
                node.properties
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
            node.raise_privacy(privacy);

            if node != before {
                self.storage.put_node(&node)?;
                self.audit.log(
                    AuditEntry::new(correlation_id, AuditKind::NodeUpdated, Component::GraphStore)
                        .with_target(node.id)
                        .with_values(Some(before.name.clone()), Some(node.name.clone())),
                )?;
                self.bus.emit(GraphEvent::NodeUpdated(node.clone()));
                self.bump_version();
            }
            return Ok(node.id);
        }

        let mut node = Node::new(kind, name, privacy);
        for alias in &candidate_aliases {
            if self.storage.find_by_alias(alias)?.is_none() {
                node.add_alias(alias);
            }
        }
        for (key, value) in properties {
            node.properties.insert(key.clone(), value.clone());
        }

        self.storage.put_node(&node)?;
        self.audit.log(
            AuditEntry::new(correlation_id, AuditKind::NodeInserted, Component::GraphStore)
                .with_operation(OpKind::Insert)
                .with_target(node.id)
                .with_values(None, Some(node.name.clone())),
        )?;
        self.bus.emit(GraphEvent::NodeAdded(node.clone()));
        self.bump_version();
        debug!("upsert_node: created {} '{}'", node.kind, node.name);
        Ok(node.id)
    }

    /// Create an edge. Both endpoints must exist first; an edge is never
    /// visible before its nodes.
    pub fn create_edge(&self, correlation_id: Uuid, params: NewEdge) -> Result<Edge> {
        let source =
            self.storage
                .get_node(params.source)?
                .ok_or(EngramError::InvariantViolation {
                    reason: format!("edge source {} does not exist", params.source),
                })?;
        let target =
            self.storage
                .get_node(params.target)?
                .ok_or(EngramError::InvariantViolation {
                    reason: format!("edge target {} does not exist", params.target),
                })?;

        // A sealed node never links to public knowledge.
        if (source.privacy == PrivacyLevel::L4Sealed && target.privacy == PrivacyLevel::L0Public)
            || (target.privacy == PrivacyLevel::L4Sealed
                && source.privacy == PrivacyLevel::L0Public)
        {
            return Err(EngramError::InvariantViolation {
                reason: "edge would link a sealed node to a public node".to_string(),
            });
        }

        let mut edge = Edge::new(
            params.source,
            params.target,
            params.relation,
            params.temporal,
            confidence::clamp(&self.confidence, params.confidence),
            params.provenance,
            params.episode,
        );
        edge.context_tags = params.context_tags;
        edge.expiry = params.expiry;
        edge.refines = params.refines;
        edge.decay_rate =
            confidence::decay_rate(&self.confidence, &self.decay_rates, params.temporal);

        self.storage.put_edge(&edge)?;
        if let Some(episode_id) = params.episode {
            self.link_episode(episode_id, edge.id)?;
        }

        self.audit.log(
            AuditEntry::new(correlation_id, AuditKind::EdgeInserted, Component::GraphStore)
                .with_operation(OpKind::Insert)
                .with_target(edge.id)
                .with_values(None, Some(describe_edge(&edge)))
                .with_confidence(None, Some(edge.confidence))
                .with_mechanism(edge.provenance),
        )?;
        self.bus.emit(GraphEvent::EdgeAdded(edge.clone()));
        self.bump_version();
        Ok(edge)
    }

    /// Reinforce an existing edge with a new confidence and episode.
    pub fn reinforce_edge(
        &self,
        correlation_id: Uuid,
        edge_id: EdgeId,
        new_confidence: f32,
        episode: EpisodeId,
    ) -> Result<Edge> {
        let mut edge = self
            .storage
            .get_edge(edge_id)?
            .ok_or(EngramError::EdgeNotFound(edge_id))?;
        let before = edge.confidence;

        edge.reinforce_from(confidence::clamp(&self.confidence, new_confidence), episode);
        self.storage.put_edge(&edge)?;
        self.link_episode(episode, edge.id)?;
        self.touch_endpoints(&edge)?;

        self.audit.log(
            AuditEntry::new(
                correlation_id,
                AuditKind::EdgeReinforced,
                Component::GraphStore,
            )
            .with_operation(OpKind::Reinforce)
            .with_target(edge.id)
            .with_confidence(Some(before), Some(edge.confidence))
            .with_mechanism(edge.provenance),
        )?;
        self.bus.emit(GraphEvent::EdgeUpdated(edge.clone()));
        self.bump_version();
        Ok(edge)
    }

    /// Retract-by-revision: mark the old edge superseded and write its
    /// replacement pointing at the new target.
    pub fn revise_edge(
        &self,
        correlation_id: Uuid,
        edge_id: EdgeId,
        new_target: NodeId,
        new_confidence: f32,
        episode: Option<EpisodeId>,
        reason: RetractionReason,
    ) -> Result<Edge> {
        let mut old = self
            .storage
            .get_edge(edge_id)?
            .ok_or(EngramError::EdgeNotFound(edge_id))?;

        // A revision without its own episode keeps the old edge's
        // provenance chain alive.
        let episode = episode.or_else(|| old.source_episodes.first().copied());

        let replacement = self.create_edge(
            correlation_id,
            NewEdge {
                source: old.source,
                target: new_target,
                relation: old.relation.clone(),
                temporal: old.temporal,
                confidence: new_confidence,
                provenance: old.provenance,
                context_tags: old.context_tags.clone(),
                episode,
                // A revision changes the value, not the time bound.
                expiry: old.expiry,
                refines: None,
            },
        )?;

        old.retract(reason);
        self.storage.put_edge(&old)?;

        self.audit.log(
            AuditEntry::new(correlation_id, AuditKind::EdgeRetracted, Component::GraphStore)
                .with_operation(OpKind::Revise)
                .with_target(old.id)
                .with_values(Some(describe_edge(&old)), Some(describe_edge(&replacement)))
                .with_confidence(Some(old.confidence), Some(replacement.confidence))
                .with_reasoning(reason.as_str().to_string()),
        )?;
        self.bus.emit(GraphEvent::EdgeRetracted(old));
        self.bump_version();
        Ok(replacement)
    }

    /// Retract an edge without replacement (user request, verification
    /// failure, obsolescence).
    pub fn retract_edge(
        &self,
        correlation_id: Uuid,
        edge_id: EdgeId,
        reason: RetractionReason,
    ) -> Result<Edge> {
        let mut edge = self
            .storage
            .get_edge(edge_id)?
            .ok_or(EngramError::EdgeNotFound(edge_id))?;
        edge.retract(reason);
        self.storage.put_edge(&edge)?;

        self.audit.log(
            AuditEntry::new(correlation_id, AuditKind::EdgeRetracted, Component::GraphStore)
                .with_operation(OpKind::Revise)
                .with_target(edge.id)
                .with_reasoning(reason.as_str().to_string()),
        )?;
        self.bus.emit(GraphEvent::EdgeRetracted(edge.clone()));
        self.bump_version();
        Ok(edge)
    }

    /// Archive an edge whose confidence decayed below the threshold.
    pub fn archive_edge(&self, correlation_id: Uuid, edge_id: EdgeId) -> Result<Edge> {
        let mut edge = self
            .storage
            .get_edge(edge_id)?
            .ok_or(EngramError::EdgeNotFound(edge_id))?;
        edge.archived = true;
        self.storage.put_edge(&edge)?;

        self.audit.log(
            AuditEntry::new(correlation_id, AuditKind::EdgeArchived, Component::GraphStore)
                .with_operation(OpKind::Archive)
                .with_target(edge.id)
                .with_confidence(Some(edge.confidence), Some(edge.confidence)),
        )?;
        self.bus.emit(GraphEvent::EdgeArchived(edge.clone()));
        self.bump_version();
        Ok(edge)
    }

    /// Persist a confidence change from the decay cycle without any
    /// episode attribution.
    pub fn apply_decay(
        &self,
        correlation_id: Uuid,
        edge_id: EdgeId,
        new_confidence: f32,
    ) -> Result<Edge> {
        let mut edge = self
            .storage
            .get_edge(edge_id)?
            .ok_or(EngramError::EdgeNotFound(edge_id))?;
        let before = edge.confidence;
        edge.confidence = confidence::clamp(&self.confidence, new_confidence);
        self.storage.put_edge(&edge)?;

        self.audit.log(
            AuditEntry::new(correlation_id, AuditKind::EdgeRevised, Component::DecayWorker)
                .with_target(edge.id)
                .with_confidence(Some(before), Some(edge.confidence)),
        )?;
        self.bus.emit(GraphEvent::EdgeUpdated(edge.clone()));
        self.bump_version();
        Ok(edge)
    }

    /// Physical deletion. User erasure only; the audit record carries
    /// metadata, never the deleted payload.
    pub fn delete_node(&self, correlation_id: Uuid, node_id: NodeId, cascade: bool) -> Result<()> {
        let node = self
            .storage
            .get_node(node_id)?
            .ok_or(EngramError::NodeNotFound(node_id))?;

        if cascade {
            let mut touching = self.storage.edges_from(node_id)?;
            touching.extend(self.storage.edges_to(node_id)?);
            for edge in touching {
                self.storage.remove_edge(edge.id)?;
                self.audit.log(
                    AuditEntry::new(
                        correlation_id,
                        AuditKind::EdgeRetracted,
                        Component::GraphStore,
                    )
                    .with_operation(OpKind::Delete)
                    .with_target(edge.id),
                )?;
            }
        }

        self.storage.remove_node(node_id)?;
        self.audit.log(
            AuditEntry::new(correlation_id, AuditKind::NodeDeleted, Component::GraphStore)
                .with_operation(OpKind::Delete)
                .with_target(node.id),
        )?;
        self.bump_version();
        Ok(())
    }

    pub fn record_episode(&self, correlation_id: Uuid, episode: &Episode) -> Result<()> {
        self.storage.put_episode(episode)?;
        self.audit.log(
            AuditEntry::new(
                correlation_id,
                AuditKind::EpisodeRecorded,
                Component::GraphStore,
            )
            .with_target(episode.id)
            .with_session(episode.session_id.clone()),
        )?;
        Ok(())
    }

    fn link_episode(&self, episode_id: EpisodeId, edge_id: EdgeId) -> Result<()> {
        if let Some(mut episode) = self.storage.get_episode(episode_id)? {
            if !episode.edge_ids.contains(&edge_id) {
                episode.edge_ids.push(edge_id);
                self.storage.put_episode(&episode)?;
            }
        }
        Ok(())
    }

    fn touch_endpoints(&self, edge: &Edge) -> Result<()> {
        let now = Utc::now();
        for id in [edge.source, edge.target] {
            if let Some(mut node) = self.storage.get_node(id)? {
                node.last_reinforced = now;
                self.storage.put_node(&node)?;
            }
        }
        Ok(())
    }

    // === Query operations ===

    pub fn get_node(&self, id: NodeId) -> Result<Option<Node>> {
        self.storage.get_node(id)
    }

    pub fn get_edge(&self, id: EdgeId) -> Result<Option<Edge>> {
        self.storage.get_edge(id)
    }

    pub fn get_episode(&self, id: EpisodeId) -> Result<Option<Episode>> {
        self.storage.get_episode(id)
    }

    pub fn resolve_alias(&self, name: &str) -> Result<Option<NodeId>> {
        self.storage.find_by_alias(name)
    }

    pub fn find_nodes(&self, filter: NodeFilter) -> Result<Vec<Node>> {
        self.storage.list_nodes(filter)
    }

    pub fn edges(&self, filter: EdgeFilter) -> Result<Vec<Edge>> {
        self.storage.list_edges(filter)
    }

    /// Filtered BFS from a single node.
    pub fn neighbors(
        &self,
        node_id: NodeId,
        max_hops: u32,
        relation_filter: Option<Vec<Relation>>,
        min_confidence: Option<f32>,
    ) -> Result<Subgraph> {
        self.traverse(TraversalRequest {
            seeds: vec![node_id],
            max_hops,
            relation_filter,
            min_confidence,
            ..Default::default()
        })
    }

    pub fn traverse(&self, request: TraversalRequest) -> Result<Subgraph> {
        traversal::traverse(self.storage.as_ref(), request, &self.budget)
    }

    /// Full export. Active edges only.
    pub fn snapshot(&self) -> Result<GraphSnapshot> {
        let nodes = self.storage.list_nodes(NodeFilter::new())?;
        let edges = self.storage.list_edges(EdgeFilter::new())?;
        let episodes = self.storage.list_episodes(None, None)?;
        Ok(GraphSnapshot {
            taken_at: Utc::now(),
            nodes,
            edges,
            episodes,
        })
    }

    /// The provenance chain behind one edge.
    pub fn provenance(&self, edge_id: EdgeId) -> Result<ProvenanceChain> {
        let edge = self
            .storage
            .get_edge(edge_id)?
            .ok_or(EngramError::EdgeNotFound(edge_id))?;
        let mut episodes = Vec::new();
        for episode_id in &edge.source_episodes {
            if let Some(episode) = self.storage.get_episode(*episode_id)? {
                episodes.push(episode);
            }
        }
        let refines = match edge.refines {
            Some(general_id) => self.storage.get_edge(general_id)?,
            None => None,
        };
        Ok(ProvenanceChain {
            edge,
            episodes,
            refines,
        })
    }

    pub fn stats(&self) -> Result<crate::storage::StorageStats> {
        self.storage.stats()
    }
}

fn describe_edge(edge: &Edge) -> String {
    format!(
        "{} -{}-> {} ({}, {:.2})",
        edge.source,
        edge.relation,
        edge.target,
        edge.temporal.as_str(),
        edge.confidence
    )
}
