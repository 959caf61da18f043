use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Type alias for node identifiers
pub type NodeId = Uuid;

/// Type alias for edge identifiers
pub type EdgeId = Uuid;

/// Type alias for episode identifiers
pub type EpisodeId = Uuid;

/// Case-fold a name or alias for equivalence-class matching.
/// Two nodes of the same kind with overlapping folded aliases are the
/// same entity.
pub fn case_fold(s: &str) -> String {
    s.trim().to_lowercase()
}

/// An entity in the knowledge graph
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    /// Unique identifier. UUIDv7 for time-sortability.
    pub id: NodeId,

    /// What kind of entity this represents.
    pub kind: NodeKind,

    /// Canonical display name.
    pub name: String,

    /// Case-folded aliases, including the folded canonical name.
    /// Aliases are a function: each alias maps to exactly one
    /// representative node.
    pub aliases: Vec<String>,

    /// Small property bag typed by kind (e.g. a person's pronouns,
    /// a place's city). Values are plain strings.
    pub properties: HashMap<String, String>,

    /// Privacy level. Monotonically sticky — derivations may raise it,
    /// never lower it implicitly.
    pub privacy: PrivacyLevel,

    /// When this entity was first created.
    pub created_at: DateTime<Utc>,

    /// Last time an edge touching this node was reinforced.
    pub last_reinforced: DateTime<Utc>,
}

/// The closed set of entity kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A human the user talks about (or the user themselves).
    Person,

    /// A company, team, or institution.
    Organization,

    /// A physical or named location.
    Place,

    /// Software, devices, products.
    Tool,

    /// An abstract topic or category ("wine", "code review").
    Concept,

    /// One interaction that contributed edges. See [`Episode`] for the
    /// full record; episode nodes exist so provenance is traversable.
    Episode,

    /// A derived generalization over episodes
    /// ("prefers diff-style reviews with three lines of context").
    Experience,

    /// A learned how-to distilled from repeated episodes.
    Procedure,

    /// A standing like/dislike.
    Preference,

    /// A scoping context (a project, a recurring situation).
    Context,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Person => "person",
            NodeKind::Organization => "organization",
            NodeKind::Place => "place",
            NodeKind::Tool => "tool",
            NodeKind::Concept => "concept",
            NodeKind::Episode => "episode",
            NodeKind::Experience => "experience",
            NodeKind::Procedure => "procedure",
            NodeKind::Preference => "preference",
            NodeKind::Context => "context",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "person" => Some(NodeKind::Person),
            "organization" | "org" => Some(NodeKind::Organization),
            "place" => Some(NodeKind::Place),
            "tool" => Some(NodeKind::Tool),
            "concept" => Some(NodeKind::Concept),
            "episode" => Some(NodeKind::Episode),
            "experience" => Some(NodeKind::Experience),
            "procedure" => Some(NodeKind::Procedure),
            "preference" => Some(NodeKind::Preference),
            "context" => Some(NodeKind::Context),
            _ => None,
        }
    }

    /// Kinds whose edges carry temporal scope worth decaying.
    pub fn carries_temporal_scope(self) -> bool {
        !matches!(self, NodeKind::Episode)
    }

    /// Kinds eligible as endpoints in the inference cycle's pattern walks.
    pub fn participates_in_inference(self) -> bool {
        matches!(
            self,
            NodeKind::Person
                | NodeKind::Organization
                | NodeKind::Place
                | NodeKind::Tool
                | NodeKind::Concept
                | NodeKind::Preference
        )
    }

    /// Kinds included in full graph exports.
    pub fn exportable(self) -> bool {
        true
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Privacy levels, ordered. L0 is public, L4 is sealed.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
pub enum PrivacyLevel {
    /// Public knowledge, shareable anywhere.
    #[default]
    L0Public,
    /// Platform-internal.
    L1Platform,
    /// Personal but not sensitive.
    L2Personal,
    /// Private. Never leaves the user's graph.
    L3Private,
    /// Sealed. Excluded from exports and context blocks.
    L4Sealed,
}

impl PrivacyLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            PrivacyLevel::L0Public => "L0",
            PrivacyLevel::L1Platform => "L1",
            PrivacyLevel::L2Personal => "L2",
            PrivacyLevel::L3Private => "L3",
            PrivacyLevel::L4Sealed => "L4",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "L0" | "PUBLIC" => Some(PrivacyLevel::L0Public),
            "L1" | "PLATFORM" => Some(PrivacyLevel::L1Platform),
            "L2" | "PERSONAL" => Some(PrivacyLevel::L2Personal),
            "L3" | "PRIVATE" => Some(PrivacyLevel::L3Private),
            "L4" | "SEALED" => Some(PrivacyLevel::L4Sealed),
            _ => None,
        }
    }
}

/// A typed relation name from the curated vocabulary.
/// Open string, validated: lowercase ascii, digits, underscores.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Relation(String);

impl Relation {
    pub fn new(s: &str) -> std::result::Result<Self, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("Relation must not be empty".to_string());
        }
        if s.len() > 64 {
            return Err(format!("Relation '{}' exceeds 64 characters", s));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(format!(
                "Relation '{}' contains invalid characters (only lowercase, digits and underscores allowed)",
                s
            ));
        }
        Ok(Relation(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Temporal scope of an edge. Drives the decay rate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TemporalType {
    /// Near-permanent ("is married to"). Decays slowly.
    Trait,
    /// Time-bounded fact ("works at"). Default.
    State,
    /// A desire with an implicit or explicit expiry.
    Wish,
    /// One-time event. Decays fast.
    Episode,
}

impl TemporalType {
    pub fn as_str(self) -> &'static str {
        match self {
            TemporalType::Trait => "trait",
            TemporalType::State => "state",
            TemporalType::Wish => "wish",
            TemporalType::Episode => "episode",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trait" => Some(TemporalType::Trait),
            "state" => Some(TemporalType::State),
            "wish" => Some(TemporalType::Wish),
            "episode" => Some(TemporalType::Episode),
            _ => None,
        }
    }
}

/// How a fact entered the graph. Determines the base confidence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Stated outright by the user.
    Explicit,
    /// Observed from behavior rather than stated.
    Observational,
    /// Hypothesized by the inference cycle.
    Inferential,
    /// Promoted by episode clustering.
    Reflective,
    /// Authored by an explicit user correction. Never confidence-gated.
    UserCorrection,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Provenance::Explicit => "explicit",
            Provenance::Observational => "observational",
            Provenance::Inferential => "inferential",
            Provenance::Reflective => "reflective",
            Provenance::UserCorrection => "user_correction",
        }
    }
}

/// Why a retracted edge was retracted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetractionReason {
    /// Replaced by a contradicting fact with higher confidence.
    Superseded,
    /// The user asked to forget it.
    UserRequest,
    /// The revision cycle's external verifier disagreed.
    VerificationFailed,
    /// Delivery window or relevance lapsed.
    Obsolete,
}

impl RetractionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RetractionReason::Superseded => "superseded",
            RetractionReason::UserRequest => "user_request",
            RetractionReason::VerificationFailed => "verification_failed",
            RetractionReason::Obsolete => "obsolete",
        }
    }
}

/// A typed, directed, weighted, temporally-scoped relation between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    /// Unique identifier. UUIDv7.
    pub id: EdgeId,

    /// Source node.
    pub source: NodeId,

    /// Target node.
    pub target: NodeId,

    /// What this relation means.
    pub relation: Relation,

    /// Belief that this edge is currently true, in [0, C_max].
    pub confidence: f32,

    /// Temporal scope.
    pub temporal: TemporalType,

    /// When this fact was first observed.
    pub first_observed: DateTime<Utc>,

    /// Last time this fact was reinforced.
    pub last_reinforced: DateTime<Utc>,

    /// Decay rate per 30-day period since last reinforcement.
    pub decay_rate: f32,

    /// Small set of tags scoping relevance ("wine", "work").
    pub context_tags: Vec<String>,

    /// Episodes this edge was derived from or reinforced by.
    /// Empty only for user_correction provenance.
    pub source_episodes: Vec<EpisodeId>,

    /// How this fact entered the graph.
    pub provenance: Provenance,

    /// Optional expiry for bounded facts and wishes.
    pub expiry: Option<DateTime<Utc>>,

    /// Retracted edges stay for audit but never answer queries.
    pub retracted: bool,

    /// Set when `retracted` is true.
    pub retraction_reason: Option<RetractionReason>,

    /// Archived when confidence decays below the archival threshold.
    pub archived: bool,

    /// For MERGE-classified refinements: the general edge this one refines.
    pub refines: Option<EdgeId>,
}

impl Edge {
    pub fn new(
        source: NodeId,
        target: NodeId,
        relation: Relation,
        temporal: TemporalType,
        confidence: f32,
        provenance: Provenance,
        episode: Option<EpisodeId>,
    ) -> Self {
        let now = Utc::now();
        Edge {
            id: Uuid::now_v7(),
            source,
            target,
            relation,
            confidence: confidence.clamp(0.0, 1.0),
            temporal,
            first_observed: now,
            last_reinforced: now,
            decay_rate: 0.0,
            context_tags: Vec::new(),
            source_episodes: episode.into_iter().collect(),
            provenance,
            expiry: None,
            retracted: false,
            retraction_reason: None,
            archived: false,
            refines: None,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.source == self.target {
            return Err("Self-edges are not allowed".to_string());
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!(
                "Confidence {} out of range [0.0, 1.0]",
                self.confidence
            ));
        }
        if self.source_episodes.is_empty() && self.provenance != Provenance::UserCorrection {
            return Err("Edge has no source episode and is not a user correction".to_string());
        }
        if self.retracted && self.retraction_reason.is_none() {
            return Err("Retracted edge carries no retraction reason".to_string());
        }
        Ok(())
    }

    /// Active means visible to queries: not retracted, not archived,
    /// not past its expiry.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.retracted && !self.archived && self.expiry.map_or(true, |e| e > now)
    }

    /// Record a reinforcement from an episode.
    pub fn reinforce_from(&mut self, new_confidence: f32, episode: EpisodeId) {
        self.confidence = new_confidence.clamp(0.0, 1.0);
        self.last_reinforced = Utc::now();
        if !self.source_episodes.contains(&episode) {
            self.source_episodes.push(episode);
        }
    }

    pub fn retract(&mut self, reason: RetractionReason) {
        self.retracted = true;
        self.retraction_reason = Some(reason);
    }
}

impl Node {
    pub fn new(kind: NodeKind, name: impl Into<String>, privacy: PrivacyLevel) -> Self {
        let name = name.into();
        let now = Utc::now();
        Node {
            id: Uuid::now_v7(),
            kind,
            aliases: vec![case_fold(&name)],
            name,
            properties: HashMap::new(),
            privacy,
            created_at: now,
            last_reinforced: now,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Node name must not be empty".to_string());
        }
        if self.name.chars().count() > 256 {
            return Err("Node name exceeds 256 characters".to_string());
        }
        for alias in &self.aliases {
            if alias != &case_fold(alias) {
                return Err(format!("Alias '{}' is not case-folded", alias));
            }
        }
        Ok(())
    }

    /// Add an alias, case-folded, deduplicated.
    pub fn add_alias(&mut self, alias: &str) {
        let folded = case_fold(alias);
        if !folded.is_empty() && !self.aliases.contains(&folded) {
            self.aliases.push(folded);
        }
    }

    pub fn matches_alias(&self, name: &str) -> bool {
        self.aliases.contains(&case_fold(name))
    }

    /// Raise privacy, never lower. Sticky by invariant.
    pub fn raise_privacy(&mut self, level: PrivacyLevel) {
        if level > self.privacy {
            self.privacy = level;
        }
    }
}

/// A compact record of one interaction that produced one or more edges.
/// Retained for provenance queries after the utterance text is discarded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Episode {
    /// Unique identifier. UUIDv7.
    pub id: EpisodeId,

    /// When the interaction occurred.
    pub occurred_at: DateTime<Utc>,

    /// Session the interaction belongs to.
    pub session_id: String,

    /// Turn number within the session.
    pub turn: u32,

    /// Channel tag ("chat", "voice").
    pub channel: String,

    /// Sentiment of the interaction, [-1, 1].
    pub sentiment: f32,

    /// Outcome score, [0, 1]. 0.5 until feedback arrives.
    pub outcome: f32,

    /// Edges this episode contributed to.
    pub edge_ids: Vec<EdgeId>,
}

impl Episode {
    pub fn new(session_id: impl Into<String>, turn: u32, channel: impl Into<String>) -> Self {
        Episode {
            id: Uuid::now_v7(),
            occurred_at: Utc::now(),
            session_id: session_id.into(),
            turn,
            channel: channel.into(),
            sentiment: 0.0,
            outcome: 0.5,
            edge_ids: Vec::new(),
        }
    }

    /// Idempotency key for the originating interaction.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.session_id, self.turn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_matching_is_case_folded() {
        let mut node = Node::new(NodeKind::Person, "Lena", PrivacyLevel::L2Personal);
        node.add_alias("Lena Petrova");
        assert!(node.matches_alias("LENA"));
        assert!(node.matches_alias("  lena petrova "));
        assert!(!node.matches_alias("Boris"));
    }

    #[test]
    fn add_alias_deduplicates() {
        let mut node = Node::new(NodeKind::Person, "Lena", PrivacyLevel::L2Personal);
        node.add_alias("LENA");
        node.add_alias("lena");
        assert_eq!(node.aliases.len(), 1);
    }

    #[test]
    fn privacy_is_sticky() {
        let mut node = Node::new(NodeKind::Person, "Lena", PrivacyLevel::L3Private);
        node.raise_privacy(PrivacyLevel::L1Platform);
        assert_eq!(node.privacy, PrivacyLevel::L3Private);
        node.raise_privacy(PrivacyLevel::L4Sealed);
        assert_eq!(node.privacy, PrivacyLevel::L4Sealed);
    }

    #[test]
    fn relation_rejects_invalid_names() {
        assert!(Relation::new("works_at").is_ok());
        assert!(Relation::new("").is_err());
        assert!(Relation::new("Works At").is_err());
        assert!(Relation::new("has-a").is_err());
    }

    #[test]
    fn edge_without_episode_fails_validation() {
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        let edge = Edge::new(
            a,
            b,
            Relation::new("prefers").unwrap(),
            TemporalType::Trait,
            0.9,
            Provenance::Explicit,
            None,
        );
        assert!(edge.validate().is_err());

        let corrected = Edge::new(
            a,
            b,
            Relation::new("prefers").unwrap(),
            TemporalType::Trait,
            0.9,
            Provenance::UserCorrection,
            None,
        );
        assert!(corrected.validate().is_ok());
    }

    #[test]
    fn expired_edge_is_inactive() {
        let mut edge = Edge::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            Relation::new("planning").unwrap(),
            TemporalType::Wish,
            0.6,
            Provenance::Explicit,
            Some(Uuid::now_v7()),
        );
        assert!(edge.is_active(Utc::now()));
        edge.expiry = Some(Utc::now() - chrono::Duration::days(1));
        assert!(!edge.is_active(Utc::now()));
    }
}
