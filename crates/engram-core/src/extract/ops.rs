//! Stage 7 output: the proposed operations handed to the diff engine.
//! Endpoints are referenced by name; the diff engine resolves them
//! through the alias index (and creates missing nodes) at apply time,
//! inside the single writer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{NodeKind, PrivacyLevel, Provenance, Relation, TemporalType};

/// A node the pipeline wants present, with whatever richness the
/// entity stage recovered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposedNode {
    pub kind: NodeKind,
    pub name: String,
    pub aliases: Vec<String>,
    pub properties: Vec<(String, String)>,
    pub privacy: PrivacyLevel,
}

/// A fact the pipeline asserts. The diff engine classifies it as
/// INSERT / REINFORCE / CONTRADICT / SKIP / MERGE against the graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposedFact {
    pub subject: String,
    pub subject_kind: NodeKind,
    pub relation: Relation,
    pub object: String,
    pub object_kind: NodeKind,
    pub temporal: TemporalType,
    pub confidence: f32,
    pub provenance: Provenance,
    pub context_tags: Vec<String>,
    pub expiry: Option<DateTime<Utc>>,
    /// Set when this fact refines a more general one
    /// ("prefers Malbec 2018" refining "loves Malbec").
    pub refines: Option<GeneralFact>,
    /// Nearest-subject binding was ambiguous; confidence is capped.
    pub attribution_uncertain: bool,
    /// "John thinks X": the relation belongs to John, flagged secondhand.
    pub secondhand: bool,
}

/// Reference to the general fact a refinement narrows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralFact {
    pub subject: String,
    pub relation: Relation,
    pub object: String,
}

/// A retraction the user asked for ("forget what I said about ...").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposedRetraction {
    pub subject: String,
    pub relation: Option<Relation>,
    pub object: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ProposedOp {
    UpsertNode(ProposedNode),
    AssertFact(ProposedFact),
    Retract(ProposedRetraction),
}

impl ProposedOp {
    pub fn describe(&self) -> String {
        match self {
            ProposedOp::UpsertNode(node) => format!("upsert {} '{}'", node.kind, node.name),
            ProposedOp::AssertFact(fact) => format!(
                "{} -{}-> {} ({:.2})",
                fact.subject, fact.relation, fact.object, fact.confidence
            ),
            ProposedOp::Retract(retraction) => match &retraction.relation {
                Some(relation) => format!("retract {} -{}->", retraction.subject, relation),
                None => format!("retract facts about {}", retraction.subject),
            },
        }
    }
}
