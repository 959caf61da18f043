//! Stage 3: relation extraction, its special cases, and the same
//! hallucination discipline as stage 2.

use serde_json::Value;

use crate::extract::ops::GeneralFact;
use crate::types::{case_fold, NodeKind, Relation};

#[derive(Debug, Clone)]
pub struct ExtractedRelation {
    pub subject: String,
    pub subject_kind: NodeKind,
    pub relation: Relation,
    pub object: String,
    pub object_kind: NodeKind,
    pub tags: Vec<String>,
    pub hypothetical: bool,
    pub sarcasm: bool,
    pub secondhand_source: Option<String>,
    pub speaker_agrees: bool,
    pub attribution_uncertain: bool,
    pub retraction: bool,
    pub refines: Option<GeneralFact>,
    /// Halved per hallucination warning touching this relation.
    pub confidence_factor: f32,
}

/// Parse the relation stage's repaired JSON. Invalid relation names and
/// empty endpoints drop the row rather than failing the stage.
pub fn parse_relations(value: &Value) -> Vec<ExtractedRelation> {
    let array = match value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("relations").and_then(|v| v.as_array()) {
            Some(items) => items.as_slice(),
            None => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    array
        .iter()
        .filter_map(|item| {
            let subject = item.get("subject")?.as_str()?.trim();
            let object = item.get("object").and_then(|v| v.as_str()).unwrap_or("");
            let relation_name = item.get("relation")?.as_str()?;
            let relation = Relation::new(&relation_name.trim().to_lowercase()).ok()?;
            let retraction = item
                .get("retraction")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if subject.is_empty() || (object.trim().is_empty() && !retraction) {
                return None;
            }

            let refines = item.get("refines").and_then(|r| {
                let subject = r.get("subject")?.as_str()?.to_string();
                let relation = Relation::new(r.get("relation")?.as_str()?).ok()?;
                let object = r.get("object")?.as_str()?.to_string();
                Some(GeneralFact {
                    subject,
                    relation,
                    object,
                })
            });

            Some(ExtractedRelation {
                subject: subject.to_string(),
                subject_kind: item
                    .get("subject_kind")
                    .and_then(|k| k.as_str())
                    .and_then(NodeKind::parse)
                    .unwrap_or(NodeKind::Person),
                relation,
                object: object.trim().to_string(),
                object_kind: item
                    .get("object_kind")
                    .and_then(|k| k.as_str())
                    .and_then(NodeKind::parse)
                    .unwrap_or(NodeKind::Concept),
                tags: item
                    .get("tags")
                    .and_then(|t| t.as_array())
                    .map(|list| {
                        list.iter()
                            .filter_map(|v| v.as_str())
                            .map(|s| s.to_lowercase())
                            .collect()
                    })
                    .unwrap_or_default(),
                hypothetical: item
                    .get("hypothetical")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
                sarcasm: item.get("sarcasm").and_then(|v| v.as_bool()).unwrap_or(false),
                secondhand_source: item
                    .get("secondhand_source")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
                speaker_agrees: item
                    .get("speaker_agrees")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
                attribution_uncertain: item
                    .get("attribution_uncertain")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
                retraction,
                refines,
                confidence_factor: 1.0,
            })
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct RelationVerification {
    pub warnings: Vec<String>,
    pub discarded: bool,
}

/// Verify relations: every endpoint must be grounded in the utterance,
/// the extracted entities, or the session's known-entities hint. "User"
/// is always grounded (the speaker).
pub fn verify_relations(
    relations: &mut Vec<ExtractedRelation>,
    utterance: &str,
    extracted_entities: &[String],
    known_entities: &[String],
    discard_count: u32,
) -> RelationVerification {
    let mut verification = RelationVerification::default();
    let folded_utterance = case_fold(utterance);
    let grounded: Vec<String> = extracted_entities
        .iter()
        .chain(known_entities.iter())
        .map(|e| case_fold(e))
        .collect();

    let is_grounded = |name: &str| -> bool {
        let folded = case_fold(name);
        folded == "user"
            || grounded.contains(&folded)
            || folded_utterance.contains(&folded)
    };

    relations.retain(|relation| {
        let subject_ok = is_grounded(&relation.subject);
        // Retractions only need a grounded subject.
        let object_ok = relation.retraction || is_grounded(&relation.object);
        if !subject_ok || !object_ok {
            verification.warnings.push(format!(
                "relation {} -{}-> {} references ungrounded endpoint",
                relation.subject, relation.relation, relation.object
            ));
            return false;
        }
        true
    });

    // Count plausibility mirrors the entity stage.
    let word_count = utterance.split_whitespace().count();
    let max_plausible = (word_count as f32 * 0.5).ceil() as usize;
    if relations.len() > max_plausible.max(1) {
        verification.warnings.push(format!(
            "implausible relation count {} for {} words",
            relations.len(),
            word_count
        ));
        for relation in relations.iter_mut() {
            relation.confidence_factor *= 0.5;
        }
        relations.truncate(max_plausible.max(1));
    }

    if verification.warnings.len() as u32 >= discard_count {
        verification.discarded = true;
        relations.clear();
    }

    verification
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!([{
            "subject": "Lena",
            "subject_kind": "person",
            "relation": "loves",
            "object": "Malbec",
            "object_kind": "concept",
            "tags": ["wine"],
        }])
    }

    #[test]
    fn parses_well_formed_relation() {
        let relations = parse_relations(&sample());
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].relation.as_str(), "loves");
        assert_eq!(relations[0].tags, vec!["wine"]);
    }

    #[test]
    fn invalid_relation_name_drops_row() {
        let value = json!([{"subject": "Lena", "relation": "Loves Wine!", "object": "Malbec"}]);
        assert!(parse_relations(&value).is_empty());
    }

    #[test]
    fn retraction_needs_no_object() {
        let value = json!([{
            "subject": "Lena",
            "relation": "age",
            "object": "",
            "retraction": true,
        }]);
        let relations = parse_relations(&value);
        assert_eq!(relations.len(), 1);
        assert!(relations[0].retraction);
    }

    #[test]
    fn ungrounded_endpoint_is_dropped() {
        let mut relations = parse_relations(&json!([{
            "subject": "Boris",
            "relation": "loves",
            "object": "Malbec",
        }]));
        let verification = verify_relations(
            &mut relations,
            "My wife Lena loves Malbec",
            &["Lena".to_string(), "Malbec".to_string()],
            &[],
            3,
        );
        assert!(relations.is_empty());
        assert_eq!(verification.warnings.len(), 1);
    }

    #[test]
    fn user_subject_is_always_grounded() {
        let mut relations = parse_relations(&json!([{
            "subject": "User",
            "relation": "married_to",
            "object": "Lena",
        }]));
        let verification = verify_relations(
            &mut relations,
            "My wife Lena loves Malbec",
            &["Lena".to_string()],
            &[],
            3,
        );
        assert_eq!(relations.len(), 1);
        assert!(verification.warnings.is_empty());
    }

    #[test]
    fn parses_refinement_reference() {
        let value = json!([{
            "subject": "Lena",
            "relation": "prefers",
            "object": "Malbec 2018",
            "refines": {"subject": "Lena", "relation": "loves", "object": "Malbec"},
        }]);
        let relations = parse_relations(&value);
        let refines = relations[0].refines.as_ref().unwrap();
        assert_eq!(refines.relation.as_str(), "loves");
    }
}
