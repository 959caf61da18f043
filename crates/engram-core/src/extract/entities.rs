//! Stage 2: entity extraction and its hallucination discipline.

use serde_json::Value;

use crate::types::{case_fold, NodeKind};

#[derive(Debug, Clone)]
pub struct ExtractedEntity {
    pub name: String,
    pub kind: NodeKind,
    pub aliases: Vec<String>,
    pub explicit: bool,
    pub claimed_new: bool,
    /// Halved per hallucination warning touching this entity.
    pub confidence_factor: f32,
}

/// Parse the entity stage's repaired JSON. Tolerates a bare array or an
/// object wrapping one under "entities".
pub fn parse_entities(value: &Value) -> Vec<ExtractedEntity> {
    let array = match value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("entities").and_then(|v| v.as_array()) {
            Some(items) => items.as_slice(),
            None => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    array
        .iter()
        .filter_map(|item| {
            let name = item.get("name")?.as_str()?.trim();
            if name.is_empty() {
                return None;
            }
            let kind = item
                .get("kind")
                .and_then(|k| k.as_str())
                .and_then(NodeKind::parse)
                .unwrap_or(NodeKind::Concept);
            let aliases = item
                .get("aliases")
                .and_then(|a| a.as_array())
                .map(|list| {
                    list.iter()
                        .filter_map(|v| v.as_str())
                        .map(|s| s.to_string())
                        .collect()
                })
                .unwrap_or_default();
            Some(ExtractedEntity {
                name: name.to_string(),
                kind,
                aliases,
                explicit: item
                    .get("explicit")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(true),
                claimed_new: item.get("new").and_then(|v| v.as_bool()).unwrap_or(false),
                confidence_factor: 1.0,
            })
        })
        .collect()
}

/// Outcome of the span/count/novelty verification.
#[derive(Debug, Default)]
pub struct EntityVerification {
    pub warnings: Vec<String>,
    pub discarded: bool,
}

/// Verify extracted entities against the utterance. Each warning halves
/// the affected entity's confidence factor; at `discard_count` warnings
/// the whole stage output is discarded.
pub fn verify_entities(
    entities: &mut Vec<ExtractedEntity>,
    utterance: &str,
    known_entities: &[String],
    discard_count: u32,
) -> EntityVerification {
    let mut verification = EntityVerification::default();
    let folded_utterance = case_fold(utterance);
    let word_count = utterance.split_whitespace().count();
    let known_folded: Vec<String> = known_entities.iter().map(|e| case_fold(e)).collect();

    // Span check: an explicit entity's name or alias must appear in the
    // utterance. Failures are dropped, not just discounted.
    entities.retain_mut(|entity| {
        if !entity.explicit {
            return true;
        }
        let found = std::iter::once(&entity.name)
            .chain(entity.aliases.iter())
            .any(|candidate| folded_utterance.contains(&case_fold(candidate)));
        if !found {
            verification.warnings.push(format!(
                "entity '{}' marked explicit but absent from utterance",
                entity.name
            ));
            return false;
        }
        true
    });

    // Count plausibility: at most one entity per two words.
    let max_plausible = (word_count as f32 * 0.5).ceil() as usize;
    if entities.len() > max_plausible.max(1) {
        verification.warnings.push(format!(
            "implausible entity count {} for {} words",
            entities.len(),
            word_count
        ));
        for entity in entities.iter_mut() {
            entity.confidence_factor *= 0.5;
        }
        entities.truncate(max_plausible.max(1));
    }

    // Novelty check: "new" entities must not already be known.
    for entity in entities.iter_mut() {
        if entity.claimed_new && known_folded.contains(&case_fold(&entity.name)) {
            verification.warnings.push(format!(
                "entity '{}' claimed new but already known",
                entity.name
            ));
            entity.confidence_factor *= 0.5;
            entity.claimed_new = false;
        }
    }

    if verification.warnings.len() as u32 >= discard_count {
        verification.discarded = true;
        entities.clear();
    }

    verification
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_bare_array_and_wrapped_object() {
        let bare = json!([{"name": "Lena", "kind": "person", "explicit": true, "new": true}]);
        assert_eq!(parse_entities(&bare).len(), 1);

        let wrapped = json!({"entities": [{"name": "Malbec", "kind": "concept"}]});
        let parsed = parse_entities(&wrapped);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].kind, NodeKind::Concept);
    }

    #[test]
    fn hallucinated_explicit_entity_is_dropped() {
        let mut entities = parse_entities(&json!([
            {"name": "Lena", "kind": "person", "explicit": true},
            {"name": "Boris", "kind": "person", "explicit": true},
        ]));
        let verification = verify_entities(
            &mut entities,
            "My wife Lena loves Malbec",
            &[],
            3,
        );
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].name, "Lena");
        assert_eq!(verification.warnings.len(), 1);
        assert!(!verification.discarded);
    }

    #[test]
    fn implausible_count_halves_confidence() {
        let mut entities = parse_entities(&json!([
            {"name": "a", "explicit": false},
            {"name": "b", "explicit": false},
            {"name": "c", "explicit": false},
        ]));
        let verification = verify_entities(&mut entities, "two words", &[], 3);
        assert_eq!(verification.warnings.len(), 1);
        assert!(entities.iter().all(|e| e.confidence_factor < 1.0));
    }

    #[test]
    fn three_warnings_discard_the_stage() {
        let mut entities = parse_entities(&json!([
            {"name": "Boris", "explicit": true},
            {"name": "Olga", "explicit": true},
            {"name": "Ivan", "explicit": true},
        ]));
        let verification = verify_entities(
            &mut entities,
            "My wife Lena loves Malbec",
            &[],
            3,
        );
        assert!(verification.discarded);
        assert!(entities.is_empty());
    }

    #[test]
    fn known_entity_claimed_new_is_discounted() {
        let mut entities = parse_entities(&json!([
            {"name": "Lena", "kind": "person", "explicit": true, "new": true},
        ]));
        let verification = verify_entities(
            &mut entities,
            "Lena was there",
            &["Lena".to_string()],
            3,
        );
        assert_eq!(verification.warnings.len(), 1);
        assert!((entities[0].confidence_factor - 0.5).abs() < 1e-6);
        assert!(!entities[0].claimed_new);
    }
}
