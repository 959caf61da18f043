//! Prompt templates for the small-LLM extraction stages. Schema text
//! lives next to the parser that consumes it.

pub const ENTITY_SCHEMA_HINT: &str = r#"[{"name": string, "kind": "person|organization|place|tool|concept|preference|context", "aliases": [string], "explicit": bool, "new": bool}]"#;

pub const RELATION_SCHEMA_HINT: &str = r#"[{"subject": string, "subject_kind": string, "relation": string, "object": string, "object_kind": string, "tags": [string], "hypothetical": bool, "sarcasm": bool, "secondhand_source": string|null, "speaker_agrees": bool, "attribution_uncertain": bool, "retraction": bool, "refines": {"subject": string, "relation": string, "object": string}|null}]"#;

pub fn entity_prompt(utterance: &str, known_entities: &[String]) -> String {
    let known = if known_entities.is_empty() {
        "none".to_string()
    } else {
        known_entities.join(", ")
    };
    format!(
        "Extract the entities mentioned in this utterance.\n\
         Rules:\n\
         - `explicit` is true only when the entity's name appears verbatim.\n\
         - `new` is true only when the entity is NOT in the known list.\n\
         - The speaker is always the entity \"User\" (kind person); do not list it.\n\
         - Never invent entities that are not grounded in the utterance.\n\
         Known entities: {}\n\
         Utterance: {}",
        known, utterance
    )
}

pub fn relation_prompt(utterance: &str, entities: &[String]) -> String {
    format!(
        "Extract subject-relation-object facts from this utterance.\n\
         Rules:\n\
         - Use relation names in lowercase_snake_case (prefers, works_at, married_to, planning, loves, age, lives_in, interested_in, ...).\n\
         - First-person statements have subject \"User\".\n\
         - Hypotheticals and counterfactuals (\"if I were...\") set `hypothetical` true.\n\
         - Sarcasm or irony sets `sarcasm` true; when ambiguous, prefer a neutral reading.\n\
         - Bind each predicate to its nearest syntactic subject; when uncertain set `attribution_uncertain` true.\n\
         - \"X thinks/says Y\" keeps subject X with `secondhand_source` X; a trailing agreement (\"and I agree\") sets `speaker_agrees` true.\n\
         - \"forget what I said about ...\" is a retraction, not a new fact.\n\
         - When the speaker corrects themselves mid-utterance, keep only the final settled statement.\n\
         - A more specific version of a known fact fills `refines` with the general fact.\n\
         Entities in scope: {}\n\
         Utterance: {}",
        entities.join(", "),
        utterance
    )
}

pub fn nl_query_prompt(question: &str) -> String {
    format!(
        "Turn this question about a personal knowledge graph into a query plan.\n\
         Respond with JSON: {{\"entities\": [string], \"relations\": [string], \"min_confidence\": number, \"max_hops\": number}}.\n\
         Use lowercase_snake_case relation names. Omit nothing; use [] and defaults (0.0, 2) when unsure.\n\
         Question: {}",
        question
    )
}

pub fn probe_prompt(gap_description: &str) -> String {
    format!(
        "A conversational memory found a knowledge gap: {}.\n\
         Write one short, natural question the assistant could ask the user to fill it.\n\
         Respond with JSON: {{\"question\": string, \"tags\": [string]}}.",
        gap_description
    )
}

pub fn starter_prompt(event_description: &str, graph_context: &str) -> String {
    format!(
        "An external event occurred: {}.\n\
         Relevant knowledge about the user: {}.\n\
         Write one short, natural conversation opener connecting the event to the user.\n\
         Respond with JSON: {{\"opener\": string, \"tags\": [string]}}.",
        event_description, graph_context
    )
}

pub fn inference_prompt(path_description: &str) -> String {
    format!(
        "These connected facts come from a personal knowledge graph:\n{}\n\
         Hypothesize at most one NEW relation implied but not stated.\n\
         Respond with JSON: {{\"subject\": string, \"relation\": string, \"object\": string, \"reasoning\": string}} or null.",
        path_description
    )
}

/// Shorten an utterance for the reduced-context retry.
pub fn reduce_context(utterance: &str, max_chars: usize) -> &str {
    if utterance.len() <= max_chars {
        return utterance;
    }
    // Cut on a char boundary.
    let mut end = max_chars;
    while !utterance.is_char_boundary(end) {
        end -= 1;
    }
    &utterance[..end]
}
