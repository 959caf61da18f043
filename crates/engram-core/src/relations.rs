use crate::Relation;

/// The curated relation vocabulary shipped with Engram.
/// Extraction may emit other validated relation names; these are the
/// ones the prompts and the diff engine's single-valued table know about.
pub mod defaults {
    use super::*;

    pub fn prefers() -> Relation {
        Relation::new("prefers").unwrap()
    }
    pub fn loves() -> Relation {
        Relation::new("loves").unwrap()
    }
    pub fn likes() -> Relation {
        Relation::new("likes").unwrap()
    }
    pub fn dislikes() -> Relation {
        Relation::new("dislikes").unwrap()
    }
    pub fn works_at() -> Relation {
        Relation::new("works_at").unwrap()
    }
    pub fn married_to() -> Relation {
        Relation::new("married_to").unwrap()
    }
    pub fn lives_in() -> Relation {
        Relation::new("lives_in").unwrap()
    }
    pub fn planning() -> Relation {
        Relation::new("planning").unwrap()
    }
    pub fn learned_from() -> Relation {
        Relation::new("learned_from").unwrap()
    }
    pub fn applies_to() -> Relation {
        Relation::new("applies_to").unwrap()
    }
    pub fn interested_in() -> Relation {
        Relation::new("interested_in").unwrap()
    }
    pub fn age() -> Relation {
        Relation::new("age").unwrap()
    }
    pub fn derived_from() -> Relation {
        Relation::new("derived_from").unwrap()
    }

    pub fn all() -> Vec<Relation> {
        vec![
            prefers(),
            loves(),
            likes(),
            dislikes(),
            works_at(),
            married_to(),
            lives_in(),
            planning(),
            learned_from(),
            applies_to(),
            interested_in(),
            age(),
            derived_from(),
        ]
    }
}

/// Relations where one subject holds at most one object at a time.
/// A new fact with a different object is a contradiction, not a parallel
/// edge.
pub fn is_single_valued(relation: &Relation) -> bool {
    matches!(
        relation.as_str(),
        "married_to" | "age" | "lives_in" | "works_at" | "born_in"
    )
}
