//! Stage 5: temporal scope. Assigns a temporal type per relation and
//! resolves relative expressions into absolute expiries using the
//! session's timezone. Fallback: state, no expiry.

use chrono::{DateTime, Duration, FixedOffset, Utc};

use crate::types::{Relation, TemporalType};

/// Near-permanent relations.
const TRAIT_RELATIONS: &[&str] = &[
    "married_to",
    "loves",
    "likes",
    "dislikes",
    "prefers",
    "parent_of",
    "sibling_of",
    "born_in",
];

/// Desires with an expiry.
const WISH_RELATIONS: &[&str] = &["planning", "wants", "wishes", "hopes_to", "dreams_of"];

/// One-time events.
const EPISODE_RELATIONS: &[&str] = &["visited", "attended", "met", "tried", "watched"];

/// Classify the temporal type of a relation.
pub fn classify(relation: &Relation) -> TemporalType {
    let name = relation.as_str();
    if TRAIT_RELATIONS.contains(&name) {
        TemporalType::Trait
    } else if WISH_RELATIONS.contains(&name) {
        TemporalType::Wish
    } else if EPISODE_RELATIONS.contains(&name) {
        TemporalType::Episode
    } else {
        TemporalType::State
    }
}

/// Default expiry horizon for a wish with no stated timeframe.
pub fn default_wish_expiry(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::days(90)
}

/// Resolve a relative time expression found in the utterance into an
/// absolute instant, evaluated in the session's timezone. Returns None
/// when no expression is recognized.
pub fn resolve_relative(
    utterance: &str,
    now: DateTime<Utc>,
    tz_offset_minutes: i32,
) -> Option<DateTime<Utc>> {
    let offset = FixedOffset::east_opt(tz_offset_minutes * 60)?;
    let local_now = now.with_timezone(&offset);
    let folded = utterance.to_lowercase();

    let local_result = if folded.contains("tonight") || folded.contains("today") {
        Some(local_now + Duration::days(1))
    } else if folded.contains("tomorrow") {
        Some(local_now + Duration::days(2))
    } else if folded.contains("next week") {
        Some(local_now + Duration::weeks(1))
    } else if folded.contains("next month") {
        Some(local_now + Duration::days(30))
    } else if folded.contains("next year") {
        Some(local_now + Duration::days(365))
    } else if folded.contains("this weekend") {
        Some(local_now + Duration::days(7))
    } else {
        parse_in_n(&folded, local_now)
    };

    local_result.map(|t| t.with_timezone(&Utc))
}

/// "in N days/weeks/months"
fn parse_in_n(
    folded: &str,
    local_now: DateTime<FixedOffset>,
) -> Option<DateTime<FixedOffset>> {
    let position = folded.find("in ")?;
    let rest = &folded[position + 3..];
    let mut parts = rest.split_whitespace();
    let n: i64 = parts.next()?.parse().ok()?;
    let unit = parts.next()?;

    let duration = if unit.starts_with("day") {
        Duration::days(n)
    } else if unit.starts_with("week") {
        Duration::weeks(n)
    } else if unit.starts_with("month") {
        Duration::days(30 * n)
    } else {
        return None;
    };
    Some(local_now + duration)
}
