//! Confidence lifecycle: initial scoring, reinforcement, decay, revision.
//! All pure functions over [`ConfidenceConfig`] and [`DecayRates`] so the
//! diff engine and the decay worker share one set of rules.

use chrono::{DateTime, Utc};

use crate::config::{ConfidenceConfig, DecayRates};
use crate::types::{Provenance, TemporalType};

/// Hedge level detected in the utterance. Scales the base confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HedgeLevel {
    #[default]
    None,
    Mild,
    Moderate,
    Strong,
}

impl HedgeLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" => Some(HedgeLevel::None),
            "mild" => Some(HedgeLevel::Mild),
            "moderate" => Some(HedgeLevel::Moderate),
            "strong" => Some(HedgeLevel::Strong),
            _ => None,
        }
    }
}

/// Base confidence for a provenance mechanism.
pub fn base(config: &ConfidenceConfig, mechanism: Provenance) -> f32 {
    match mechanism {
        Provenance::Explicit => config.base_explicit,
        Provenance::Observational => config.base_observational,
        Provenance::Inferential => config.base_inferential,
        Provenance::Reflective => config.base_reflective,
        // Corrections are never confidence-gated; start at the ceiling.
        Provenance::UserCorrection => config.max_confidence,
    }
}

/// Multiplier for a hedge level.
pub fn hedge_multiplier(config: &ConfidenceConfig, hedge: HedgeLevel) -> f32 {
    match hedge {
        HedgeLevel::None => config.hedge_none,
        HedgeLevel::Mild => config.hedge_mild,
        HedgeLevel::Moderate => config.hedge_moderate,
        HedgeLevel::Strong => config.hedge_strong,
    }
}

/// Initial confidence: base(mechanism) × hedge × sentiment strength,
/// clamped to [0, C_max]. `sentiment_factor` is 1.0 for neutral wording.
pub fn initial(
    config: &ConfidenceConfig,
    mechanism: Provenance,
    hedge: HedgeLevel,
    sentiment_factor: f32,
) -> f32 {
    clamp(
        config,
        base(config, mechanism) * hedge_multiplier(config, hedge) * sentiment_factor,
    )
}

/// REINFORCE: asymptotic approach to the ceiling.
/// new = old + boost × (1 − old).
pub fn reinforce(config: &ConfidenceConfig, current: f32) -> f32 {
    clamp(
        config,
        current + config.reinforcement_boost * (1.0 - current),
    )
}

/// Whether a new contradicting fact is confident enough to supersede the
/// old one. Below the margin the engine asks instead of rewriting.
pub fn contradict_revises(config: &ConfidenceConfig, old: f32, new: f32) -> bool {
    new - old >= config.contradiction_margin
}

/// Per-30-day decay rate for a temporal type. Traits are additionally
/// shielded by the trait protection factor.
pub fn decay_rate(config: &ConfidenceConfig, rates: &DecayRates, temporal: TemporalType) -> f32 {
    match temporal {
        TemporalType::Trait => rates.trait_rate * (1.0 - config.trait_decay_protection),
        TemporalType::State => rates.state_rate,
        TemporalType::Wish => rates.wish_rate,
        TemporalType::Episode => rates.episode_rate,
    }
}

/// Linear decay past the grace window: one `rate` step per 30-day period
/// since (last_reinforced + grace). Returns the current value inside the
/// grace period.
pub fn decay(
    config: &ConfidenceConfig,
    current: f32,
    rate: f32,
    last_reinforced: DateTime<Utc>,
    now: DateTime<Utc>,
) -> f32 {
    let elapsed_days = (now - last_reinforced).num_seconds() as f32 / 86_400.0;
    let decaying_days = elapsed_days - config.grace_days as f32;
    if decaying_days <= 0.0 {
        return current;
    }
    let periods = decaying_days / 30.0;
    clamp(config, current - rate * periods)
}

/// Edges below the archival threshold leave the active graph.
pub fn should_archive(config: &ConfidenceConfig, current: f32) -> bool {
    current < config.archive_threshold
}

/// Facts below the storage floor are never written at all.
pub fn meets_storage_floor(config: &ConfidenceConfig, confidence: f32) -> bool {
    confidence >= config.min_storage_confidence
}

pub fn clamp(config: &ConfidenceConfig, value: f32) -> f32 {
    value.clamp(0.0, config.max_confidence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn config() -> ConfidenceConfig {
        ConfidenceConfig::default()
    }

    #[test]
    fn explicit_unhedged_statement_scores_high() {
        let c = initial(&config(), Provenance::Explicit, HedgeLevel::None, 1.0);
        assert!((c - 0.90).abs() < 1e-6);
    }

    #[test]
    fn strong_hedge_halves_confidence() {
        let c = initial(&config(), Provenance::Explicit, HedgeLevel::Strong, 1.0);
        assert!((c - 0.45).abs() < 1e-6);
    }

    #[test]
    fn reinforce_approaches_ceiling_asymptotically() {
        let cfg = config();
        let once = reinforce(&cfg, 0.90);
        assert!((once - 0.908).abs() < 1e-6);

        let mut c = 0.5;
        for _ in 0..200 {
            c = reinforce(&cfg, c);
        }
        assert!(c <= cfg.max_confidence);
    }

    #[test]
    fn decay_respects_grace_period() {
        let cfg = config();
        let now = Utc::now();
        let recent = now - Duration::days(10);
        assert_eq!(decay(&cfg, 0.8, 0.08, recent, now), 0.8);
    }

    #[test]
    fn stale_weak_edge_decays_below_archive_threshold() {
        // Created at 0.30, rate 0.08/month, untouched for six months:
        // five decaying months past the grace window pull it under 0.15.
        let cfg = config();
        let now = Utc::now();
        let stale = now - Duration::days(30 * 6);
        let decayed = decay(&cfg, 0.30, 0.08, stale, now);
        assert!(decayed < cfg.archive_threshold);
        assert!(should_archive(&cfg, decayed));
    }

    #[test]
    fn traits_decay_slower_than_wishes() {
        let cfg = config();
        let rates = DecayRates::default();
        assert!(
            decay_rate(&cfg, &rates, TemporalType::Trait)
                < decay_rate(&cfg, &rates, TemporalType::Wish)
        );
    }

    #[test]
    fn contradiction_needs_margin() {
        let cfg = config();
        assert!(contradict_revises(&cfg, 0.80, 0.90));
        assert!(!contradict_revises(&cfg, 0.80, 0.85));
    }

    proptest! {
        #[test]
        fn initial_always_in_range(sentiment in 0.0f32..2.0) {
            let cfg = config();
            for mechanism in [
                Provenance::Explicit,
                Provenance::Observational,
                Provenance::Inferential,
                Provenance::Reflective,
            ] {
                for hedge in [HedgeLevel::None, HedgeLevel::Mild, HedgeLevel::Moderate, HedgeLevel::Strong] {
                    let c = initial(&cfg, mechanism, hedge, sentiment);
                    prop_assert!((0.0..=cfg.max_confidence).contains(&c));
                }
            }
        }

        #[test]
        fn reinforce_never_decreases_or_escapes_range(current in 0.0f32..1.0) {
            let cfg = config();
            let next = reinforce(&cfg, current.min(cfg.max_confidence));
            prop_assert!(next >= current.min(cfg.max_confidence) - 1e-6);
            prop_assert!(next <= cfg.max_confidence);
        }

        #[test]
        fn decay_never_increases(current in 0.0f32..1.0, rate in 0.0f32..0.5, days in 0i64..2000) {
            let cfg = config();
            let now = Utc::now();
            let then = now - Duration::days(days);
            let next = decay(&cfg, current, rate, then, now);
            prop_assert!(next <= current + 1e-6);
            prop_assert!(next >= 0.0);
        }
    }
}
