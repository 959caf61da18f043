//! The risk model: maps (confidence, cost category) to how forward the
//! agent may be with a proactive action.

use serde::{Deserialize, Serialize};

use crate::config::RiskConfig;

/// How expensive acting on a piece of knowledge would be if it turned
/// out wrong.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum CostCategory {
    None,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RiskAction {
    /// Act without asking. Requires near-certainty and zero cost.
    AutoExecute,
    /// Offer the action explicitly.
    Suggest,
    /// Weave it into conversation without commitment.
    CasualMention,
    /// Hold back entirely.
    Defer,
}

pub fn assess(config: &RiskConfig, confidence: f32, cost: CostCategory) -> RiskAction {
    if confidence >= config.auto_execute_min_confidence && cost == CostCategory::None {
        RiskAction::AutoExecute
    } else if confidence >= config.suggest_min_confidence && cost <= CostCategory::Medium {
        RiskAction::Suggest
    } else if confidence >= config.casual_mention_min_confidence && cost <= CostCategory::Low {
        RiskAction::CasualMention
    } else {
        RiskAction::Defer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_follow_defaults() {
        let config = RiskConfig::default();
        assert_eq!(
            assess(&config, 0.95, CostCategory::None),
            RiskAction::AutoExecute
        );
        assert_eq!(
            assess(&config, 0.95, CostCategory::Low),
            RiskAction::Suggest
        );
        assert_eq!(
            assess(&config, 0.6, CostCategory::Medium),
            RiskAction::Suggest
        );
        assert_eq!(
            assess(&config, 0.4, CostCategory::Low),
            RiskAction::CasualMention
        );
        assert_eq!(
            assess(&config, 0.4, CostCategory::High),
            RiskAction::Defer
        );
        assert_eq!(
            assess(&config, 0.1, CostCategory::None),
            RiskAction::Defer
        );
    }
}
