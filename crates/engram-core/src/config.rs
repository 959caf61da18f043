use serde::{Deserialize, Serialize};

use crate::types::PrivacyLevel;

/// Aggregate service configuration. Every field has a default; a missing
/// section in `engram.toml` falls back to the balanced preset values.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngramConfig {
    pub proactivity: ProactivityPreset,
    pub extraction: ExtractionConfig,
    pub confidence: ConfidenceConfig,
    pub decay: DecayRates,
    pub probing: ProbingConfig,
    pub starters: StartersConfig,
    pub risk: RiskConfig,
    pub schedules: ScheduleConfig,
    pub monitors: MonitorsConfig,
    pub llm: LlmConfig,
    pub privacy: PrivacyConfig,
    pub bus: BusConfig,
    pub inbound: InboundConfig,
}

impl EngramConfig {
    /// Resolve the proactivity preset into concrete overrides.
    /// Explicit per-field settings in the file win over the preset,
    /// so this is applied before deserializing user overrides or,
    /// programmatically, right after construction.
    pub fn with_preset(mut self, preset: ProactivityPreset) -> Self {
        self.proactivity = preset;
        match preset {
            ProactivityPreset::Conservative => {
                self.probing.max_per_conversation = 1;
                self.probing.max_per_day = 1;
                self.probing.max_per_week = 4;
                self.probing.min_turn = 5;
                self.probing.min_context_fit = 0.55;
                self.starters.relevance_threshold = 0.70;
                self.extraction.indirect_inference = false;
            }
            ProactivityPreset::Balanced => {}
            ProactivityPreset::Proactive => {
                self.probing.max_per_conversation = 2;
                self.probing.max_per_day = 5;
                self.probing.max_per_week = 15;
                self.probing.min_turn = 2;
                self.probing.min_context_fit = 0.25;
                self.starters.relevance_threshold = 0.40;
            }
        }
        self
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if !(0.0..=1.0).contains(&self.confidence.max_confidence) {
            errors.push("confidence.max_confidence must be in [0, 1]".to_string());
        }
        if self.confidence.archive_threshold >= self.confidence.max_confidence {
            errors.push("confidence.archive_threshold must be below max_confidence".to_string());
        }
        if self.confidence.min_storage_confidence >= self.confidence.max_confidence {
            errors.push("confidence.min_storage_confidence must be below max_confidence".to_string());
        }
        if self.inbound.backoff_secs.is_empty() {
            errors.push("inbound.backoff_secs must not be empty".to_string());
        }
        if self.probing.min_context_fit < 0.0 || self.probing.min_context_fit > 1.0 {
            errors.push("probing.min_context_fit must be in [0, 1]".to_string());
        }
        errors
    }
}

/// Coherent override sets for how forward the service is allowed to be.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProactivityPreset {
    Conservative,
    #[default]
    Balanced,
    Proactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Whether the nightly inference cycle may hypothesize new relations.
    pub indirect_inference: bool,
    /// Speech-to-text confidence below this floor skips extraction entirely.
    pub stt_floor: f32,
    /// Above the floor, scale final confidence linearly by STT confidence.
    pub stt_scaling: bool,
    /// Hallucination warnings at or above this count discard the stage.
    pub hallucination_discard_count: u32,
    /// Utterances beyond this length are retried with reduced context.
    pub max_utterance_chars: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            indirect_inference: true,
            stt_floor: 0.40,
            stt_scaling: true,
            hallucination_discard_count: 3,
            max_utterance_chars: 16_384,
        }
    }
}

/// Parameters of the confidence lifecycle. All pure-function inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    pub base_explicit: f32,
    pub base_observational: f32,
    pub base_inferential: f32,
    pub base_reflective: f32,
    pub hedge_none: f32,
    pub hedge_mild: f32,
    pub hedge_moderate: f32,
    pub hedge_strong: f32,
    /// REINFORCE: new = old + boost * (1 - old).
    pub reinforcement_boost: f32,
    /// C_max. Confidence is clamped to [0, C_max] after every mutation.
    pub max_confidence: f32,
    /// CONTRADICT revises only when new exceeds old by this margin.
    pub contradiction_margin: f32,
    /// Facts below this are SKIPped, never stored.
    pub min_storage_confidence: f32,
    /// Edges below this are archived by the decay cycle.
    pub archive_threshold: f32,
    /// Days since last reinforcement before decay starts.
    pub grace_days: i64,
    /// Fraction by which trait decay is slowed, [0, 1].
    pub trait_decay_protection: f32,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            base_explicit: 0.90,
            base_observational: 0.65,
            base_inferential: 0.45,
            base_reflective: 0.50,
            hedge_none: 1.00,
            hedge_mild: 0.90,
            hedge_moderate: 0.65,
            hedge_strong: 0.50,
            reinforcement_boost: 0.08,
            max_confidence: 1.0,
            contradiction_margin: 0.10,
            min_storage_confidence: 0.25,
            archive_threshold: 0.15,
            grace_days: 30,
            trait_decay_protection: 0.5,
        }
    }
}

/// Per-temporal-type decay rates, per 30-day period past the grace window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayRates {
    pub trait_rate: f32,
    pub state_rate: f32,
    pub wish_rate: f32,
    pub episode_rate: f32,
}

impl Default for DecayRates {
    fn default() -> Self {
        Self {
            trait_rate: 0.01,
            state_rate: 0.04,
            wish_rate: 0.08,
            episode_rate: 0.15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbingConfig {
    pub max_per_conversation: u32,
    pub max_per_day: u32,
    pub max_per_week: u32,
    /// Probes are held until the conversation reaches this turn.
    pub min_turn: u32,
    /// Items scoring below this context fit are not returned.
    pub min_context_fit: f32,
    pub ignore_cooldown_hours: i64,
    pub deflect_cooldown_hours: i64,
    /// Priority multiplier applied when a cooled-down item re-enters.
    pub reentry_priority_factor: f32,
}

impl Default for ProbingConfig {
    fn default() -> Self {
        Self {
            max_per_conversation: 1,
            max_per_day: 3,
            max_per_week: 10,
            min_turn: 3,
            min_context_fit: 0.35,
            ignore_cooldown_hours: 24,
            deflect_cooldown_hours: 72,
            reentry_priority_factor: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StartersConfig {
    /// External events scoring below this against the graph are dropped.
    pub relevance_threshold: f32,
    /// Per-subtype daily cap.
    pub max_per_subtype_per_day: u32,
    /// User timezone as minutes east of UTC. The quiet window below is
    /// evaluated in this offset.
    pub tz_offset_minutes: i32,
    /// Local hour quiet period begins (inclusive).
    pub quiet_start_hour: u32,
    /// Local hour quiet period ends (exclusive).
    pub quiet_end_hour: u32,
    /// Alert starters may override quiet hours.
    pub alerts_override_quiet_hours: bool,
    /// Width of the delivery window attached to a starter.
    pub delivery_window_hours: i64,
}

impl Default for StartersConfig {
    fn default() -> Self {
        Self {
            relevance_threshold: 0.50,
            max_per_subtype_per_day: 2,
            tz_offset_minutes: 0,
            quiet_start_hour: 22,
            quiet_end_hour: 8,
            alerts_override_quiet_hours: true,
            delivery_window_hours: 12,
        }
    }
}

/// Thresholds for the (confidence, cost) → action mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub auto_execute_min_confidence: f32,
    pub suggest_min_confidence: f32,
    pub casual_mention_min_confidence: f32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            auto_execute_min_confidence: 0.90,
            suggest_min_confidence: 0.50,
            casual_mention_min_confidence: 0.30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub decay_interval_hours: u64,
    pub revision_interval_hours: u64,
    pub inference_interval_hours: u64,
    pub clustering_interval_hours: u64,
    /// Edges sampled per revision cycle.
    pub revision_budget_per_cycle: usize,
    /// Edge age beyond which a public fact is due for re-verification.
    pub revision_ttl_days: i64,
    /// Candidate edges emitted per inference cycle.
    pub inference_cap_per_cycle: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            decay_interval_hours: 24 * 7,
            revision_interval_hours: 24,
            inference_interval_hours: 24,
            clustering_interval_hours: 24 * 7,
            revision_budget_per_cycle: 25,
            revision_ttl_days: 90,
            inference_cap_per_cycle: 10,
        }
    }
}

/// Per-source enable flags and poll intervals for external event monitors.
/// The pollers themselves are external collaborators; the service only
/// consumes their normalized events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorsConfig {
    pub weather_enabled: bool,
    pub news_enabled: bool,
    pub calendar_enabled: bool,
    pub poll_interval_secs: u64,
}

impl Default for MonitorsConfig {
    fn default() -> Self {
        Self {
            weather_enabled: true,
            news_enabled: false,
            calendar_enabled: true,
            poll_interval_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LlmConfig {
    pub small: LlmTierConfig,
    pub large: LlmTierConfig,
    pub fallback: FallbackPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmTierConfig {
    pub provider: String,
    pub model: String,
    pub endpoint: String,
    /// Environment variable holding the API key. Never the key itself.
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub retries: u32,
    pub daily_token_budget: u64,
}

impl Default for LlmTierConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key_env: "ENGRAM_LLM_API_KEY".to_string(),
            timeout_secs: 15,
            retries: 1,
            daily_token_budget: 200_000,
        }
    }
}

/// What to do when an LLM tier is unavailable or over budget.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FallbackPolicy {
    /// Re-enqueue the work and continue degraded.
    #[default]
    Queue,
    /// Drop the work, keep only what earlier stages produced.
    Degrade,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    pub sharing_enabled: bool,
    /// Minimum level a node keeps to be shareable at all.
    pub sharing_min_level: PrivacyLevel,
    pub differential_privacy_epsilon: f32,
    pub auto_pii_detection: bool,
    pub archive_retention_days: i64,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            sharing_enabled: false,
            sharing_min_level: PrivacyLevel::L0Public,
            differential_privacy_epsilon: 1.0,
            auto_pii_detection: true,
            archive_retention_days: 365,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Per-subscriber buffer capacity before non-critical events are shed.
    pub buffer_capacity: usize,
    /// Callbacks exceeding this log a warning but are not cancelled.
    pub callback_soft_deadline_secs: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 256,
            callback_soft_deadline_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InboundConfig {
    /// Idempotency keys are remembered this long.
    pub retention_hours: i64,
    /// Attempts before an event moves to the dead-letter store.
    pub max_attempts: u32,
    /// Backoff schedule between attempts.
    pub backoff_secs: Vec<u64>,
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            retention_hours: 72,
            max_attempts: 3,
            backoff_secs: vec![1, 5, 30],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_clean() {
        assert!(EngramConfig::default().validate().is_empty());
    }

    #[test]
    fn conservative_preset_tightens_probing() {
        let config = EngramConfig::default().with_preset(ProactivityPreset::Conservative);
        assert_eq!(config.probing.max_per_day, 1);
        assert!(config.probing.min_context_fit > ProbingConfig::default().min_context_fit);
        assert!(!config.extraction.indirect_inference);
    }

    #[test]
    fn bad_threshold_is_reported() {
        let mut config = EngramConfig::default();
        config.confidence.archive_threshold = 2.0;
        assert!(!config.validate().is_empty());
    }
}
