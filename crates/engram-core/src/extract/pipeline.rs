//! The staged extraction pipeline. A failure at stage N never prevents
//! later stages from producing partial output, and nothing here raises
//! to the caller: the outcome always describes what could be salvaged.

use chrono::Utc;
use log::{debug, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::{ConfidenceConfig, ExtractionConfig};
use crate::confidence;
use crate::error::EngramError;
use crate::extract::entities::{parse_entities, verify_entities, ExtractedEntity};
use crate::extract::ops::{ProposedFact, ProposedNode, ProposedOp, ProposedRetraction};
use crate::extract::preprocess::preprocess;
use crate::extract::prompts;
use crate::extract::relations::{parse_relations, verify_relations, ExtractedRelation};
use crate::extract::repair::repair_json;
use crate::extract::sentiment::{self, SentimentReading};
use crate::extract::temporal;
use crate::llm::{CircuitBreaker, CompletionRequest, LlmCapability, TokenBudget};
use crate::queue::{ContextLevel, InteractionEvent};
use crate::relations::is_single_valued;
use crate::types::{case_fold, NodeKind, PrivacyLevel, Provenance, Relation};

/// What one pipeline run produced. Never an error.
#[derive(Debug, Default)]
pub struct ExtractionOutcome {
    pub ops: Vec<ProposedOp>,
    /// Sentiment of the whole interaction, recorded on the episode.
    pub sentiment_score: f32,
    pub tags: Vec<String>,
    pub entities: Vec<String>,
    pub warnings: Vec<String>,
    pub stage_failures: Vec<String>,
    /// Set when the interaction produced nothing to extract; carries the
    /// skip reason for the audit record.
    pub skipped: Option<String>,
    /// Set when the LLM tier was unavailable or over budget; the event
    /// should be re-enqueued rather than dropped.
    pub deferred: bool,
}

pub struct ExtractionPipeline {
    llm: Arc<dyn LlmCapability>,
    breaker: Arc<CircuitBreaker>,
    budget: Arc<TokenBudget>,
    config: ExtractionConfig,
    confidence: ConfidenceConfig,
    hallucination_count: AtomicU64,
}

impl ExtractionPipeline {
    pub fn new(
        llm: Arc<dyn LlmCapability>,
        breaker: Arc<CircuitBreaker>,
        budget: Arc<TokenBudget>,
        config: ExtractionConfig,
        confidence: ConfidenceConfig,
    ) -> Self {
        Self {
            llm,
            breaker,
            budget,
            config,
            confidence,
            hallucination_count: AtomicU64::new(0),
        }
    }

    /// Total hallucination warnings observed, for rate alerting.
    pub fn hallucination_count(&self) -> u64 {
        self.hallucination_count.load(Ordering::Relaxed)
    }

    pub async fn run(&self, event: &InteractionEvent, context: ContextLevel) -> ExtractionOutcome {
        let mut outcome = ExtractionOutcome::default();

        // STT floor: below it, the transcript is not trustworthy enough
        // to extract from at all.
        if let Some(stt) = event.stt_confidence {
            if stt < self.config.stt_floor {
                outcome.skipped = Some(format!("stt_confidence {:.2} below floor", stt));
                return outcome;
            }
        }

        // Stage 1: preprocess.
        let clean = match preprocess(&event.text) {
            Some(clean) => clean,
            None => {
                outcome.skipped = Some("nothing_extractable".to_string());
                return outcome;
            }
        };
        outcome.tags = clean.tags.clone();

        let utterance = prompts::reduce_context(&clean.text, self.config.max_utterance_chars);
        let known_entities = match context {
            ContextLevel::Full => event.entities_hint.clone(),
            ContextLevel::Half => event
                .entities_hint
                .iter()
                .take(event.entities_hint.len() / 2)
                .cloned()
                .collect(),
            ContextLevel::Minimal => Vec::new(),
        };

        // Stage 2: entity extraction.
        let mut entities = match self
            .call_json(
                prompts::entity_prompt(utterance, &known_entities),
                prompts::entity_prompt(prompts::reduce_context(utterance, 1000), &[]),
                prompts::ENTITY_SCHEMA_HINT,
            )
            .await
        {
            Ok(Some(value)) => parse_entities(&value),
            Ok(None) => {
                outcome
                    .stage_failures
                    .push("entities: unrepairable output".to_string());
                Vec::new()
            }
            Err(e) if e.is_transient() => {
                outcome.deferred = true;
                outcome
                    .stage_failures
                    .push(format!("entities: {}", e));
                Vec::new()
            }
            Err(e) => {
                outcome.stage_failures.push(format!("entities: {}", e));
                Vec::new()
            }
        };

        let entity_verification = verify_entities(
            &mut entities,
            utterance,
            &known_entities,
            self.config.hallucination_discard_count,
        );
        self.hallucination_count
            .fetch_add(entity_verification.warnings.len() as u64, Ordering::Relaxed);
        outcome.warnings.extend(entity_verification.warnings);
        if entity_verification.discarded {
            outcome
                .stage_failures
                .push("entities: discarded for hallucination".to_string());
        }
        outcome.entities = entities.iter().map(|e| e.name.clone()).collect();

        // Stage 3: relation extraction, on whatever stage 2 produced.
        let mut relations = match self
            .call_json(
                prompts::relation_prompt(utterance, &outcome.entities),
                prompts::relation_prompt(prompts::reduce_context(utterance, 1000), &outcome.entities),
                prompts::RELATION_SCHEMA_HINT,
            )
            .await
        {
            Ok(Some(value)) => parse_relations(&value),
            Ok(None) => {
                outcome
                    .stage_failures
                    .push("relations: unrepairable output".to_string());
                Vec::new()
            }
            Err(e) if e.is_transient() => {
                outcome.deferred = true;
                outcome.stage_failures.push(format!("relations: {}", e));
                Vec::new()
            }
            Err(e) => {
                outcome.stage_failures.push(format!("relations: {}", e));
                Vec::new()
            }
        };

        let relation_verification = verify_relations(
            &mut relations,
            utterance,
            &outcome.entities,
            &known_entities,
            self.config.hallucination_discard_count,
        );
        self.hallucination_count
            .fetch_add(relation_verification.warnings.len() as u64, Ordering::Relaxed);
        outcome.warnings.extend(relation_verification.warnings);
        if relation_verification.discarded {
            outcome
                .stage_failures
                .push("relations: discarded for hallucination".to_string());
        }

        // Stage 4: sentiment and hedging (lexical; fallback is the
        // default reading).
        let reading = sentiment::classify(utterance);
        outcome.sentiment_score = reading.score;

        // Last-settled-intent: a single-valued relation stated twice in
        // one utterance keeps only the final statement, down-capped.
        settle_conflicts(&mut relations, &mut outcome.warnings);

        // Stages 5-7: temporal scope, confidence scoring, op assembly.
        self.assemble_ops(event, &entities, relations, reading, &mut outcome);

        debug!(
            "extraction: {} ops, {} warnings, {} stage failures",
            outcome.ops.len(),
            outcome.warnings.len(),
            outcome.stage_failures.len()
        );
        outcome
    }

    fn assemble_ops(
        &self,
        event: &InteractionEvent,
        entities: &[ExtractedEntity],
        relations: Vec<ExtractedRelation>,
        reading: SentimentReading,
        outcome: &mut ExtractionOutcome,
    ) {
        let now = Utc::now();

        for entity in entities {
            outcome.ops.push(ProposedOp::UpsertNode(ProposedNode {
                kind: entity.kind,
                name: entity.name.clone(),
                aliases: entity.aliases.clone(),
                properties: Vec::new(),
                privacy: default_privacy(entity.kind),
            }));
        }

        let entity_factor = |name: &str| -> f32 {
            entities
                .iter()
                .find(|e| case_fold(&e.name) == case_fold(name))
                .map(|e| e.confidence_factor)
                .unwrap_or(1.0)
        };

        for relation in relations {
            if relation.retraction {
                outcome.ops.push(ProposedOp::Retract(ProposedRetraction {
                    subject: relation.subject,
                    relation: Some(relation.relation),
                    object: if relation.object.is_empty() {
                        None
                    } else {
                        Some(relation.object)
                    },
                }));
                continue;
            }

            // Hypotheticals collapse to a weak interest signal.
            let (effective_relation, hypothetical_cap) = if relation.hypothetical {
                (Relation::new("interested_in").unwrap(), Some(0.20))
            } else {
                (relation.relation.clone(), None)
            };

            let hedge = reading.hedge;
            let mut conf = confidence::initial(
                &self.confidence,
                Provenance::Explicit,
                hedge,
                reading.strength_factor,
            );
            conf *= entity_factor(&relation.subject);
            conf *= entity_factor(&relation.object);
            conf *= relation.confidence_factor;

            if relation.sarcasm {
                conf *= 0.7;
            }
            if relation.secondhand_source.is_some() {
                conf *= 0.8;
            }
            if relation.attribution_uncertain {
                conf = conf.min(0.50);
            }
            if let Some(cap) = hypothetical_cap {
                conf = conf.min(cap);
            }
            if self.config.stt_scaling {
                if let Some(stt) = event.stt_confidence {
                    conf *= stt;
                }
            }
            let conf = confidence::clamp(&self.confidence, conf);

            let temporal = temporal::classify(&effective_relation);
            let expiry = match temporal {
                crate::types::TemporalType::Wish => Some(
                    temporal::resolve_relative(&event.text, now, event.tz_offset_minutes)
                        .unwrap_or_else(|| temporal::default_wish_expiry(now)),
                ),
                _ => temporal::resolve_relative(&event.text, now, event.tz_offset_minutes)
                    .filter(|_| temporal == crate::types::TemporalType::State),
            };

            let fact = ProposedFact {
                subject: relation.subject.clone(),
                subject_kind: relation.subject_kind,
                relation: effective_relation.clone(),
                object: relation.object.clone(),
                object_kind: relation.object_kind,
                temporal,
                confidence: conf,
                provenance: Provenance::Explicit,
                context_tags: relation.tags.clone(),
                expiry,
                refines: relation.refines.clone(),
                attribution_uncertain: relation.attribution_uncertain,
                secondhand: relation.secondhand_source.is_some(),
            };

            // "John thinks X and I agree": the user gets a parallel
            // first-person edge at full explicit confidence.
            if relation.secondhand_source.is_some() && relation.speaker_agrees {
                let user_conf = confidence::initial(
                    &self.confidence,
                    Provenance::Explicit,
                    hedge,
                    reading.strength_factor,
                );
                outcome.ops.push(ProposedOp::AssertFact(ProposedFact {
                    subject: "User".to_string(),
                    subject_kind: NodeKind::Person,
                    confidence: confidence::clamp(&self.confidence, user_conf),
                    secondhand: false,
                    ..fact.clone()
                }));
            }

            outcome.ops.push(ProposedOp::AssertFact(fact));
        }
    }

    /// One LLM call with repair; a failure is retried once with the
    /// reduced-context variant of the prompt before giving up.
    async fn call_json(
        &self,
        prompt: String,
        reduced_prompt: String,
        schema_hint: &str,
    ) -> crate::error::Result<Option<serde_json::Value>> {
        let request = CompletionRequest::new(prompt).with_schema_hint(schema_hint);

        if !self.budget.charge(request.estimated_tokens()) {
            return Err(EngramError::BudgetExhausted(self.llm.name().to_string()));
        }
        self.breaker.permit()?;

        match self.llm.complete(request).await {
            Ok(text) => {
                self.breaker.record_success();
                Ok(repair_json(&text))
            }
            Err(first_error) => {
                self.breaker.record_failure();
                warn!(
                    "extraction call to {} failed, retrying with reduced context: {}",
                    self.llm.name(),
                    first_error
                );

                self.breaker.permit()?;
                let reduced = CompletionRequest::new(reduced_prompt).with_schema_hint(schema_hint);
                match self.llm.complete(reduced).await {
                    Ok(text) => {
                        self.breaker.record_success();
                        Ok(repair_json(&text))
                    }
                    Err(second_error) => {
                        self.breaker.record_failure();
                        Err(second_error)
                    }
                }
            }
        }
    }
}

fn default_privacy(kind: NodeKind) -> PrivacyLevel {
    match kind {
        NodeKind::Person | NodeKind::Preference | NodeKind::Context | NodeKind::Experience => {
            PrivacyLevel::L2Personal
        }
        _ => PrivacyLevel::L0Public,
    }
}

/// Open-question policy: when one utterance asserts conflicting values
/// for a single-valued relation ("her age is 46, no 47"), the last
/// statement wins, capped at 0.50 and flagged uncertain.
fn settle_conflicts(relations: &mut Vec<ExtractedRelation>, warnings: &mut Vec<String>) {
    let mut settled: Vec<ExtractedRelation> = Vec::new();
    for relation in relations.drain(..) {
        if let Some(previous) = settled.iter_mut().find(|r| {
            case_fold(&r.subject) == case_fold(&relation.subject)
                && r.relation == relation.relation
                && is_single_valued(&r.relation)
                && case_fold(&r.object) != case_fold(&relation.object)
        }) {
            warnings.push(format!(
                "conflicting values for {} -{}- in one utterance; keeping the later",
                relation.subject, relation.relation
            ));
            let mut last = relation;
            last.attribution_uncertain = true;
            last.confidence_factor = last.confidence_factor.min(0.55);
            *previous = last;
        } else {
            settled.push(relation);
        }
    }
    *relations = settled;
}
