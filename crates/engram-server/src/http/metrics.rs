//! Prometheus metrics for the HTTP surface.

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::registry::Registry;
use std::sync::Mutex;

pub struct Metrics {
    registry: Mutex<Registry>,
    pub interactions_reported: Counter,
    pub interactions_duplicate: Counter,
    pub queries_served: Counter,
    pub probes_delivered: Counter,
    pub starters_delivered: Counter,
    pub corrections_applied: Counter,
    pub external_events: Counter,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let interactions_reported = Counter::default();
        registry.register(
            "engram_interactions_reported",
            "Interaction events accepted into the inbound queue",
            interactions_reported.clone(),
        );

        let interactions_duplicate = Counter::default();
        registry.register(
            "engram_interactions_duplicate",
            "Interaction events dropped as idempotency duplicates",
            interactions_duplicate.clone(),
        );

        let queries_served = Counter::default();
        registry.register(
            "engram_queries_served",
            "Structured and NL queries answered",
            queries_served.clone(),
        );

        let probes_delivered = Counter::default();
        registry.register(
            "engram_probes_delivered",
            "Probes handed to agents",
            probes_delivered.clone(),
        );

        let starters_delivered = Counter::default();
        registry.register(
            "engram_starters_delivered",
            "Starters handed to agents",
            starters_delivered.clone(),
        );

        let corrections_applied = Counter::default();
        registry.register(
            "engram_corrections_applied",
            "User corrections applied",
            corrections_applied.clone(),
        );

        let external_events = Counter::default();
        registry.register(
            "engram_external_events",
            "Normalized external events scored",
            external_events.clone(),
        );

        Self {
            registry: Mutex::new(registry),
            interactions_reported,
            interactions_duplicate,
            queries_served,
            probes_delivered,
            starters_delivered,
            corrections_applied,
            external_events,
        }
    }

    pub fn encode(&self) -> String {
        let registry = self.registry.lock().unwrap();
        let mut out = String::new();
        let _ = encode(&mut out, &registry);
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
