//! The proactive engine: probe generation from knowledge gaps, starter
//! generation from external events, and the risk model gating how
//! forward the agent may be. Delivery gating itself lives in the
//! outbound queue.

mod probes;
mod risk;
mod starters;

pub use probes::{KnowledgeGap, ProbeGenerator};
pub use risk::{assess as assess_risk, CostCategory, RiskAction};
pub use starters::{ExternalEvent, StarterGenerator};
