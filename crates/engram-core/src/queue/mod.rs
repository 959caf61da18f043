mod inbound;
mod outbound;

pub use inbound::{
    ContextLevel, EnqueueOutcome, FailOutcome, InboundQueue, InteractionEvent, QueuedInteraction,
};
pub use outbound::{
    context_fit, DeliveredItem, ItemKind, ItemState, OutboundItem, OutboundQueue, ProbeRequest,
    Subtype,
};
