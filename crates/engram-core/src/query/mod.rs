mod context;
mod natural;
mod structured;

pub use context::{ContextAssembler, ContextBlock, EntitySection};
pub use natural::{broad_search, query_natural, NlPlanner};
pub use structured::{query_structured, QuerySpec};
