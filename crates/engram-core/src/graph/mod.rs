mod store;
mod subgraph;
mod traversal;
mod types;

pub use store::{GraphSnapshot, GraphStore, NewEdge, ProvenanceChain};
pub use subgraph::Subgraph;
pub use traversal::traverse;
pub use types::{TraversalBudget, TraversalRequest};
