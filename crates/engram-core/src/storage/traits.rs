use crate::error::Result;
use crate::storage::filters::{EdgeFilter, NodeFilter, StorageStats};
use crate::types::{Edge, EdgeId, Episode, EpisodeId, Node, NodeId};
use chrono::{DateTime, Utc};

/// Narrow storage trait beneath the graph store. Kept small so the
/// backing engine can be swapped without touching upper layers.
pub trait Storage: Send + Sync {
    // === Node Operations ===

    /// Store a node (insert or update). Maintains the alias index.
    fn put_node(&self, node: &Node) -> Result<()>;

    /// Retrieve a node by ID
    fn get_node(&self, id: NodeId) -> Result<Option<Node>>;

    /// Physically remove a node. User erasure only; graph-level removal
    /// goes through retraction.
    fn remove_node(&self, id: NodeId) -> Result<()>;

    /// Resolve a case-folded alias to its representative node, if any.
    fn find_by_alias(&self, alias: &str) -> Result<Option<NodeId>>;

    /// List nodes matching the filter
    fn list_nodes(&self, filter: NodeFilter) -> Result<Vec<Node>>;

    // === Edge Operations ===

    /// Store an edge (insert or update)
    fn put_edge(&self, edge: &Edge) -> Result<()>;

    /// Retrieve an edge by ID
    fn get_edge(&self, id: EdgeId) -> Result<Option<Edge>>;

    /// Physically remove an edge. User erasure only.
    fn remove_edge(&self, id: EdgeId) -> Result<()>;

    /// All edges originating from a node, including inactive.
    fn edges_from(&self, node_id: NodeId) -> Result<Vec<Edge>>;

    /// All edges pointing to a node, including inactive.
    fn edges_to(&self, node_id: NodeId) -> Result<Vec<Edge>>;

    /// All edges between two specific nodes, including inactive.
    fn edges_between(&self, source: NodeId, target: NodeId) -> Result<Vec<Edge>>;

    /// List edges matching the filter. Inactive edges are excluded unless
    /// the filter says otherwise.
    fn list_edges(&self, filter: EdgeFilter) -> Result<Vec<Edge>>;

    // === Episode Operations ===

    fn put_episode(&self, episode: &Episode) -> Result<()>;

    fn get_episode(&self, id: EpisodeId) -> Result<Option<Episode>>;

    fn list_episodes(
        &self,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Episode>>;

    // === Batch Operations ===

    /// Insert or update multiple edges in a single transaction
    fn put_edges_batch(&self, edges: &[Edge]) -> Result<()>;

    // === Metadata ===

    /// Store metadata key-value pair
    fn put_metadata(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Retrieve metadata by key
    fn get_metadata(&self, key: &str) -> Result<Option<Vec<u8>>>;

    // === Maintenance ===

    /// Get database statistics
    fn stats(&self) -> Result<StorageStats>;
}
