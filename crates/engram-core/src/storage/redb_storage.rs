use crate::error::{EngramError, Result};
use crate::storage::filters::{EdgeFilter, NodeFilter, StorageStats};
use crate::storage::traits::Storage;
use crate::types::{case_fold, Edge, EdgeId, Episode, EpisodeId, Node, NodeId};
use chrono::{DateTime, Utc};
use redb::{
    Database, MultimapTableDefinition, ReadableMultimapTable, ReadableTable, TableDefinition,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// Primary tables
const NODES: TableDefinition<&[u8; 16], &[u8]> = TableDefinition::new("nodes");
const EDGES: TableDefinition<&[u8; 16], &[u8]> = TableDefinition::new("edges");
const EPISODES: TableDefinition<&[u8; 16], &[u8]> = TableDefinition::new("episodes");

// Alias index: case-folded alias -> representative node.
// Aliases are a function, so this is a plain table, not a multimap.
const ALIASES: TableDefinition<&str, &[u8; 16]> = TableDefinition::new("aliases");

// Secondary indexes
const NODES_BY_KIND: MultimapTableDefinition<&str, &[u8; 16]> =
    MultimapTableDefinition::new("nodes_by_kind");
const EDGES_BY_FROM: MultimapTableDefinition<&[u8; 16], &[u8; 16]> =
    MultimapTableDefinition::new("edges_by_from");
const EDGES_BY_TO: MultimapTableDefinition<&[u8; 16], &[u8; 16]> =
    MultimapTableDefinition::new("edges_by_to");

// Metadata table
const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

/// Current schema version.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;
const SCHEMA_VERSION_KEY: &str = "schema_version";

/// Redb-based storage implementation. One file per user graph.
pub struct RedbStorage {
    db: Arc<Database>,
    path: PathBuf,
}

impl RedbStorage {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                EngramError::Validation(format!("Failed to create directory: {}", e))
            })?;
        }

        let is_new = !path.exists();
        let db = Database::create(&path)?;

        if is_new {
            let write_txn = db.begin_write()?;
            {
                let _ = write_txn.open_table(NODES)?;
                let _ = write_txn.open_table(EDGES)?;
                let _ = write_txn.open_table(EPISODES)?;
                let _ = write_txn.open_table(ALIASES)?;
                let _ = write_txn.open_multimap_table(NODES_BY_KIND)?;
                let _ = write_txn.open_multimap_table(EDGES_BY_FROM)?;
                let _ = write_txn.open_multimap_table(EDGES_BY_TO)?;
                let mut meta = write_txn.open_table(META)?;
                meta.insert(
                    SCHEMA_VERSION_KEY,
                    CURRENT_SCHEMA_VERSION.to_string().as_bytes(),
                )?;
            }
            write_txn.commit()?;
        } else {
            Self::check_schema_version(&db)?;
            let write_txn = db.begin_write()?;
            {
                let _ = write_txn.open_table(NODES)?;
                let _ = write_txn.open_table(EDGES)?;
                let _ = write_txn.open_table(EPISODES)?;
                let _ = write_txn.open_table(ALIASES)?;
                let _ = write_txn.open_multimap_table(NODES_BY_KIND)?;
                let _ = write_txn.open_multimap_table(EDGES_BY_FROM)?;
                let _ = write_txn.open_multimap_table(EDGES_BY_TO)?;
                let _ = write_txn.open_table(META)?;
            }
            write_txn.commit()?;
        }

        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    fn check_schema_version(db: &Database) -> Result<()> {
        let read_txn = db.begin_read()?;
        let version = {
            let table = read_txn.open_table(META).ok();
            table
                .and_then(|t| {
                    t.get(SCHEMA_VERSION_KEY).ok().flatten().and_then(|v| {
                        std::str::from_utf8(v.value())
                            .ok()
                            .and_then(|s| s.parse::<u32>().ok())
                    })
                })
                .unwrap_or(1)
        };

        if version != CURRENT_SCHEMA_VERSION {
            return Err(EngramError::Validation(format!(
                "Database schema v{} does not match this binary's v{}",
                version, CURRENT_SCHEMA_VERSION
            )));
        }
        Ok(())
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Shared handle to the underlying database. The audit log and queues
    /// keep their tables in the same file.
    pub fn database(&self) -> Arc<Database> {
        self.db.clone()
    }

    fn uuid_to_bytes(id: &uuid::Uuid) -> [u8; 16] {
        *id.as_bytes()
    }

    fn bytes_to_uuid(bytes: &[u8; 16]) -> uuid::Uuid {
        uuid::Uuid::from_bytes(*bytes)
    }

    fn serialize_node(node: &Node) -> Result<Vec<u8>> {
        bincode::serialize(node).map_err(EngramError::from)
    }

    fn deserialize_node(bytes: &[u8]) -> Result<Node> {
        bincode::deserialize(bytes).map_err(EngramError::from)
    }

    fn serialize_edge(edge: &Edge) -> Result<Vec<u8>> {
        bincode::serialize(edge).map_err(EngramError::from)
    }

    fn deserialize_edge(bytes: &[u8]) -> Result<Edge> {
        bincode::deserialize(bytes).map_err(EngramError::from)
    }

    fn serialize_episode(episode: &Episode) -> Result<Vec<u8>> {
        bincode::serialize(episode).map_err(EngramError::from)
    }

    fn deserialize_episode(bytes: &[u8]) -> Result<Episode> {
        bincode::deserialize(bytes).map_err(EngramError::from)
    }

    /// Update alias and kind indexes for a node
    fn update_node_indexes(
        &self,
        txn: &redb::WriteTransaction,
        node: &Node,
        old_node: Option<&Node>,
    ) -> Result<()> {
        let node_id_bytes = Self::uuid_to_bytes(&node.id);

        {
            let mut kind_table = txn.open_multimap_table(NODES_BY_KIND)?;
            if let Some(old) = old_node {
                if old.kind != node.kind {
                    kind_table.remove(old.kind.as_str(), &node_id_bytes)?;
                }
            }
            kind_table.insert(node.kind.as_str(), &node_id_bytes)?;
        }

        {
            let mut alias_table = txn.open_table(ALIASES)?;
            if let Some(old) = old_node {
                for old_alias in &old.aliases {
                    if !node.aliases.contains(old_alias) {
                        alias_table.remove(old_alias.as_str())?;
                    }
                }
            }
            for alias in &node.aliases {
                alias_table.insert(alias.as_str(), &node_id_bytes)?;
            }
        }

        Ok(())
    }

    fn update_edge_indexes(&self, txn: &redb::WriteTransaction, edge: &Edge) -> Result<()> {
        let edge_id_bytes = Self::uuid_to_bytes(&edge.id);
        let from_bytes = Self::uuid_to_bytes(&edge.source);
        let to_bytes = Self::uuid_to_bytes(&edge.target);

        {
            let mut from_table = txn.open_multimap_table(EDGES_BY_FROM)?;
            from_table.insert(&from_bytes, &edge_id_bytes)?;
        }
        {
            let mut to_table = txn.open_multimap_table(EDGES_BY_TO)?;
            to_table.insert(&to_bytes, &edge_id_bytes)?;
        }

        Ok(())
    }

    fn node_matches_filter(node: &Node, filter: &NodeFilter) -> bool {
        if let Some(kind) = filter.kind {
            if node.kind != kind {
                return false;
            }
        }
        if let Some(ref fragment) = filter.name_contains {
            if !case_fold(&node.name).contains(&case_fold(fragment)) {
                return false;
            }
        }
        if let Some(ref fragment) = filter.alias_contains {
            let folded = case_fold(fragment);
            if !node.aliases.iter().any(|a| a.contains(&folded)) {
                return false;
            }
        }
        if let Some(after) = filter.created_after {
            if node.created_at < after {
                return false;
            }
        }
        true
    }

    fn edge_matches_filter(edge: &Edge, filter: &EdgeFilter, now: DateTime<Utc>) -> bool {
        if !filter.include_inactive && !edge.is_active(now) {
            return false;
        }
        if let Some(source) = filter.source {
            if edge.source != source {
                return false;
            }
        }
        if let Some(target) = filter.target {
            if edge.target != target {
                return false;
            }
        }
        if let Some(ref relation) = filter.relation {
            if &edge.relation != relation {
                return false;
            }
        }
        if let Some(min) = filter.min_confidence {
            if edge.confidence < min {
                return false;
            }
        }
        true
    }

    fn edges_by_index(
        &self,
        index: MultimapTableDefinition<&[u8; 16], &[u8; 16]>,
        node_id: NodeId,
    ) -> Result<Vec<Edge>> {
        let read_txn = self.db.begin_read()?;
        let index_table = read_txn.open_multimap_table(index)?;
        let edges_table = read_txn.open_table(EDGES)?;

        let node_bytes = Self::uuid_to_bytes(&node_id);
        let mut edges = Vec::new();
        for entry in index_table.get(&node_bytes)? {
            let guard = entry?;
            if let Some(bytes) = edges_table.get(guard.value())? {
                edges.push(Self::deserialize_edge(bytes.value())?);
            }
        }
        Ok(edges)
    }
}

impl Storage for RedbStorage {
    fn put_node(&self, node: &Node) -> Result<()> {
        node.validate().map_err(EngramError::Validation)?;

        let write_txn = self.db.begin_write()?;

        let node_id_bytes = Self::uuid_to_bytes(&node.id);
        let old_node = {
            let nodes_table = write_txn.open_table(NODES)?;
            let old_bytes = nodes_table
                .get(&node_id_bytes)?
                .map(|guard| guard.value().to_vec());
            old_bytes
                .map(|bytes| Self::deserialize_node(&bytes))
                .transpose()?
        };

        let node_bytes = Self::serialize_node(node)?;
        {
            let mut nodes_table = write_txn.open_table(NODES)?;
            nodes_table.insert(&node_id_bytes, node_bytes.as_slice())?;
        }

        self.update_node_indexes(&write_txn, node, old_node.as_ref())?;
        write_txn.commit()?;
        Ok(())
    }

    fn get_node(&self, id: NodeId) -> Result<Option<Node>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(NODES)?;
        let id_bytes = Self::uuid_to_bytes(&id);

        if let Some(bytes) = table.get(&id_bytes)? {
            Ok(Some(Self::deserialize_node(bytes.value())?))
        } else {
            Ok(None)
        }
    }

    fn remove_node(&self, id: NodeId) -> Result<()> {
        let node = self.get_node(id)?.ok_or(EngramError::NodeNotFound(id))?;
        let node_id_bytes = Self::uuid_to_bytes(&id);

        let write_txn = self.db.begin_write()?;
        {
            let mut nodes_table = write_txn.open_table(NODES)?;
            nodes_table.remove(&node_id_bytes)?;
        }
        {
            let mut kind_table = write_txn.open_multimap_table(NODES_BY_KIND)?;
            kind_table.remove(node.kind.as_str(), &node_id_bytes)?;
        }
        {
            let mut alias_table = write_txn.open_table(ALIASES)?;
            for alias in &node.aliases {
                alias_table.remove(alias.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn find_by_alias(&self, alias: &str) -> Result<Option<NodeId>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ALIASES)?;
        let folded = case_fold(alias);

        Ok(table
            .get(folded.as_str())?
            .map(|guard| Self::bytes_to_uuid(guard.value())))
    }

    fn list_nodes(&self, filter: NodeFilter) -> Result<Vec<Node>> {
        let read_txn = self.db.begin_read()?;
        let nodes_table = read_txn.open_table(NODES)?;

        let mut nodes = Vec::new();

        if let Some(kind) = filter.kind {
            let kind_index = read_txn.open_multimap_table(NODES_BY_KIND)?;
            for entry in kind_index.get(kind.as_str())? {
                let guard = entry?;
                if let Some(bytes) = nodes_table.get(guard.value())? {
                    let node = Self::deserialize_node(bytes.value())?;
                    if Self::node_matches_filter(&node, &filter) {
                        nodes.push(node);
                    }
                }
            }
        } else {
            for item in nodes_table.iter()? {
                let (_, value) = item?;
                let node = Self::deserialize_node(value.value())?;
                if Self::node_matches_filter(&node, &filter) {
                    nodes.push(node);
                }
            }
        }

        // UUIDv7 keys iterate in creation order; sort explicitly anyway
        // since the kind index does not.
        nodes.sort_by_key(|n| n.created_at);

        let offset = filter.offset.unwrap_or(0);
        let nodes: Vec<Node> = nodes.into_iter().skip(offset).collect();
        if let Some(limit) = filter.limit {
            Ok(nodes.into_iter().take(limit).collect())
        } else {
            Ok(nodes)
        }
    }

    fn put_edge(&self, edge: &Edge) -> Result<()> {
        edge.validate().map_err(EngramError::Validation)?;

        let write_txn = self.db.begin_write()?;
        let edge_bytes = Self::serialize_edge(edge)?;
        {
            let mut edges_table = write_txn.open_table(EDGES)?;
            let edge_id_bytes = Self::uuid_to_bytes(&edge.id);
            edges_table.insert(&edge_id_bytes, edge_bytes.as_slice())?;
        }
        self.update_edge_indexes(&write_txn, edge)?;
        write_txn.commit()?;
        Ok(())
    }

    fn get_edge(&self, id: EdgeId) -> Result<Option<Edge>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EDGES)?;
        let id_bytes = Self::uuid_to_bytes(&id);

        if let Some(bytes) = table.get(&id_bytes)? {
            Ok(Some(Self::deserialize_edge(bytes.value())?))
        } else {
            Ok(None)
        }
    }

    fn remove_edge(&self, id: EdgeId) -> Result<()> {
        let edge = self.get_edge(id)?.ok_or(EngramError::EdgeNotFound(id))?;
        let edge_id_bytes = Self::uuid_to_bytes(&id);
        let from_bytes = Self::uuid_to_bytes(&edge.source);
        let to_bytes = Self::uuid_to_bytes(&edge.target);

        let write_txn = self.db.begin_write()?;
        {
            let mut edges_table = write_txn.open_table(EDGES)?;
            edges_table.remove(&edge_id_bytes)?;
        }
        {
            let mut from_table = write_txn.open_multimap_table(EDGES_BY_FROM)?;
            from_table.remove(&from_bytes, &edge_id_bytes)?;
        }
        {
            let mut to_table = write_txn.open_multimap_table(EDGES_BY_TO)?;
            to_table.remove(&to_bytes, &edge_id_bytes)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn edges_from(&self, node_id: NodeId) -> Result<Vec<Edge>> {
        self.edges_by_index(EDGES_BY_FROM, node_id)
    }

    fn edges_to(&self, node_id: NodeId) -> Result<Vec<Edge>> {
        self.edges_by_index(EDGES_BY_TO, node_id)
    }

    fn edges_between(&self, source: NodeId, target: NodeId) -> Result<Vec<Edge>> {
        Ok(self
            .edges_from(source)?
            .into_iter()
            .filter(|e| e.target == target)
            .collect())
    }

    fn list_edges(&self, filter: EdgeFilter) -> Result<Vec<Edge>> {
        let now = Utc::now();

        // Use the endpoint indexes when the filter pins an endpoint.
        let candidates = if let Some(source) = filter.source {
            self.edges_from(source)?
        } else if let Some(target) = filter.target {
            self.edges_to(target)?
        } else {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(EDGES)?;
            let mut all = Vec::new();
            for item in table.iter()? {
                let (_, value) = item?;
                all.push(Self::deserialize_edge(value.value())?);
            }
            all
        };

        let mut edges: Vec<Edge> = candidates
            .into_iter()
            .filter(|e| Self::edge_matches_filter(e, &filter, now))
            .collect();

        // Descending confidence, ties broken by ascending first_observed.
        edges.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.first_observed.cmp(&b.first_observed))
        });

        if let Some(limit) = filter.limit {
            edges.truncate(limit);
        }
        Ok(edges)
    }

    fn put_episode(&self, episode: &Episode) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(EPISODES)?;
            let id_bytes = Self::uuid_to_bytes(&episode.id);
            let bytes = Self::serialize_episode(episode)?;
            table.insert(&id_bytes, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get_episode(&self, id: EpisodeId) -> Result<Option<Episode>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EPISODES)?;
        let id_bytes = Self::uuid_to_bytes(&id);

        if let Some(bytes) = table.get(&id_bytes)? {
            Ok(Some(Self::deserialize_episode(bytes.value())?))
        } else {
            Ok(None)
        }
    }

    fn list_episodes(
        &self,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Episode>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EPISODES)?;

        let mut episodes = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            let episode = Self::deserialize_episode(value.value())?;
            if let Some(since) = since {
                if episode.occurred_at < since {
                    continue;
                }
            }
            episodes.push(episode);
        }

        episodes.sort_by_key(|e| e.occurred_at);
        if let Some(limit) = limit {
            let skip = episodes.len().saturating_sub(limit);
            episodes.drain(..skip);
        }
        Ok(episodes)
    }

    fn put_edges_batch(&self, edges: &[Edge]) -> Result<()> {
        for edge in edges {
            edge.validate().map_err(EngramError::Validation)?;
        }

        let write_txn = self.db.begin_write()?;
        {
            let mut edges_table = write_txn.open_table(EDGES)?;
            let mut from_table = write_txn.open_multimap_table(EDGES_BY_FROM)?;
            let mut to_table = write_txn.open_multimap_table(EDGES_BY_TO)?;

            for edge in edges {
                let edge_id_bytes = Self::uuid_to_bytes(&edge.id);
                let bytes = Self::serialize_edge(edge)?;
                edges_table.insert(&edge_id_bytes, bytes.as_slice())?;
                from_table.insert(&Self::uuid_to_bytes(&edge.source), &edge_id_bytes)?;
                to_table.insert(&Self::uuid_to_bytes(&edge.target), &edge_id_bytes)?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn put_metadata(&self, key: &str, value: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(META)?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get_metadata(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(META)?;
        Ok(table.get(key)?.map(|v| v.value().to_vec()))
    }

    fn stats(&self) -> Result<StorageStats> {
        let read_txn = self.db.begin_read()?;
        let nodes_table = read_txn.open_table(NODES)?;
        let edges_table = read_txn.open_table(EDGES)?;
        let episodes_table = read_txn.open_table(EPISODES)?;

        let now = Utc::now();
        let mut node_counts_by_kind = HashMap::new();
        let mut edge_counts_by_relation = HashMap::new();
        let mut node_count = 0u64;
        let mut edge_count = 0u64;
        let mut active = 0u64;
        let mut retracted = 0u64;
        let mut archived = 0u64;

        for item in nodes_table.iter()? {
            let (_, value) = item?;
            let node = Self::deserialize_node(value.value())?;
            *node_counts_by_kind.entry(node.kind).or_insert(0) += 1;
            node_count += 1;
        }

        for item in edges_table.iter()? {
            let (_, value) = item?;
            let edge = Self::deserialize_edge(value.value())?;
            *edge_counts_by_relation
                .entry(edge.relation.clone())
                .or_insert(0) += 1;
            edge_count += 1;
            if edge.retracted {
                retracted += 1;
            } else if edge.archived {
                archived += 1;
            } else if edge.is_active(now) {
                active += 1;
            }
        }

        let episode_count = episodes_table.iter()?.count() as u64;

        Ok(StorageStats {
            node_count,
            edge_count,
            episode_count,
            node_counts_by_kind,
            edge_counts_by_relation,
            active_edge_count: active,
            retracted_edge_count: retracted,
            archived_edge_count: archived,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeKind, PrivacyLevel, Provenance, Relation, TemporalType};
    use tempfile::TempDir;
    use uuid::Uuid;

    fn open_storage() -> (RedbStorage, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = RedbStorage::open(dir.path().join("test.redb")).unwrap();
        (storage, dir)
    }

    fn make_edge(source: NodeId, target: NodeId, relation: &str, confidence: f32) -> Edge {
        Edge::new(
            source,
            target,
            Relation::new(relation).unwrap(),
            TemporalType::Trait,
            confidence,
            Provenance::Explicit,
            Some(Uuid::now_v7()),
        )
    }

    #[test]
    fn node_roundtrip_and_alias_lookup() {
        let (storage, _dir) = open_storage();

        let mut node = Node::new(NodeKind::Person, "Lena", PrivacyLevel::L2Personal);
        node.add_alias("Lena Petrova");
        storage.put_node(&node).unwrap();

        let loaded = storage.get_node(node.id).unwrap().unwrap();
        assert_eq!(loaded.name, "Lena");
        assert_eq!(storage.find_by_alias("LENA").unwrap(), Some(node.id));
        assert_eq!(
            storage.find_by_alias("lena petrova").unwrap(),
            Some(node.id)
        );
        assert_eq!(storage.find_by_alias("boris").unwrap(), None);
    }

    #[test]
    fn remove_node_clears_alias_index() {
        let (storage, _dir) = open_storage();

        let node = Node::new(NodeKind::Person, "Lena", PrivacyLevel::L2Personal);
        storage.put_node(&node).unwrap();
        storage.remove_node(node.id).unwrap();

        assert!(storage.get_node(node.id).unwrap().is_none());
        assert_eq!(storage.find_by_alias("lena").unwrap(), None);
    }

    #[test]
    fn edge_indexes_serve_both_directions() {
        let (storage, _dir) = open_storage();

        let a = Node::new(NodeKind::Person, "User", PrivacyLevel::L3Private);
        let b = Node::new(NodeKind::Person, "Lena", PrivacyLevel::L2Personal);
        storage.put_node(&a).unwrap();
        storage.put_node(&b).unwrap();

        let edge = make_edge(a.id, b.id, "married_to", 0.9);
        storage.put_edge(&edge).unwrap();

        assert_eq!(storage.edges_from(a.id).unwrap().len(), 1);
        assert_eq!(storage.edges_to(b.id).unwrap().len(), 1);
        assert_eq!(storage.edges_between(a.id, b.id).unwrap().len(), 1);
        assert!(storage.edges_between(b.id, a.id).unwrap().is_empty());
    }

    #[test]
    fn list_edges_excludes_inactive_by_default() {
        let (storage, _dir) = open_storage();

        let a = Node::new(NodeKind::Person, "User", PrivacyLevel::L3Private);
        let b = Node::new(NodeKind::Concept, "Malbec", PrivacyLevel::L0Public);
        storage.put_node(&a).unwrap();
        storage.put_node(&b).unwrap();

        let live = make_edge(a.id, b.id, "likes", 0.8);
        let mut dead = make_edge(a.id, b.id, "loves", 0.9);
        dead.retract(crate::types::RetractionReason::UserRequest);
        storage.put_edge(&live).unwrap();
        storage.put_edge(&dead).unwrap();

        let visible = storage.list_edges(EdgeFilter::new().with_source(a.id)).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, live.id);

        let all = storage
            .list_edges(EdgeFilter::new().with_source(a.id).include_inactive())
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn list_edges_orders_by_confidence_then_age() {
        let (storage, _dir) = open_storage();

        let a = Node::new(NodeKind::Person, "User", PrivacyLevel::L3Private);
        let b = Node::new(NodeKind::Concept, "Wine", PrivacyLevel::L0Public);
        storage.put_node(&a).unwrap();
        storage.put_node(&b).unwrap();

        let weak = make_edge(a.id, b.id, "interested_in", 0.4);
        let strong = make_edge(a.id, b.id, "loves", 0.9);
        storage.put_edge(&weak).unwrap();
        storage.put_edge(&strong).unwrap();

        let edges = storage.list_edges(EdgeFilter::new().with_source(a.id)).unwrap();
        assert_eq!(edges[0].id, strong.id);
        assert_eq!(edges[1].id, weak.id);
    }

    #[test]
    fn episode_roundtrip() {
        let (storage, _dir) = open_storage();

        let episode = Episode::new("s1", 1, "chat");
        storage.put_episode(&episode).unwrap();

        let loaded = storage.get_episode(episode.id).unwrap().unwrap();
        assert_eq!(loaded.session_id, "s1");
        assert_eq!(storage.list_episodes(None, None).unwrap().len(), 1);
    }

    #[test]
    fn stats_counts_by_kind() {
        let (storage, _dir) = open_storage();

        storage
            .put_node(&Node::new(NodeKind::Person, "Lena", PrivacyLevel::L2Personal))
            .unwrap();
        storage
            .put_node(&Node::new(NodeKind::Concept, "Wine", PrivacyLevel::L0Public))
            .unwrap();

        let stats = storage.stats().unwrap();
        assert_eq!(stats.node_count, 2);
        assert_eq!(stats.node_counts_by_kind[&NodeKind::Person], 1);
    }
}
