//! Domain types for the shardgrid cluster state.
//!
//! These types describe what the placement engine reads: node identity and
//! attributes, shard copies and their routing state, index metadata and the
//! routing table. All types are serializable so that scenarios can be
//! described in TOML or JSON.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};
use crate::settings::Settings;

/// Unique identifier for a node in the cluster.
pub type NodeId = String;

/// Identifier of one copy of a shard, recorded in the in-sync registry.
pub type AllocationId = String;

/// Reserved attribute keys derived from node identity.
pub const ATTR_ID: &str = "_id";
pub const ATTR_NAME: &str = "_name";
pub const ATTR_HOST: &str = "_host";
pub const ATTR_IP: &str = "_ip";
pub const ATTR_PUBLISH_IP: &str = "_publish_ip";
pub const ATTR_HOST_IP: &str = "_host_ip";

// ── Node ──────────────────────────────────────────────────────────

/// A member of the cluster as seen by the placement engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryNode {
    pub id: NodeId,
    pub name: String,
    /// Resolved host name.
    #[serde(default)]
    pub host_name: String,
    /// Textual address of the host interface.
    #[serde(default)]
    pub host_address: String,
    /// Textual address the node publishes to the cluster.
    #[serde(default)]
    pub publish_address: String,
    /// Operator-defined attributes (`node.attr.*`).
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl DiscoveryNode {
    /// A node whose name equals its id, with loopback addresses.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            host_name: "localhost".to_string(),
            host_address: "127.0.0.1".to_string(),
            publish_address: "127.0.0.1".to_string(),
            attributes: HashMap::new(),
            id,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_host(mut self, host_name: impl Into<String>, host_address: impl Into<String>) -> Self {
        self.host_name = host_name.into();
        self.host_address = host_address.into();
        self
    }

    pub fn with_publish_address(mut self, address: impl Into<String>) -> Self {
        self.publish_address = address.into();
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Primary value of an attribute, resolving the reserved keys to
    /// identity fields. `_ip` resolves to the host address and `_host` to the
    /// host name here; filters also accept the secondary identity for those
    /// two keys.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        match key {
            ATTR_ID => Some(&self.id),
            ATTR_NAME => Some(&self.name),
            ATTR_HOST => Some(&self.host_name),
            ATTR_IP | ATTR_HOST_IP => Some(&self.host_address),
            ATTR_PUBLISH_IP => Some(&self.publish_address),
            other => self.attributes.get(other).map(String::as_str),
        }
    }
}

/// The set of nodes currently in the cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct DiscoveryNodes {
    nodes: BTreeMap<NodeId, DiscoveryNode>,
}

impl DiscoveryNodes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: DiscoveryNode) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn remove(&mut self, node_id: &str) -> Option<DiscoveryNode> {
        self.nodes.remove(node_id)
    }

    pub fn get(&self, node_id: &str) -> Option<&DiscoveryNode> {
        self.nodes.get(node_id)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// Nodes in id order.
    pub fn iter(&self) -> impl Iterator<Item = &DiscoveryNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl FromIterator<DiscoveryNode> for DiscoveryNodes {
    fn from_iter<I: IntoIterator<Item = DiscoveryNode>>(iter: I) -> Self {
        let mut nodes = DiscoveryNodes::new();
        for node in iter {
            nodes.add(node);
        }
        nodes
    }
}

// ── Shard ─────────────────────────────────────────────────────────

/// Identity of a shard: owning index plus ordinal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardId {
    pub index: String,
    pub id: u32,
}

impl ShardId {
    pub fn new(index: impl Into<String>, id: u32) -> Self {
        Self {
            index: index.into(),
            id,
        }
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}]", self.index, self.id)
    }
}

/// Where a shard copy gets its data from when it recovers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecoverySource {
    /// Brand-new, empty store.
    EmptyStore,
    /// Data already on the node's disk.
    ExistingStore,
    /// Hard-linked from the shards of another index (resize, shrink, clone).
    LocalShards,
    /// Restored from a snapshot repository.
    Snapshot { repository: String, snapshot: String },
    /// Copied from the primary (replicas).
    Peer,
}

impl RecoverySource {
    /// Whether this source bootstraps a shard that has never held data.
    pub fn is_initial_recovery(&self) -> bool {
        matches!(self, RecoverySource::EmptyStore | RecoverySource::LocalShards)
    }
}

/// Routing state of one shard copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardRoutingState {
    Unassigned,
    Initializing,
    Started,
    Relocating,
}

/// One copy of a shard and where it lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRouting {
    pub shard_id: ShardId,
    pub primary: bool,
    pub state: ShardRoutingState,
    #[serde(default)]
    pub current_node: Option<NodeId>,
    #[serde(default)]
    pub allocation_id: Option<AllocationId>,
    /// Present while the copy is unassigned or initializing.
    #[serde(default)]
    pub recovery_source: Option<RecoverySource>,
}

impl ShardRouting {
    /// A new unassigned copy.
    pub fn unassigned(shard_id: ShardId, primary: bool, recovery_source: RecoverySource) -> Self {
        Self {
            shard_id,
            primary,
            state: ShardRoutingState::Unassigned,
            current_node: None,
            allocation_id: None,
            recovery_source: Some(recovery_source),
        }
    }

    /// A started copy on `node`.
    pub fn started(
        shard_id: ShardId,
        primary: bool,
        node: impl Into<NodeId>,
        allocation_id: impl Into<AllocationId>,
    ) -> Self {
        Self {
            shard_id,
            primary,
            state: ShardRoutingState::Started,
            current_node: Some(node.into()),
            allocation_id: Some(allocation_id.into()),
            recovery_source: None,
        }
    }

    pub fn index(&self) -> &str {
        &self.shard_id.index
    }

    pub fn is_unassigned(&self) -> bool {
        self.state == ShardRoutingState::Unassigned
    }

    /// Move this copy onto `node` and start initializing.
    pub fn initialize(&mut self, node: impl Into<NodeId>, allocation_id: impl Into<AllocationId>) {
        self.state = ShardRoutingState::Initializing;
        self.current_node = Some(node.into());
        self.allocation_id = Some(allocation_id.into());
    }

    /// Mark an initializing copy as started.
    pub fn start(&mut self) {
        self.state = ShardRoutingState::Started;
        self.recovery_source = None;
    }

    /// Fail the copy back to unassigned with the given recovery source.
    pub fn fail(&mut self, recovery_source: RecoverySource) {
        self.state = ShardRoutingState::Unassigned;
        self.current_node = None;
        self.allocation_id = None;
        self.recovery_source = Some(recovery_source);
    }
}

// ── Index ─────────────────────────────────────────────────────────

/// Metadata of one index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexMetadata {
    pub name: String,
    pub number_of_shards: u32,
    #[serde(default)]
    pub number_of_replicas: u32,
    /// Index-scoped settings (`index.*`).
    #[serde(default)]
    pub settings: Settings,
    /// Name of the index this one was resized, shrunk or cloned from.
    #[serde(default)]
    pub resize_source: Option<String>,
    /// Allocation ids of copies that have completed a start, per shard ordinal.
    #[serde(default)]
    pub in_sync_allocation_ids: BTreeMap<u32, BTreeSet<AllocationId>>,
}

impl IndexMetadata {
    pub fn new(name: impl Into<String>, number_of_shards: u32, number_of_replicas: u32) -> Self {
        Self {
            name: name.into(),
            number_of_shards,
            number_of_replicas,
            settings: Settings::default(),
            resize_source: None,
            in_sync_allocation_ids: BTreeMap::new(),
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_resize_source(mut self, source: impl Into<String>) -> Self {
        self.resize_source = Some(source.into());
        self
    }

    /// Record an in-sync allocation id for a shard ordinal.
    pub fn put_in_sync_allocation_id(&mut self, shard: u32, allocation_id: impl Into<AllocationId>) {
        self.in_sync_allocation_ids
            .entry(shard)
            .or_default()
            .insert(allocation_id.into());
    }

    /// Whether any copy of `shard` has ever completed a start.
    pub fn has_started_once(&self, shard: u32) -> bool {
        self.in_sync_allocation_ids
            .get(&shard)
            .is_some_and(|ids| !ids.is_empty())
    }
}

// ── Routing table ─────────────────────────────────────────────────

/// Shard copies per index, per ordinal.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct RoutingTable {
    indices: BTreeMap<String, BTreeMap<u32, Vec<ShardRouting>>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, routing: ShardRouting) {
        self.indices
            .entry(routing.shard_id.index.clone())
            .or_default()
            .entry(routing.shard_id.id)
            .or_default()
            .push(routing);
    }

    /// All copies of one shard.
    pub fn copies(&self, index: &str, shard: u32) -> &[ShardRouting] {
        self.indices
            .get(index)
            .and_then(|shards| shards.get(&shard))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn copies_mut(&mut self, index: &str, shard: u32) -> StateResult<&mut Vec<ShardRouting>> {
        self.indices
            .get_mut(index)
            .and_then(|shards| shards.get_mut(&shard))
            .ok_or_else(|| StateError::UnknownShard(ShardId::new(index, shard).to_string()))
    }

    /// The primary copy of a shard, if routed.
    pub fn primary(&self, index: &str, shard: u32) -> Option<&ShardRouting> {
        self.copies(index, shard).iter().find(|r| r.primary)
    }

    /// Nodes currently hosting a started copy of the shard.
    pub fn started_nodes(&self, index: &str, shard: u32) -> BTreeSet<&str> {
        self.copies(index, shard)
            .iter()
            .filter(|r| r.state == ShardRoutingState::Started)
            .filter_map(|r| r.current_node.as_deref())
            .collect()
    }

    /// Names of the indices that have routing entries.
    pub fn indices(&self) -> impl Iterator<Item = &str> {
        self.indices.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ShardRouting> {
        self.indices
            .values()
            .flat_map(|shards| shards.values())
            .flatten()
    }
}

// ── Cluster state ─────────────────────────────────────────────────

/// Read-only snapshot of the cluster consumed by allocation deciders.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClusterState {
    #[serde(default)]
    pub nodes: DiscoveryNodes,
    #[serde(default)]
    pub indices: BTreeMap<String, IndexMetadata>,
    #[serde(default)]
    pub routing_table: RoutingTable,
}

impl ClusterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_index(&mut self, index: IndexMetadata) {
        self.indices.insert(index.name.clone(), index);
    }

    pub fn index(&self, name: &str) -> StateResult<&IndexMetadata> {
        self.indices
            .get(name)
            .ok_or_else(|| StateError::UnknownIndex(name.to_string()))
    }

    pub fn index_mut(&mut self, name: &str) -> StateResult<&mut IndexMetadata> {
        self.indices
            .get_mut(name)
            .ok_or_else(|| StateError::UnknownIndex(name.to_string()))
    }

    /// Add unassigned copies for every shard of an already-registered index.
    ///
    /// Primaries use `primary_source`; replicas recover from their peer.
    pub fn route_new_index(&mut self, name: &str, primary_source: RecoverySource) -> StateResult<()> {
        let index = self.index(name)?.clone();
        for shard in 0..index.number_of_shards {
            let shard_id = ShardId::new(name, shard);
            self.routing_table.add(ShardRouting::unassigned(
                shard_id.clone(),
                true,
                primary_source.clone(),
            ));
            for _ in 0..index.number_of_replicas {
                self.routing_table.add(ShardRouting::unassigned(
                    shard_id.clone(),
                    false,
                    RecoverySource::Peer,
                ));
            }
        }
        Ok(())
    }

    /// Start the initializing copy of `shard` that lives on `node`, recording
    /// its allocation id as in-sync.
    pub fn start_shard(&mut self, shard_id: &ShardId, node: &str) -> StateResult<()> {
        let copies = self.routing_table.copies_mut(&shard_id.index, shard_id.id)?;
        let copy = copies
            .iter_mut()
            .find(|r| {
                r.state == ShardRoutingState::Initializing && r.current_node.as_deref() == Some(node)
            })
            .ok_or_else(|| StateError::UnknownShard(format!("{shard_id} on {node}")))?;
        copy.start();
        let allocation_id = copy.allocation_id.clone();

        if let Some(allocation_id) = allocation_id {
            self.index_mut(&shard_id.index)?
                .put_in_sync_allocation_id(shard_id.id, allocation_id);
        }
        Ok(())
    }
}
