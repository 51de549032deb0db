//! TOML cluster scenarios.
//!
//! A scenario describes a cluster the way an operator would inspect it:
//!
//! ```toml
//! [cluster_settings]
//! "cluster.routing.allocation.exclude._name" = "node3"
//!
//! [[nodes]]
//! id = "node1"
//! attributes = { zone = "a" }
//!
//! [[indices]]
//! name = "logs"
//! shards = 1
//! replicas = 1
//! settings = { "index.routing.allocation.initial_recovery._id" = "node2" }
//!
//! [[indices.in_sync]]
//! shard = 0
//! ids = ["a-1"]
//!
//! [[shards]]
//! index = "logs"
//! shard = 0
//! primary = true
//! state = "started"
//! node = "node2"
//! allocation_id = "a-1"
//! ```
//!
//! Indices without any `[[shards]]` entry are routed as brand new: every
//! copy unassigned, primaries recovering from an empty store.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use anyhow::{Context, bail};
use serde::Deserialize;
use tracing::debug;

use shardgrid_state::{
    ClusterState, DiscoveryNode, IndexMetadata, RecoverySource, Settings, ShardId, ShardRouting,
    ShardRoutingState, StateError,
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Scenario {
    /// Fully-qualified cluster settings (`cluster.routing.allocation.*`).
    #[serde(default)]
    pub cluster_settings: Settings,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub indices: Vec<IndexSpec>,
    #[serde(default)]
    pub shards: Vec<ShardSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    pub name: Option<String>,
    pub host_name: Option<String>,
    pub host_address: Option<String>,
    pub publish_address: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub shards: u32,
    #[serde(default)]
    pub replicas: u32,
    #[serde(default)]
    pub settings: Settings,
    pub resize_source: Option<String>,
    #[serde(default)]
    pub in_sync: Vec<InSyncSpec>,
}

/// In-sync allocation ids recorded for one shard ordinal.
#[derive(Debug, Clone, Deserialize)]
pub struct InSyncSpec {
    pub shard: u32,
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShardSpec {
    pub index: String,
    pub shard: u32,
    pub primary: bool,
    #[serde(default = "unassigned")]
    pub state: ShardRoutingState,
    pub node: Option<String>,
    pub allocation_id: Option<String>,
    pub recovery_source: Option<RecoverySource>,
}

fn unassigned() -> ShardRoutingState {
    ShardRoutingState::Unassigned
}

impl NodeSpec {
    fn to_node(&self) -> DiscoveryNode {
        let mut node = DiscoveryNode::new(&self.id);
        if let Some(name) = &self.name {
            node = node.with_name(name);
        }
        if let Some(host_name) = &self.host_name {
            node.host_name = host_name.clone();
        }
        if let Some(host_address) = &self.host_address {
            node.host_address = host_address.clone();
        }
        if let Some(publish_address) = &self.publish_address {
            node = node.with_publish_address(publish_address);
        }
        node.attributes.extend(self.attributes.clone());
        node
    }
}

impl IndexSpec {
    fn to_metadata(&self) -> IndexMetadata {
        let mut index = IndexMetadata::new(&self.name, self.shards, self.replicas)
            .with_settings(self.settings.clone());
        index.resize_source = self.resize_source.clone();
        for entry in &self.in_sync {
            for id in &entry.ids {
                index.put_in_sync_allocation_id(entry.shard, id);
            }
        }
        index
    }
}

impl ShardSpec {
    fn to_routing(&self) -> ShardRouting {
        ShardRouting {
            shard_id: ShardId::new(&self.index, self.shard),
            primary: self.primary,
            state: self.state,
            current_node: self.node.clone(),
            allocation_id: self.allocation_id.clone(),
            recovery_source: self.recovery_source.clone(),
        }
    }
}

impl Scenario {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        let scenario: Scenario = toml::from_str(&content)
            .with_context(|| format!("parsing scenario {}", path.display()))?;
        debug!(
            path = %path.display(),
            nodes = scenario.nodes.len(),
            indices = scenario.indices.len(),
            shards = scenario.shards.len(),
            "loaded scenario"
        );
        Ok(scenario)
    }

    /// Assemble the cluster state this scenario describes.
    pub fn cluster_state(&self) -> anyhow::Result<ClusterState> {
        let mut state = ClusterState::new();
        for spec in &self.nodes {
            state.nodes.add(spec.to_node());
        }
        for spec in &self.indices {
            state.put_index(spec.to_metadata());
        }

        for spec in &self.shards {
            let index = state.index(&spec.index)?;
            if spec.shard >= index.number_of_shards {
                bail!(StateError::UnknownShard(
                    ShardId::new(&spec.index, spec.shard).to_string()
                ));
            }
            if let Some(node) = spec.node.as_deref() {
                if !state.nodes.contains(node) {
                    bail!(StateError::UnknownNode(node.to_string()));
                }
            }
            if spec.state != ShardRoutingState::Unassigned && spec.node.is_none() {
                bail!(
                    "copy of {} is {:?} but has no node",
                    ShardId::new(&spec.index, spec.shard),
                    spec.state
                );
            }
            state.routing_table.add(spec.to_routing());
        }

        let routed: BTreeSet<&str> = self.shards.iter().map(|s| s.index.as_str()).collect();
        for spec in &self.indices {
            if !routed.contains(spec.name.as_str()) {
                state.route_new_index(&spec.name, RecoverySource::EmptyStore)?;
            }
        }
        Ok(state)
    }
}

/// Load a flat TOML table of fully-qualified settings.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading settings {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("parsing settings {}", path.display()))
}
