//! Forced placement of a shard's very first copy.
//!
//! Until a shard has completed its first start, its first copy may be
//! restricted to a specific set of nodes:
//!
//! - A shard of an index created by resizing another index (local shards
//!   recovery) must start on a node that already holds a started copy of
//!   every shard of the source index, since it bootstraps from local disk.
//! - An index may pin initial allocation explicitly with
//!   `index.routing.allocation.initial_recovery._id`.
//!
//! The gate is derived from the in-sync allocation registry on every call.
//! Once any copy of the shard ordinal is recorded as in-sync the gate is
//! gone for good, even if every copy later fails and is reallocated.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use tracing::trace;

use shardgrid_state::{NodeId, RecoverySource, ShardRouting};

use crate::context::AllocationContext;

/// Setting pinning initial allocation to node ids.
pub const INITIAL_RECOVERY_ID_SETTING: &str = "index.routing.allocation.initial_recovery._id";

/// Why a shard's first copy is restricted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForcedReason {
    /// Resize target: must start next to a copy of every source shard.
    ResizeSource,
    /// Operator pinned the index with `initial_recovery._id`.
    OperatorPinned,
}

/// The node set a shard's first copy is restricted to.
///
/// Pinned sets are borrowed from the [`AllocationContext`]; resize source
/// intersections are computed per call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForcedAllocation<'a> {
    pub nodes: Cow<'a, BTreeSet<NodeId>>,
    pub reason: ForcedReason,
}

impl ForcedAllocation<'_> {
    pub fn allows(&self, node_id: &str) -> bool {
        self.nodes.contains(node_id)
    }

    /// Explanation for a node outside the forced set.
    pub fn explanation(&self) -> String {
        match self.reason {
            ForcedReason::ResizeSource => format!(
                "initial allocation of the shrunken index is only allowed on nodes [{self}] that \
                 hold a copy of every shard in the index"
            ),
            ForcedReason::OperatorPinned => {
                format!("initial allocation of the index is only allowed on nodes [{self}]")
            }
        }
    }
}

impl fmt::Display for ForcedAllocation<'_> {
    /// Renders as `_id:"node1 OR node2"`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("_id:\"")?;
        for (i, node) in self.nodes.iter().enumerate() {
            if i > 0 {
                f.write_str(" OR ")?;
            }
            f.write_str(node)?;
        }
        f.write_str("\"")
    }
}

/// Compute the forced node set for `shard`, if its first placement is
/// still restricted.
pub fn resolve<'c>(
    shard: &ShardRouting,
    ctx: &'c AllocationContext<'_>,
) -> Option<ForcedAllocation<'c>> {
    let source = shard.recovery_source.as_ref()?;
    if !source.is_initial_recovery() {
        return None;
    }
    let index = ctx.index(shard.index())?;
    if index.has_started_once(shard.shard_id.id) {
        return None;
    }

    let reason = match source {
        RecoverySource::LocalShards => ForcedReason::ResizeSource,
        _ => ForcedReason::OperatorPinned,
    };

    if *source == RecoverySource::LocalShards {
        if let Some(resize_source) = index.resize_source.as_deref() {
            let nodes = resize_source_nodes(resize_source, ctx)?;
            trace!(shard = %shard.shard_id, source = resize_source, ?nodes, "resize source copies");
            return Some(ForcedAllocation {
                nodes: Cow::Owned(nodes),
                reason,
            });
        }
    }

    let nodes = ctx.initial_recovery_ids(shard.index())?;
    Some(ForcedAllocation {
        nodes: Cow::Borrowed(nodes),
        reason,
    })
}

/// Nodes holding a started copy of every shard of `source_index`.
///
/// `None` when the source index is unknown or no node holds all of its
/// shards.
fn resize_source_nodes(source_index: &str, ctx: &AllocationContext<'_>) -> Option<BTreeSet<NodeId>> {
    let source = ctx.index(source_index)?;
    let routing = &ctx.state().routing_table;

    let mut shards = 0..source.number_of_shards;
    let first = shards.next()?;
    let mut nodes: BTreeSet<&str> = routing.started_nodes(source_index, first);
    for shard in shards {
        if nodes.is_empty() {
            break;
        }
        let holders = routing.started_nodes(source_index, shard);
        nodes.retain(|node| holders.contains(node));
    }

    if nodes.is_empty() {
        None
    } else {
        Some(nodes.into_iter().map(str::to_string).collect())
    }
}
