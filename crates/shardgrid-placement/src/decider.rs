//! The filter allocation decider.
//!
//! Decides whether a node is an admissible target for a shard based on
//! the require/include/exclude filters of the cluster and of the shard's
//! index, and on the forced initial placement of shards that have never
//! started.
//!
//! Evaluation order:
//!
//! 1. If the shard's first placement is still restricted
//!    ([`initial_recovery::resolve`]), membership in the forced node set
//!    alone decides.
//! 2. Otherwise the cluster filters, then the index filters, are checked.
//!    Within a scope exclude is checked first, then require, then include.
//!    The first violated group is the one reported.
//!
//! Shards of an index whose filter settings do not parse are refused on
//! every node until the settings are fixed.

use std::collections::BTreeSet;

use tracing::trace;

use shardgrid_state::{DiscoveryNode, IndexMetadata, NodeId, RecoverySource, ShardRouting};

use crate::context::AllocationContext;
use crate::decision::{AllocationDecider, Decision, DecisionType};
use crate::filters::{FilterKind, FilterRuleSet, NodeFilters};
use crate::initial_recovery;

/// Label carried by every decision of this decider.
pub const NAME: &str = "filter";

/// Explanation of a positive decision.
pub const PASSES_FILTERS: &str = "node passes include/exclude/require filters";

/// Node-eligibility decider driven by allocation filters.
///
/// Stateless: the filters it evaluates come from the [`AllocationContext`],
/// so one instance can serve any number of concurrent passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterAllocationDecider;

impl FilterAllocationDecider {
    pub fn new() -> Self {
        Self
    }

    /// Decide whether `shard` may be allocated to `node`.
    pub fn evaluate(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        ctx: &AllocationContext<'_>,
    ) -> Decision {
        let decision = match initial_recovery::resolve(shard, ctx) {
            Some(forced) if forced.allows(&node.id) => passes(ctx),
            Some(forced) => ctx.decision(DecisionType::No, NAME, || forced.explanation()),
            None => match index_filters(ctx, shard.index()) {
                Ok(index_filters) => {
                    filter_decision(ctx, [Some(ctx.cluster_filters()), index_filters], node)
                }
                Err(refused) => refused,
            },
        };

        trace!(
            shard = %shard.shard_id,
            primary = shard.primary,
            node = %node.id,
            decision = %decision.kind(),
            "filter allocation decision"
        );
        decision
    }

    /// Decide whether `shard`, currently on `node`, may stay there.
    ///
    /// Only filters apply; the initial placement gate concerns unplaced
    /// shards.
    pub fn evaluate_remain(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        ctx: &AllocationContext<'_>,
    ) -> Decision {
        match index_filters(ctx, shard.index()) {
            Ok(index_filters) => {
                filter_decision(ctx, [Some(ctx.cluster_filters()), index_filters], node)
            }
            Err(refused) => refused,
        }
    }

    /// Decide whether shards of `index` may be allocated to `node`, judged
    /// on the index's own filters only.
    pub fn evaluate_index(
        &self,
        index: &IndexMetadata,
        node: &DiscoveryNode,
        ctx: &AllocationContext<'_>,
    ) -> Decision {
        match index_filters(ctx, &index.name) {
            Ok(index_filters) => filter_decision(ctx, [index_filters, None], node),
            Err(refused) => refused,
        }
    }

    /// Whether auto-expanded replicas of `index` should count `node`.
    ///
    /// Index filters are checked before cluster filters here.
    pub fn should_auto_expand_to_node(
        &self,
        index: &IndexMetadata,
        node: &DiscoveryNode,
        ctx: &AllocationContext<'_>,
    ) -> Decision {
        match index_filters(ctx, &index.name) {
            Ok(index_filters) => {
                filter_decision(ctx, [index_filters, Some(ctx.cluster_filters())], node)
            }
            Err(refused) => refused,
        }
    }

    /// Nodes the shard must be placed on for its first start.
    ///
    /// Reported only for resize targets (local shards recovery), which can
    /// start nowhere else. Pinned empty-store shards are gated through
    /// [`evaluate`](Self::evaluate) instead.
    pub fn forced_initial_nodes(
        &self,
        shard: &ShardRouting,
        ctx: &AllocationContext<'_>,
    ) -> Option<BTreeSet<NodeId>> {
        if shard.recovery_source != Some(RecoverySource::LocalShards) {
            return None;
        }
        initial_recovery::resolve(shard, ctx).map(|forced| forced.nodes.into_owned())
    }
}

impl AllocationDecider for FilterAllocationDecider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        ctx: &AllocationContext<'_>,
    ) -> Decision {
        self.evaluate(shard, node, ctx)
    }

    fn can_remain(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        ctx: &AllocationContext<'_>,
    ) -> Decision {
        self.evaluate_remain(shard, node, ctx)
    }

    fn can_allocate_index(
        &self,
        index: &IndexMetadata,
        node: &DiscoveryNode,
        ctx: &AllocationContext<'_>,
    ) -> Decision {
        self.evaluate_index(index, node, ctx)
    }

    fn forced_initial_nodes(
        &self,
        shard: &ShardRouting,
        ctx: &AllocationContext<'_>,
    ) -> Option<BTreeSet<NodeId>> {
        FilterAllocationDecider::forced_initial_nodes(self, shard, ctx)
    }
}

/// Parsed filters of `index`, or the refusal owed to its shards when its
/// filter settings are invalid.
fn index_filters<'c>(
    ctx: &'c AllocationContext<'_>,
    index: &str,
) -> Result<Option<&'c FilterRuleSet>, Decision> {
    match ctx.index_filter_error(index) {
        Some(err) => Err(ctx.decision(DecisionType::No, NAME, || {
            format!("index [{index}] has invalid allocation filters: {err}")
        })),
        None => Ok(ctx.index_filters(index)),
    }
}

fn passes(ctx: &AllocationContext<'_>) -> Decision {
    ctx.decision(DecisionType::Yes, NAME, || PASSES_FILTERS.to_string())
}

/// Check rule sets in order; the first violated group decides.
fn filter_decision(
    ctx: &AllocationContext<'_>,
    scopes: [Option<&FilterRuleSet>; 2],
    node: &DiscoveryNode,
) -> Decision {
    let violation = scopes
        .into_iter()
        .flatten()
        .find_map(|filters| filters.first_violation(node));

    match violation {
        Some(filters) => ctx.decision(DecisionType::No, NAME, || rejection(filters)),
        None => passes(ctx),
    }
}

fn rejection(filters: &NodeFilters) -> String {
    let verb = match filters.kind() {
        FilterKind::Exclude => "matches",
        FilterKind::Require | FilterKind::Include => "does not match",
    };
    format!(
        "node {verb} {} setting [{}] filters [{filters}]",
        filters.scope(),
        filters.setting_group()
    )
}
