//! Allocation decisions and the decider seam.
//!
//! Every node-eligibility check in the scheduler implements
//! [`AllocationDecider`]. The scheduler combines deciders externally,
//! stopping at the first `No`; this crate only provides the filter decider.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use shardgrid_state::{DiscoveryNode, IndexMetadata, NodeId, ShardRouting};

use crate::context::AllocationContext;

/// Verdict of a single decider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecisionType {
    Yes,
    No,
}

impl fmt::Display for DecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionType::Yes => f.write_str("YES"),
            DecisionType::No => f.write_str("NO"),
        }
    }
}

/// A verdict plus, when explanations were requested, why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    #[serde(rename = "decision")]
    kind: DecisionType,
    decider: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    explanation: Option<String>,
}

impl Decision {
    pub fn new(kind: DecisionType, decider: &'static str, explanation: Option<String>) -> Self {
        Self {
            kind,
            decider,
            explanation,
        }
    }

    pub fn kind(&self) -> DecisionType {
        self.kind
    }

    pub fn is_yes(&self) -> bool {
        self.kind == DecisionType::Yes
    }

    pub fn is_no(&self) -> bool {
        self.kind == DecisionType::No
    }

    /// Name of the decider that produced this decision.
    pub fn decider(&self) -> &'static str {
        self.decider
    }

    pub fn explanation(&self) -> Option<&str> {
        self.explanation.as_deref()
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.decider)?;
        if let Some(explanation) = &self.explanation {
            write!(f, ": {explanation}")?;
        }
        Ok(())
    }
}

/// A node-eligibility check consulted by the scheduler.
///
/// Implementations must be pure functions of their inputs so the scheduler
/// can call them concurrently for many (shard, node) pairs.
pub trait AllocationDecider: Send + Sync {
    /// Short, stable name used as the decision label.
    fn name(&self) -> &'static str;

    /// Can `shard` be allocated to `node`?
    fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        ctx: &AllocationContext<'_>,
    ) -> Decision;

    /// Can `shard`, already on `node`, stay there?
    fn can_remain(
        &self,
        _shard: &ShardRouting,
        _node: &DiscoveryNode,
        ctx: &AllocationContext<'_>,
    ) -> Decision {
        ctx.decision(DecisionType::Yes, self.name(), || "no opinion".to_string())
    }

    /// Can any shard of `index` be allocated to `node`?
    fn can_allocate_index(
        &self,
        _index: &IndexMetadata,
        _node: &DiscoveryNode,
        ctx: &AllocationContext<'_>,
    ) -> Decision {
        ctx.decision(DecisionType::Yes, self.name(), || "no opinion".to_string())
    }

    /// Nodes the shard's first copy must be placed on, if restricted.
    fn forced_initial_nodes(
        &self,
        _shard: &ShardRouting,
        _ctx: &AllocationContext<'_>,
    ) -> Option<BTreeSet<NodeId>> {
        None
    }
}
