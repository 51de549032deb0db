//! shardgrid node-eligibility filtering for shard placement.
//!
//! Given a shard and a candidate node, decides whether the node is an
//! admissible placement target. The scheduler calls this once per
//! candidate, potentially thousands of times per placement cycle, and
//! combines it with its other deciders.
//!
//! # Components
//!
//! - **`matcher`**: Attribute value matching (exact, IP wildcards)
//! - **`filters`**: Require/include/exclude rule sets per scope
//! - **`snapshot`**: Atomically swapped cluster filter settings
//! - **`index_settings`**: Validated updates of index filter settings
//! - **`initial_recovery`**: Forced placement of a shard's first copy
//! - **`context`**: Per-pass view of cluster state and filters
//! - **`decision`**: Decisions and the `AllocationDecider` seam
//! - **`decider`**: The filter allocation decider
//!
//! # Settings
//!
//! ```text
//! cluster.routing.allocation.{require,include,exclude}.<attribute>
//! index.routing.allocation.{require,include,exclude}.<attribute>
//! index.routing.allocation.initial_recovery._id
//! ```

pub mod context;
pub mod decider;
pub mod decision;
pub mod error;
pub mod filters;
pub mod index_settings;
pub mod initial_recovery;
pub mod matcher;
pub mod snapshot;

pub use context::AllocationContext;
pub use decider::FilterAllocationDecider;
pub use decision::{AllocationDecider, Decision, DecisionType};
pub use error::{FilterError, FilterResult};
pub use filters::{FilterKind, FilterRule, FilterRuleSet, FilterScope, NodeFilters};
pub use index_settings::update_index_settings;
pub use initial_recovery::{ForcedAllocation, ForcedReason};
pub use snapshot::ClusterFilterSettings;
