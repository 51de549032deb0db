//! Per-pass allocation context.
//!
//! An [`AllocationContext`] is built once per scheduling pass and shared by
//! every decision in that pass. It pins the cluster filter snapshot that
//! was current when the pass started and pre-parses every index's filter
//! settings and initial recovery pin, so evaluation never parses settings.
//!
//! An index whose filter settings do not parse is set aside rather than
//! failing the pass: its shards are refused until the settings are fixed,
//! and every other index is evaluated normally.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};

use shardgrid_state::{ClusterState, IndexMetadata, NodeId};

use crate::decision::{Decision, DecisionType};
use crate::error::{FilterError, FilterResult};
use crate::filters::{FilterRuleSet, FilterScope};
use crate::initial_recovery::INITIAL_RECOVERY_ID_SETTING;

/// Read-only view of everything a decider needs for one pass.
#[derive(Debug)]
pub struct AllocationContext<'a> {
    state: &'a ClusterState,
    cluster_filters: Arc<FilterRuleSet>,
    index_filters: HashMap<&'a str, FilterRuleSet>,
    invalid_index_filters: HashMap<&'a str, FilterError>,
    /// Non-empty `initial_recovery._id` pins, per index.
    initial_recovery_ids: HashMap<&'a str, BTreeSet<NodeId>>,
    explain: bool,
}

impl<'a> AllocationContext<'a> {
    /// Build a context over `state` using the given cluster filter snapshot.
    ///
    /// Fails only if the routing table references an index without
    /// metadata.
    pub fn new(state: &'a ClusterState, cluster_filters: Arc<FilterRuleSet>) -> FilterResult<Self> {
        debug_assert_eq!(cluster_filters.scope(), FilterScope::Cluster);

        for routed in state.routing_table.indices() {
            state.index(routed)?;
        }

        let mut index_filters = HashMap::with_capacity(state.indices.len());
        let mut invalid_index_filters = HashMap::new();
        let mut initial_recovery_ids = HashMap::new();
        for (name, index) in &state.indices {
            match FilterRuleSet::build(FilterScope::Index, &index.settings) {
                Ok(filters) => {
                    index_filters.insert(name.as_str(), filters);
                }
                Err(err) => {
                    warn!(index = %name, error = %err, "index has invalid allocation filters");
                    invalid_index_filters.insert(name.as_str(), err);
                }
            }
            if let Some(ids) = index
                .settings
                .get_as_list(INITIAL_RECOVERY_ID_SETTING)
                .filter(|ids| !ids.is_empty())
            {
                initial_recovery_ids.insert(name.as_str(), ids.into_iter().collect());
            }
        }

        debug!(
            indices = index_filters.len(),
            invalid = invalid_index_filters.len(),
            nodes = state.nodes.len(),
            cluster_filters_version = cluster_filters.version(),
            "allocation context built"
        );

        Ok(Self {
            state,
            cluster_filters,
            index_filters,
            invalid_index_filters,
            initial_recovery_ids,
            explain: false,
        })
    }

    /// Request human-readable explanations on every decision.
    pub fn with_explain(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }

    pub fn state(&self) -> &'a ClusterState {
        self.state
    }

    pub fn cluster_filters(&self) -> &FilterRuleSet {
        &self.cluster_filters
    }

    /// Parsed filters of `index`, or `None` if the index is unknown or its
    /// filters are invalid.
    pub fn index_filters(&self, index: &str) -> Option<&FilterRuleSet> {
        self.index_filters.get(index)
    }

    /// Why the filters of `index` could not be parsed, if they could not.
    pub fn index_filter_error(&self, index: &str) -> Option<&FilterError> {
        self.invalid_index_filters.get(index)
    }

    /// Node ids `index` pins its initial allocation to.
    pub fn initial_recovery_ids(&self, index: &str) -> Option<&BTreeSet<NodeId>> {
        self.initial_recovery_ids.get(index)
    }

    pub fn index(&self, name: &str) -> Option<&'a IndexMetadata> {
        self.state.indices.get(name)
    }

    /// Build a decision, rendering the explanation only when requested.
    pub fn decision<F>(&self, kind: DecisionType, decider: &'static str, explanation: F) -> Decision
    where
        F: FnOnce() -> String,
    {
        let explanation = self.explain.then(explanation);
        Decision::new(kind, decider, explanation)
    }
}
